#![deny(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms)]
//! A multiprocessor memory allocator in the Hoard design
//!
//! Allocating threads are hashed onto per-CPU Heaps to keep them off each other's
//! locks, while mostly-empty Superblocks drain back into one shared global Heap so
//! that no single Heap can sit on an unbounded pile of free memory. See the
//! [`hoard`] module for the design notes.

pub mod hoard;

pub use hoard::Allocator;
