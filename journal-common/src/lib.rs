//! Common types and utilities shared across journal crates.
//!
//! This crate provides foundational types used by both the registry and the
//! query engine: collection aliases, microsecond clocks and the capability
//! surface of a journal file reader.

pub mod collections;
pub mod memory;
pub mod reader;
pub mod time;

// Re-export collection types for convenience
pub use collections::{HashMap, HashSet};
pub use reader::{JournalReader, ReaderError, ReaderFactory, SeqnumInfo};
