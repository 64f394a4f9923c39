//! Document store backends
//!
//! [`DocumentDatabase`] and [`DocumentCollection`] are the seam between the
//! ODM and a concrete store. [`MemoryDatabase`] executes pipelines in process.

pub mod core;
pub mod memory;

pub use self::core::{Document, DocumentCollection, DocumentDatabase, UpdateOutcome};
pub use self::memory::{MemoryCollection, MemoryDatabase};
