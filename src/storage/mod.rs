//! Local store backends.

pub mod traits;
pub mod memory;
pub mod file;

pub use traits::{LocalStore, StorageError};
pub use memory::MemoryLocalStore;
pub use file::FileLocalStore;
