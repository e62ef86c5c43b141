//! Durable storage adapters for the snapshot cache and task registry.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
