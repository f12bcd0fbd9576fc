pub mod analysis;
pub mod memory;

pub use analysis::HttpAnalysisBackend;
pub use memory::{MemoryIdentityProvider, MemoryObjectStore, MemoryProfileStore};
