pub mod entry;
pub mod file;
pub mod snapshot;
pub mod traits;

#[cfg(feature = "memory-ledger")]
pub mod memory;

pub use entry::*;
pub use file::*;
pub use snapshot::*;
pub use traits::*;

#[cfg(feature = "memory-ledger")]
pub use memory::*;
