pub mod access;
pub mod error;
pub mod quote;
pub mod task;
pub mod wallet;

pub use access::*;
pub use error::*;
pub use quote::*;
pub use task::*;
pub use wallet::*;

/// The platform's single unit of value (shrimp-rice).
pub type Credits = u64;

pub type AccountId = uuid::Uuid;
pub type TaskId = uuid::Uuid;
pub type QuoteId = uuid::Uuid;
pub type ListingId = uuid::Uuid;
