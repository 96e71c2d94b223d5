pub mod catalog;
pub mod engine;
pub mod notify;
pub mod store;

pub use catalog::*;
pub use engine::*;
pub use notify::*;
pub use store::*;
