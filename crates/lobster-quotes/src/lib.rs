pub mod engine;
pub mod store;

pub use engine::*;
pub use store::*;
