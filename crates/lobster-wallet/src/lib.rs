pub mod commission;
pub mod service;

pub use commission::*;
pub use service::*;
