pub mod endpoint;
pub mod notifier;
pub mod queue;
pub mod webhook;

pub use endpoint::*;
pub use notifier::*;
pub use queue::*;
pub use webhook::*;
