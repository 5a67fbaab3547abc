//! HTTP session layer

mod concurrency;
mod retry;
mod session;

pub use concurrency::*;
pub use retry::*;
pub use session::*;
