pub mod cmd;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod notify;
pub mod persist;
pub mod protocol;
pub mod server;
pub mod session;
pub mod throttle;
pub mod tracer;

pub use error::{Error, Result};
