pub mod broker;
pub mod config;
pub mod context;
pub mod formatter;
pub mod poller;
pub mod router;
pub mod session_bridge;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use broker::*;
pub use config::*;
pub use context::*;
pub use poller::*;
pub use router::*;
pub use session_bridge::*;
