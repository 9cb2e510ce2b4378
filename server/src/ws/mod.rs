pub mod actor;
pub mod handler;
pub mod limiter;
pub mod outbound;
pub mod protocol;
pub mod registry;
