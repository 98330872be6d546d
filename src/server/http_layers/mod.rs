mod requests_logging;
#[cfg(feature = "slowdown")]
mod slowdown;

pub use requests_logging::{log_requests, RequestsLoggingLevel};
#[cfg(feature = "slowdown")]
pub use slowdown::slowdown_request;
