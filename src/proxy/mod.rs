// Proxy module - forwards authenticated API calls to a healthy backend
//
// Request path:
//   auth middleware (KeyCache) -> forward handler -> LoadBalancer::pick
//   -> upstream call -> buffered or SSE relay -> usage -> UsageCollector
//
// Accounting never blocks the client: usage is handed off with a
// non-blocking send once the response body is complete.

pub(crate) mod error;
mod handlers;
pub(crate) mod helpers;
mod request_log;
mod server;
pub(crate) mod sse;
mod state;
pub(crate) mod tokens;

pub use error::ProxyError;
pub use server::{build_client, build_router, serve};
pub use state::ProxyState;
