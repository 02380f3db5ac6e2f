//! Gateway module: from an API gateway proxy event to a backend response.

pub mod envelope;
pub mod event;
pub mod filter;
pub mod handler;
pub mod proxy;
pub mod router;
pub mod server;

pub use envelope::{EnvelopeBody, ResponseEnvelope};
pub use event::{ProxyEvent, RequestContext};
pub use handler::ProxyHandler;
pub use proxy::MtlsProxy;
pub use server::Gateway;
