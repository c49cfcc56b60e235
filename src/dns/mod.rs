//! DNS responder service
//!
//! Forges A/AAAA answers for allow-listed suffixes; forwards everything
//! else to the configured upstreams with a SERVFAIL fallback.

mod responder;
mod upstream;

pub use responder::DnsResponder;
pub use upstream::{servfail, Upstreams};
