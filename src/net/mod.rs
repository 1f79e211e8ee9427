//! Network primitives: request/response types and the injected fetch capability.

mod client;
mod types;

pub use client::{HttpNetwork, Network, NetworkError, OfflineNetwork};
pub use types::{Request, Response};
