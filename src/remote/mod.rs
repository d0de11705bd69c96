//! A [`Backend`](crate::backend::Backend) exposed over HTTP, and the client
//! that consumes one. Lets the record store run against a backend hosted by
//! another node.

pub mod api;
pub mod client;
pub mod types;

pub use api::{backend_routes, serve_backend};
pub use client::HttpBackend;
