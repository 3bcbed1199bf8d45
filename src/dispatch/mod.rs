//! JSON-RPC + tool-call transport: wire envelope, auth, method routing,
//! the HTTP surface, and the parallel tool-call surface.

pub mod auth;
pub mod http;
pub mod methods;
pub mod toolcall;
pub mod wire;
