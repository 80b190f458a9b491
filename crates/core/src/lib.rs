//! Chat and negotiation engine for haggle.
//!
//! The services here are shared by the HTTP API and the streaming gateway;
//! [`ChatEngine`] wires them together over one database connection.

pub mod engine;
pub mod services;

pub use engine::ChatEngine;
pub use services::*;
