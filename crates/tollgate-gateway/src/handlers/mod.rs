//! HTTP request handlers.
//!
//! `/health` is served by the gateway itself; every other path falls through
//! to the proxy handler.

pub mod health;
pub mod proxy;
pub mod ws;
