//! Client-facing signaling gateway

mod connection;
pub mod identity;
mod server;

pub use connection::ClientConnection;
pub use server::{router, serve};
