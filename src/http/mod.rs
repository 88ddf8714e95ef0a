//! HTTP side of the gateway: chat websocket, pages and static assets

pub mod pages;
pub mod server;
pub mod ws;

pub use server::{HttpConfig, HttpServer, HttpState};
