// Token-authenticated JSON REST endpoint with a WebSocket push channel.

mod auth;
mod client;

pub use client::HttpEndpoint;
