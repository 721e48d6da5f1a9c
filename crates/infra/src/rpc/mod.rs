//! Tool-call RPC boundary

pub mod client;

pub use client::ToolCallClient;
