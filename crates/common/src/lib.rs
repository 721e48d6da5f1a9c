//! Common utilities shared across DeskRelay crates.
//!
//! The heart of this crate is the [`resilience`] module: the circuit
//! breaker, retry policy, and fixed-window rate limiter that every
//! DeskRelay service wraps around its outbound LLM and tool calls.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;
