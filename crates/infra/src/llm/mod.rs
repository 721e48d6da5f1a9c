//! LLM boundary
//!
//! [`client`] speaks the generation wire protocol; [`service`] wraps a
//! caller with the resilience decorators, input screening, auditing,
//! and usage accounting.

pub mod client;
pub mod service;

pub use client::{GenerateReply, LlmCaller, LlmClient};
pub use service::{GenerateOutcome, HealthStatus, LlmService};
