//! # DeskRelay Infrastructure
//!
//! Infrastructure collaborators around the resilience core:
//! - LLM HTTP client and the composed service facade
//! - Tool-call RPC client (JSON-RPC-shaped `tools/call` envelope)
//! - File-backed service registry with health-probing discovery
//! - Audit and usage-metrics sinks (append-only JSON lines)
//! - Configuration loading and tracing setup
//!
//! This crate contains all the "impure" code (HTTP, file I/O); the
//! resilience patterns in `deskrelay-common` stay pure decorators.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod llm;
pub mod observability;
pub mod rpc;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use config::{LlmConfig, ServiceConfig};
pub use discovery::ServiceRegistry;
pub use errors::InfraError;
pub use llm::{GenerateOutcome, GenerateReply, HealthStatus, LlmCaller, LlmClient, LlmService};
pub use rpc::ToolCallClient;
