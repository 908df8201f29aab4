//! # Fleethub
//!
//! Fleethub is a coordination hub for a fleet of autonomous software agents
//! (and human operators) working on a shared codebase. Agents register
//! presence, exchange group chat, claim exclusive work, pick up and complete
//! tasks, hand off in-progress work with full context, and persist their own
//! per-agent working state.
//!
//! ## Architecture
//!
//! The system is composed of three stateful singletons, each a single-writer
//! actor with its own embedded SQLite storage:
//! - **Coordinator**: the team-wide registry (agents, chat, tasks, zones,
//!   claims, handoffs) plus the onboarding and session-resume aggregators
//! - **AgentState**: one per agent — checkpoints, direct messages, memory,
//!   work traces, escalation detection, soul progression, shadow monitoring
//! - **Lock**: one per resource path — a TTL-bounded exclusive lock with
//!   timer-driven automatic release
//!
//! A real-time push channel fans state changes out to every connected
//! participant over WebSocket.

/// Per-agent state singletons (checkpoints, traces, souls, shadows)
pub mod agent;
/// HTTP API server and endpoints
pub mod api;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Team-wide coordination singleton
pub mod coordinator;
/// Error types and handling
pub mod error;
/// Per-resource TTL locks
pub mod lock;
/// Real-time push channel (publish/subscribe)
pub mod push;
/// Filesystem layout for per-singleton databases
pub mod storage;

#[cfg(test)]
mod tests;

pub use error::{HubError, Result};
