//! EvalNet Types - Canonical domain types for validator coordination
//!
//! This crate contains the foundational types shared by every EvalNet crate,
//! with zero dependencies on other evalnet crates:
//!
//! - Identity types (VersionId, EvaluationId, MinerHotkey, ValidatorHotkey)
//! - Agent version lifecycle (AgentStatus and its transition table)
//! - Evaluation work items and validator scores
//! - The consensus output (TopAgentRecord)
//! - The validator websocket wire protocol
//!
//! # Lifecycle
//!
//! ```text
//! awaiting_screening → screening → evaluating → approved
//!          ↑                                        │
//!          └────────────── re-evaluation ───────────┘
//!
//! screening | evaluating → rejected
//! any state except banned → banned
//! ```

pub mod identity;
pub mod agent;
pub mod evaluation;
pub mod wire;

pub use identity::*;
pub use agent::*;
pub use evaluation::*;
pub use wire::*;

/// Version of the EvalNet wire schema
pub const PROTOCOL_VERSION: &str = "0.1.0";
