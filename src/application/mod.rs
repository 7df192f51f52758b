//! Application layer containing the payment orchestration logic.
//!
//! `PaymentOrchestrator` is the entry point. It owns the identity registry,
//! the flow ledger adapter and the stream and schedule managers, and routes
//! every call through the matching authorization check.

pub mod guard;
pub mod ledger;
pub mod orchestrator;
pub mod registry;
pub mod schedules;
pub mod streams;
pub mod views;
