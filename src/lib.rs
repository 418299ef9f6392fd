//! Tally - Payment webhook reconciliation for a multi-tenant coaching platform
//!
//! This library provides the core functionality for the tally reconciliation
//! engine: the transaction ledger, the webhook dedup store, gateway adapters,
//! credential resolution, and the post-payment orchestrator.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod gateways;
pub mod handlers;
pub mod id;
pub mod models;
pub mod notify;
pub mod reconcile;
