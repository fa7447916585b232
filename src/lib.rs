//! Triage Server Library
//!
//! Security-frame triage pipeline
//!
//! ## Architecture (7 Components)
//!
//! 1. Gateway - HTTP frame submission and status endpoints
//! 2. FrameConsumer - Broker ingestion loop
//! 3. FrameCache - Image validation, normalization, persistence
//! 4. Classifier - Vision-model frame judgment
//! 5. WorkflowEngine - Validate -> Classify -> Reconcile state machine
//! 6. ReconcileLoop - Bounded tool-calling ledger reconciliation
//! 7. IncidentStore - Deduplicated incident ledger
//!
//! ## Design Principles
//!
//! - One frame, one workflow execution, one terminal state
//! - Ledger mutations are idempotent at the identity key
//! - Model failures degrade to warnings, never crash the pipeline

pub mod classifier;
pub mod consumer;
pub mod error;
pub mod frame_cache;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod reconciler;
pub mod state;
pub mod workflow;

pub use error::{Error, Result};
pub use state::AppState;
