//! Workflow Engine - Per-Frame State Machine
//!
//! ## Responsibilities
//!
//! - Drive one frame through Validate -> Classify -> Reconcile
//! - Own per-request state and error capture
//! - Surface a terminal Complete/Failed state to the consumer
//!
//! One pass per request, no re-entrancy, no per-stage retries. A failed
//! stage short-circuits; a reconciliation warning does not.

use crate::classifier::Classifier;
use crate::error::Error;
use crate::frame_cache::FrameCache;
use crate::models::{AnalysisRequest, AnalysisResult};
use crate::reconciler::ReconcileLoop;
use serde::Serialize;
use std::sync::Arc;

/// Stage the workflow is in; Complete and Failed are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Validating,
    Classifying,
    Reconciling,
    Complete,
    Failed,
}

/// Per-request workflow state.
///
/// An immutable value: each stage consumes the previous state and returns a
/// new one. Owned by exactly one workflow execution.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub request: AnalysisRequest,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    /// Non-fatal reconciliation warning (loop error or iteration cap)
    pub warning: Option<String>,
    pub analysis_complete: bool,
    pub reconciliation_complete: bool,
    pub stage: WorkflowStage,
}

impl WorkflowState {
    fn new(request: AnalysisRequest) -> Self {
        Self {
            request,
            result: None,
            error: None,
            warning: None,
            analysis_complete: false,
            reconciliation_complete: false,
            stage: WorkflowStage::Validating,
        }
    }

    fn validated(self) -> Self {
        Self {
            stage: WorkflowStage::Classifying,
            ..self
        }
    }

    fn classified(self, result: AnalysisResult) -> Self {
        Self {
            result: Some(result),
            analysis_complete: true,
            stage: WorkflowStage::Reconciling,
            ..self
        }
    }

    fn completed(self, warning: Option<String>) -> Self {
        Self {
            warning,
            reconciliation_complete: true,
            stage: WorkflowStage::Complete,
            ..self
        }
    }

    fn failed(self, error: Error) -> Self {
        Self {
            error: Some(error.to_string()),
            stage: WorkflowStage::Failed,
            ..self
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, WorkflowStage::Complete | WorkflowStage::Failed)
    }

    pub fn is_failed(&self) -> bool {
        self.stage == WorkflowStage::Failed
    }
}

/// Validate -> Classify -> Reconcile, once per ingested frame
pub struct WorkflowEngine {
    classifier: Arc<dyn Classifier>,
    reconciler: ReconcileLoop,
    frame_cache: Arc<FrameCache>,
}

impl WorkflowEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        reconciler: ReconcileLoop,
        frame_cache: Arc<FrameCache>,
    ) -> Self {
        Self {
            classifier,
            reconciler,
            frame_cache,
        }
    }

    /// Run one frame to a terminal state. Never panics, never retries.
    pub async fn run(&self, request: AnalysisRequest) -> WorkflowState {
        let state = WorkflowState::new(request);

        let (state, jpeg) = match self.validate(state).await {
            Ok(pair) => pair,
            Err((state, e)) => {
                tracing::warn!(
                    location = %state.request.location,
                    error = %e,
                    "Frame failed validation"
                );
                return state.failed(e);
            }
        };

        let (state, result) = match self.classify(state, &jpeg).await {
            Ok(pair) => pair,
            Err((state, e)) => {
                tracing::warn!(
                    location = %state.request.location,
                    error = %e,
                    "Classification failed, no ledger mutation attempted"
                );
                return state.failed(e);
            }
        };

        self.reconcile(state, result).await
    }

    async fn validate(
        &self,
        state: WorkflowState,
    ) -> Result<(WorkflowState, Vec<u8>), (WorkflowState, Error)> {
        let jpeg = match self.frame_cache.normalize(&state.request.image) {
            Ok(jpeg) => jpeg,
            Err(e) => return Err((state, e)),
        };

        // Persistence failures must not block analysis
        if let Err(e) = self.frame_cache.persist(&jpeg).await {
            tracing::warn!(error = %e, "Failed to persist frame, continuing");
        }

        Ok((state.validated(), jpeg))
    }

    async fn classify(
        &self,
        state: WorkflowState,
        jpeg: &[u8],
    ) -> Result<(WorkflowState, AnalysisResult), (WorkflowState, Error)> {
        let result = match self
            .classifier
            .classify(jpeg, &state.request.timestamp, &state.request.location)
            .await
        {
            Ok(result) => result,
            Err(e) => return Err((state, e)),
        };

        // Mock classifiers may skip bound checks; enforce them here too
        if let Err(e) = result.validate() {
            return Err((state, e));
        }

        tracing::info!(
            location = %state.request.location,
            timestamp = %state.request.timestamp,
            is_problem = result.is_problem,
            incident_type = %result.incident_type,
            severity = %result.severity,
            confidence = result.confidence,
            "Frame classified"
        );

        let state = state.classified(result.clone());
        Ok((state, result))
    }

    async fn reconcile(&self, state: WorkflowState, result: AnalysisResult) -> WorkflowState {
        let report = self.reconciler.reconcile(&state.request, &result).await;

        if let Some(ref warning) = report.warning {
            tracing::warn!(
                location = %state.request.location,
                warning = %warning,
                iterations = report.iterations,
                "Reconciliation finished with warning"
            );
        } else {
            tracing::debug!(
                location = %state.request.location,
                iterations = report.iterations,
                actions = report.actions_executed,
                "Reconciliation complete"
            );
        }

        state.completed(report.warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::ledger::MemoryIncidentStore;
    use crate::models::{IncidentType, Severity};
    use crate::reconciler::{ReconcileAction, ReconcileContext, ReconcileDecider};
    use async_trait::async_trait;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn tiny_jpeg() -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(8, 8, |_, _| Rgb([40, 90, 140]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    struct FixedClassifier(AnalysisResult);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _: &[u8], _: &str, _: &str) -> Result<AnalysisResult> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, _: &[u8], _: &str, _: &str) -> Result<AnalysisResult> {
            Err(Error::Classification(
                "unparsable judgment: expected value".to_string(),
            ))
        }
    }

    struct SilentDecider;

    #[async_trait]
    impl ReconcileDecider for SilentDecider {
        async fn decide(&self, _: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
            Ok(vec![])
        }
    }

    struct BrokenDecider;

    #[async_trait]
    impl ReconcileDecider for BrokenDecider {
        async fn decide(&self, _: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
            Err(Error::Reconciliation("model emitted garbage".to_string()))
        }
    }

    fn fire_result() -> AnalysisResult {
        AnalysisResult {
            is_problem: true,
            incident_type: IncidentType::Fire,
            severity: Severity::High,
            confidence: 0.9,
            description: "fire".to_string(),
            recommended_action: "respond".to_string(),
            people_count: None,
            additional_concerns: vec![],
        }
    }

    fn request(image: Vec<u8>) -> AnalysisRequest {
        AnalysisRequest::new(
            image,
            Some("2026-08-29 10:00:00".to_string()),
            Some("Gate-1".to_string()),
            "org-1".to_string(),
        )
        .unwrap()
    }

    fn engine(
        classifier: Arc<dyn Classifier>,
        decider: Arc<dyn ReconcileDecider>,
        store: Arc<MemoryIncidentStore>,
    ) -> WorkflowEngine {
        WorkflowEngine::new(
            classifier,
            ReconcileLoop::new(store, decider),
            Arc::new(FrameCache::new(false, PathBuf::from("/tmp/unused"))),
        )
    }

    #[tokio::test]
    async fn undecodable_frame_fails_validation() {
        let store = Arc::new(MemoryIncidentStore::new());
        let engine = engine(
            Arc::new(FixedClassifier(fire_result())),
            Arc::new(SilentDecider),
            store.clone(),
        );

        let state = engine.run(request(b"not an image".to_vec())).await;

        assert!(state.is_failed());
        assert!(state.error.as_deref().unwrap().contains("load image"));
        assert!(!state.analysis_complete);
        assert_eq!(store.recorded_calls(), 0, "ledger must stay untouched");
    }

    #[tokio::test]
    async fn classification_failure_skips_ledger() {
        let store = Arc::new(MemoryIncidentStore::new());
        let engine = engine(
            Arc::new(FailingClassifier),
            Arc::new(SilentDecider),
            store.clone(),
        );

        let state = engine.run(request(tiny_jpeg())).await;

        assert!(state.is_failed());
        assert!(state.result.is_none());
        assert_eq!(store.recorded_calls(), 0, "ledger must stay untouched");
    }

    #[tokio::test]
    async fn out_of_bounds_result_fails_classification() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mut bad = fire_result();
        bad.confidence = 3.0;
        let engine = engine(
            Arc::new(FixedClassifier(bad)),
            Arc::new(SilentDecider),
            store.clone(),
        );

        let state = engine.run(request(tiny_jpeg())).await;

        assert!(state.is_failed());
        assert_eq!(store.recorded_calls(), 0);
    }

    #[tokio::test]
    async fn successful_run_reaches_complete() {
        let store = Arc::new(MemoryIncidentStore::new());
        let engine = engine(
            Arc::new(FixedClassifier(fire_result())),
            Arc::new(SilentDecider),
            store,
        );

        let state = engine.run(request(tiny_jpeg())).await;

        assert_eq!(state.stage, WorkflowStage::Complete);
        assert!(state.analysis_complete);
        assert!(state.reconciliation_complete);
        assert!(state.error.is_none());
        assert!(state.warning.is_none());
    }

    #[tokio::test]
    async fn reconciliation_warning_does_not_fail_workflow() {
        let store = Arc::new(MemoryIncidentStore::new());
        let engine = engine(
            Arc::new(FixedClassifier(fire_result())),
            Arc::new(BrokenDecider),
            store,
        );

        let state = engine.run(request(tiny_jpeg())).await;

        assert_eq!(state.stage, WorkflowStage::Complete);
        assert!(state.warning.is_some());
        assert!(state.reconciliation_complete);
    }
}
