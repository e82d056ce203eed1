//! Policy pipeline orchestration
//!
//! Validation and profiling run concurrently on the blocking pool. A pass that
//! fails on its own terms is recorded in its report and the result stays usable;
//! only compute engine faults (or a panicked pass) are fatal.

use crate::error::{Result, TransformError};
use crate::observability::EngineStats;
use crate::policy::profile::{ProfileReport, Profiler};
use crate::policy::validation::{PolicyEvaluator, ValidationReport};
use crate::request::FieldPolicy;
use polars::prelude::DataFrame;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub validation: Option<ValidationReport>,
    pub profile: Option<ProfileReport>,
}

pub struct PolicyPipeline {
    evaluator: Arc<dyn PolicyEvaluator>,
    profiler: Profiler,
    stats: Arc<EngineStats>,
}

impl PolicyPipeline {
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, stats: Arc<EngineStats>) -> Self {
        Self {
            evaluator,
            profiler: Profiler::new(),
            stats,
        }
    }

    pub async fn validate(&self, frame: &DataFrame, policies: &[FieldPolicy]) -> Result<ValidationReport> {
        let evaluator = self.evaluator.clone();
        let frame = frame.clone();
        let policies = policies.to_vec();
        let joined = tokio::task::spawn_blocking(move || evaluator.evaluate(&frame, &policies)).await;
        self.settle("validation", joined, ValidationReport::failed)
    }

    pub async fn profile(&self, frame: &DataFrame, policies: &[FieldPolicy]) -> Result<ProfileReport> {
        let profiler = self.profiler.clone();
        let frame = frame.clone();
        let policies = policies.to_vec();
        let joined = tokio::task::spawn_blocking(move || profiler.profile(&frame, &policies)).await;
        self.settle("profiling", joined, ProfileReport::failed)
    }

    /// Run the passes selected by the request flags.
    pub async fn run(
        &self,
        frame: &DataFrame,
        policies: &[FieldPolicy],
        do_validate: bool,
        do_profile: bool,
    ) -> Result<PipelineOutcome> {
        let validation = async {
            if do_validate {
                self.validate(frame, policies).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let profile = async {
            if do_profile {
                self.profile(frame, policies).await.map(Some)
            } else {
                Ok(None)
            }
        };

        let (validation, profile) = tokio::join!(validation, profile);
        Ok(PipelineOutcome {
            validation: validation?,
            profile: profile?,
        })
    }

    fn settle<R>(
        &self,
        stage: &str,
        joined: std::result::Result<Result<R>, JoinError>,
        failed: impl FnOnce(String) -> R,
    ) -> Result<R> {
        match joined {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(TransformError::Execution(message))) => Err(TransformError::Execution(message)),
            Ok(Err(e)) => {
                warn!(stage, error = %e, "Policy pass failed, result remains usable");
                self.stats.record_partial_failure();
                Ok(failed(e.to_string()))
            }
            Err(e) => Err(TransformError::Execution(format!("{} pass aborted: {}", stage, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::validation::RulePolicyEvaluator;
    use crate::request::ValidationRule;
    use polars::prelude::*;

    struct BrokenEngineEvaluator;

    impl PolicyEvaluator for BrokenEngineEvaluator {
        fn evaluate(&self, _frame: &DataFrame, _policies: &[FieldPolicy]) -> Result<ValidationReport> {
            Err(TransformError::Execution("engine fault".to_string()))
        }
    }

    fn pipeline(evaluator: Arc<dyn PolicyEvaluator>) -> PolicyPipeline {
        PolicyPipeline::new(evaluator, Arc::new(EngineStats::new()))
    }

    fn frame() -> DataFrame {
        df!["id" => [1i64, 2, 3]].unwrap()
    }

    #[tokio::test]
    async fn test_flags_select_passes() {
        let pipeline = pipeline(Arc::new(RulePolicyEvaluator::default()));
        let outcome = pipeline.run(&frame(), &[], false, true).await.unwrap();
        assert!(outcome.validation.is_none());
        assert_eq!(outcome.profile.unwrap().row_count, 3);
    }

    #[tokio::test]
    async fn test_policy_failure_is_partial() {
        let pipeline = pipeline(Arc::new(RulePolicyEvaluator::default()));
        let policies = vec![FieldPolicy::new("missing", vec![ValidationRule::NotNull])];
        let outcome = pipeline.run(&frame(), &policies, true, true).await.unwrap();

        let validation = outcome.validation.unwrap();
        assert!(validation.is_failed());
        assert!(validation.failure.unwrap().contains("missing"));
        assert!(!outcome.profile.unwrap().is_failed());
        assert_eq!(pipeline.stats.snapshot().partial_failures, 1);
    }

    #[tokio::test]
    async fn test_engine_fault_is_fatal() {
        let pipeline = pipeline(Arc::new(BrokenEngineEvaluator));
        let err = pipeline.run(&frame(), &[], true, false).await.unwrap_err();
        assert_eq!(err, TransformError::Execution("engine fault".to_string()));
    }
}
