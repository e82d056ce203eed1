//! Policy Pipeline - optional validation and profiling passes over a result
//!
//! Both passes read the result frame and produce side reports; neither mutates it.

pub mod pipeline;
pub mod profile;
pub mod validation;

pub use pipeline::{PipelineOutcome, PolicyPipeline};
pub use profile::{ColumnProfile, ProfileReport, Profiler};
pub use validation::{FieldValidation, PolicyEvaluator, RuleOutcome, RulePolicyEvaluator, ValidationReport};

use crate::request::FieldPolicy;

/// One policy per field; a later policy for a field replaces an earlier one.
/// Fields keep the position of their first appearance.
pub fn effective_policies(policies: &[FieldPolicy]) -> Vec<&FieldPolicy> {
    let mut effective: Vec<&FieldPolicy> = Vec::with_capacity(policies.len());
    for policy in policies {
        match effective.iter_mut().find(|p| p.field_name == policy.field_name) {
            Some(slot) => *slot = policy,
            None => effective.push(policy),
        }
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ValidationRule;

    #[test]
    fn test_later_policy_overrides_earlier() {
        let policies = vec![
            FieldPolicy::new("a", vec![ValidationRule::NotNull]),
            FieldPolicy::new("b", vec![ValidationRule::Unique]),
            FieldPolicy::new("a", vec![ValidationRule::Unique]),
        ];
        let effective = effective_policies(&policies);
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].field_name, "a");
        assert_eq!(effective[0].validation, vec![ValidationRule::Unique]);
        assert_eq!(effective[1].field_name, "b");
    }
}
