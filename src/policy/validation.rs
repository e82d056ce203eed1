//! Field validation
//!
//! Rules mirror the usual data quality constraints: nullability, uniqueness,
//! numeric range, string format and allowed values.

use crate::error::{Result, TransformError};
use crate::execution::any_value_to_json;
use crate::policy::effective_policies;
use crate::request::{FieldPolicy, ValidationRule};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field-policy evaluation API
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate policies against a result frame.
    ///
    /// Problems with the policies themselves (unknown column, bad pattern) should be
    /// reported as `TransformError::Validation`; `TransformError::Execution` is
    /// reserved for compute engine faults and fails the whole execution.
    fn evaluate(&self, frame: &DataFrame, policies: &[FieldPolicy]) -> Result<ValidationReport>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub rule: ValidationRule,
    pub checked_rows: usize,
    pub invalid_rows: usize,
    /// First offending row indices
    pub sample_rows: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    pub field_name: String,
    pub outcomes: Vec<RuleOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub fields: Vec<FieldValidation>,
    pub total_rows: usize,
    pub valid_rows: usize,
    /// Rows failing at least one rule
    pub invalid_rows: usize,
    /// Set when the pass itself could not complete
    pub failure: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ValidationReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            failure: Some(message.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Built-in evaluator for [`ValidationRule`]s
#[derive(Debug, Clone)]
pub struct RulePolicyEvaluator {
    sample_size: usize,
}

impl RulePolicyEvaluator {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }
}

impl Default for RulePolicyEvaluator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PolicyEvaluator for RulePolicyEvaluator {
    fn evaluate(&self, frame: &DataFrame, policies: &[FieldPolicy]) -> Result<ValidationReport> {
        let total_rows = frame.height();
        let mut invalid = vec![false; total_rows];
        let mut fields = Vec::new();

        for policy in effective_policies(policies) {
            if policy.validation.is_empty() {
                continue;
            }
            let series = frame
                .column(&policy.field_name)
                .map_err(|_| TransformError::Validation(format!("Column not found: {}", policy.field_name)))?;

            let mut outcomes = Vec::with_capacity(policy.validation.len());
            for rule in &policy.validation {
                let violations = rule_violations(series, rule)?;
                let mut sample_rows = Vec::new();
                let mut invalid_rows = 0;
                for (idx, violated) in violations.iter().enumerate() {
                    if *violated {
                        invalid_rows += 1;
                        invalid[idx] = true;
                        if sample_rows.len() < self.sample_size {
                            sample_rows.push(idx);
                        }
                    }
                }
                outcomes.push(RuleOutcome {
                    rule: rule.clone(),
                    checked_rows: total_rows,
                    invalid_rows,
                    sample_rows,
                });
            }

            fields.push(FieldValidation {
                field_name: policy.field_name.clone(),
                outcomes,
            });
        }

        let invalid_rows = invalid.iter().filter(|v| **v).count();
        Ok(ValidationReport {
            fields,
            total_rows,
            valid_rows: total_rows - invalid_rows,
            invalid_rows,
            failure: None,
            completed_at: Utc::now(),
        })
    }
}

/// Per-row violation flags for one rule
fn rule_violations(series: &Series, rule: &ValidationRule) -> Result<Vec<bool>> {
    match rule {
        ValidationRule::NotNull => (0..series.len())
            .map(|idx| -> Result<bool> { Ok(series.get(idx)?.is_null()) })
            .collect(),

        ValidationRule::Unique => {
            let keys = (0..series.len())
                .map(|idx| -> Result<Option<String>> {
                    let value = series.get(idx)?;
                    Ok(if value.is_null() {
                        None
                    } else {
                        Some(any_value_to_json(&value).to_string())
                    })
                })
                .collect::<Result<Vec<Option<String>>>>()?;

            let mut counts: HashMap<&str, usize> = HashMap::new();
            for key in keys.iter().flatten() {
                *counts.entry(key.as_str()).or_insert(0) += 1;
            }
            Ok(keys
                .iter()
                .map(|key| key.as_deref().map_or(false, |k| counts.get(k).copied().unwrap_or(0) > 1))
                .collect())
        }

        ValidationRule::Range { min, max } => {
            if !series.dtype().is_numeric() {
                return Err(TransformError::Validation(format!(
                    "Range rule requires a numeric column, {} is {}",
                    series.name(),
                    series.dtype()
                )));
            }
            let values = series.cast(&DataType::Float64)?;
            let values = values.f64()?;
            Ok(values
                .into_iter()
                .map(|value| match value {
                    Some(v) => min.map_or(false, |m| v < m) || max.map_or(false, |m| v > m),
                    None => false,
                })
                .collect())
        }

        ValidationRule::Pattern { regex } => {
            let pattern = Regex::new(regex)
                .map_err(|e| TransformError::Validation(format!("Invalid pattern {:?}: {}", regex, e)))?;
            let values = series.str().map_err(|_| {
                TransformError::Validation(format!(
                    "Pattern rule requires a string column, {} is {}",
                    series.name(),
                    series.dtype()
                ))
            })?;
            Ok(values
                .into_iter()
                .map(|value| value.map_or(false, |s| !pattern.is_match(s)))
                .collect())
        }

        ValidationRule::AllowedValues { values } => (0..series.len())
            .map(|idx| -> Result<bool> {
                let value = series.get(idx)?;
                if value.is_null() {
                    return Ok(false);
                }
                let json = any_value_to_json(&value);
                Ok(!values.iter().any(|allowed| json_values_equal(allowed, &json)))
            })
            .collect(),
    }
}

fn json_values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
