//! Transform Request - the inbound wire contract
//!
//! A request names a script, the datasources it reads, an optional parent step to
//! build upon, the field policies to validate against and the window of rows to
//! return. Field names on the wire are camelCase.

use crate::error::{Result, TransformError};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Request to execute a transformation script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    /// Return immediately with a result reference instead of waiting
    #[serde(rename = "async", default)]
    pub is_async: bool,

    /// Tabular sources bound into the script namespace, in order
    #[serde(default)]
    pub datasources: Vec<Datasource>,

    #[serde(default = "default_true")]
    pub do_validate: bool,

    #[serde(default)]
    pub do_profile: bool,

    /// Previous transformation step this script builds upon
    #[serde(default)]
    pub parent: Option<Parent>,

    #[serde(default)]
    pub policies: Vec<FieldPolicy>,

    pub script: String,

    #[serde(default)]
    pub page_spec: Option<PageSpec>,
}

/// Reference to a previously computed transformation step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Parent {
    #[serde(default)]
    pub script: Option<String>,

    /// Table name of a cached materialization
    #[serde(default)]
    pub table: Option<String>,
}

impl Parent {
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            script: None,
            table: Some(table.into()),
        }
    }

    pub fn from_script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            table: None,
        }
    }

    /// Table reference, if populated
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Script, if populated
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Parquet,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(SourceFormat::Csv),
            "parquet" | "pq" => Some(SourceFormat::Parquet),
            _ => None,
        }
    }
}

/// Descriptor of a readable tabular source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datasource {
    /// Name under which the script references the source
    pub name: String,

    /// File location; relative paths resolve under the data directory.
    /// When absent the source is looked up among registered frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SourceFormat>,
}

impl Datasource {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            format: None,
        }
    }

    pub fn file(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: Some(location.into()),
            format: None,
        }
    }
}

/// Per-column validation rules and profiling switch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldPolicy {
    pub field_name: String,

    #[serde(default)]
    pub validation: Vec<ValidationRule>,

    /// Include the column in the profile report
    #[serde(default = "default_true")]
    pub profile: bool,
}

impl FieldPolicy {
    pub fn new(field_name: impl Into<String>, validation: Vec<ValidationRule>) -> Self {
        Self {
            field_name: field_name.into(),
            validation,
            profile: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValidationRule {
    NotNull,
    Unique,
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Pattern {
        regex: String,
    },
    AllowedValues {
        values: Vec<serde_json::Value>,
    },
}

/// Window over the result rows
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSpec {
    #[serde(default)]
    pub offset: i64,

    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageSpec {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.offset < 0 {
            return Err(TransformError::RequestInvalid(format!(
                "pageSpec.offset must be >= 0, got {}",
                self.offset
            )));
        }
        if let Some(limit) = self.limit {
            if limit <= 0 {
                return Err(TransformError::RequestInvalid(format!(
                    "pageSpec.limit must be > 0, got {}",
                    limit
                )));
            }
        }
        Ok(())
    }

    /// `(offset, limit)` with the default applied for a missing limit
    pub fn window(&self, default_limit: usize) -> (usize, usize) {
        let offset = self.offset.max(0) as usize;
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .map(|l| l as usize)
            .unwrap_or(default_limit);
        (offset, limit)
    }
}

impl TransformRequest {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            is_async: false,
            datasources: Vec::new(),
            do_validate: true,
            do_profile: false,
            parent: None,
            policies: Vec::new(),
            script: script.into(),
            page_spec: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TransformError::RequestInvalid(e.to_string()))
    }

    pub fn with_datasource(mut self, datasource: Datasource) -> Self {
        self.datasources.push(datasource);
        self
    }

    pub fn with_parent(mut self, parent: Parent) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_page(mut self, page_spec: PageSpec) -> Self {
        self.page_spec = Some(page_spec);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn validate_results(mut self, do_validate: bool) -> Self {
        self.do_validate = do_validate;
        self
    }

    pub fn profile_results(mut self, do_profile: bool) -> Self {
        self.do_profile = do_profile;
        self
    }

    /// Checks run before any resolution; failures here are never cached.
    pub fn validate(&self) -> Result<()> {
        if self.script.trim().is_empty() {
            return Err(TransformError::RequestInvalid("script must not be empty".to_string()));
        }
        if let Some(parent) = &self.parent {
            if parent.table().is_none() && parent.script().is_none() {
                return Err(TransformError::ParentUnresolvable(
                    "parent must name a table or carry a script".to_string(),
                ));
            }
        }
        if let Some(page_spec) = &self.page_spec {
            page_spec.validate()?;
        }
        Ok(())
    }
}
