// ABOUTME: ExtractorResult and the aggregated Output keyed by extractor id.
// ABOUTME: Each Output field is an explicit result-or-error variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Highest star rating.
pub const MAX_RATING: u8 = 5;

/// Verdict of one extractor for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorResult {
    /// Star rating, 0 (worst) to 5 (best).
    pub rating: u8,
    pub explanation: String,
    /// Diagnostic data; removed unless the caller asked for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl ExtractorResult {
    /// Build a result; ratings above the maximum are clamped.
    pub fn new(rating: u8, explanation: impl Into<String>) -> Self {
        Self {
            rating: rating.min(MAX_RATING),
            explanation: explanation.into(),
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Attach a set of strings as `extra`, sorted for stable output.
    pub fn with_extra_set<I, S>(self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut items: Vec<String> = items.into_iter().map(Into::into).collect();
        items.sort();
        items.dedup();
        self.with_extra(serde_json::Value::from(items))
    }

    /// The `extra` value as a list of strings, when it is one.
    pub fn extra_strings(&self) -> Vec<String> {
        self.extra
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A field that carries an error placeholder instead of a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub code: String,
    pub message: String,
}

impl FieldError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: format!("{:?}", code),
            message: message.into(),
        }
    }
}

/// Outcome of one extractor inside an Output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOutcome {
    Result(ExtractorResult),
    Error(FieldError),
}

impl FieldOutcome {
    pub fn result(&self) -> Option<&ExtractorResult> {
        match self {
            FieldOutcome::Result(r) => Some(r),
            FieldOutcome::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FieldOutcome::Error(_))
    }
}

/// Aggregated verdicts, one entry per registered extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Output {
    pub fields: BTreeMap<String, FieldOutcome>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, outcome: FieldOutcome) {
        self.fields.insert(key.into(), outcome);
    }

    pub fn get(&self, key: &str) -> Option<&FieldOutcome> {
        self.fields.get(key)
    }

    /// Shortcut for the verdict of `key`, if it is a result.
    pub fn result(&self, key: &str) -> Option<&ExtractorResult> {
        self.get(key).and_then(FieldOutcome::result)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Outputs holding error placeholders must not be stored.
    pub fn is_cacheable(&self) -> bool {
        !self.fields.values().any(FieldOutcome::is_error)
    }

    /// Copy of the output with every `extra` removed.
    pub fn without_diagnostics(&self) -> Output {
        let fields = self
            .fields
            .iter()
            .map(|(key, outcome)| {
                let outcome = match outcome {
                    FieldOutcome::Result(r) => FieldOutcome::Result(ExtractorResult {
                        extra: None,
                        ..r.clone()
                    }),
                    FieldOutcome::Error(e) => FieldOutcome::Error(e.clone()),
                };
                (key.clone(), outcome)
            })
            .collect();
        Output { fields }
    }
}
