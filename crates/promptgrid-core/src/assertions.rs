//! Three-layer assertion merge: dataset defaults, case overrides, and the
//! expected-output safety net.

use crate::model::{Assertion, AssertionType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Merge identity. `llm-rubric` is keyed by type alone, so a case carries at
/// most one rubric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssertionKey {
    Rubric,
    Typed(AssertionType, String),
}

impl AssertionKey {
    pub fn of(a: &Assertion) -> Self {
        match a.kind {
            AssertionType::LlmRubric => AssertionKey::Rubric,
            kind => AssertionKey::Typed(kind, a.value.clone().unwrap_or_default()),
        }
    }
}

/// A check in the external engine's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCheck {
    #[serde(rename = "type")]
    pub kind: AssertionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

impl From<&Assertion> for EngineCheck {
    fn from(a: &Assertion) -> Self {
        let value = if a.kind.takes_value() {
            Some(a.value.clone().unwrap_or_default())
        } else {
            None
        };
        EngineCheck {
            kind: a.kind,
            value,
            threshold: a.threshold,
        }
    }
}

impl From<&EngineCheck> for Assertion {
    fn from(c: &EngineCheck) -> Self {
        Assertion {
            kind: c.kind,
            value: c.value.clone(),
            threshold: c.threshold,
            description: None,
        }
    }
}

/// Produce the effective check list for one case.
///
/// Deterministic: the dataset layer fixes the initial order, case overrides
/// replace in place, new keys append, and the safety net comes last.
pub fn merge(
    dataset_assertions: &[Assertion],
    case_assertions: &[Assertion],
    expected_output: Option<&str>,
) -> Vec<EngineCheck> {
    let mut merged: IndexMap<AssertionKey, &Assertion> = IndexMap::new();
    for a in dataset_assertions {
        merged.insert(AssertionKey::of(a), a);
    }
    for a in case_assertions {
        merged.insert(AssertionKey::of(a), a);
    }

    let mut out: Vec<EngineCheck> = merged.values().map(|a| EngineCheck::from(*a)).collect();

    if let Some(expected) = expected_output.filter(|s| !s.is_empty()) {
        let covered = merged.contains_key(&AssertionKey::Typed(
            AssertionType::Contains,
            expected.to_string(),
        ));
        if !covered {
            out.push(EngineCheck {
                kind: AssertionType::Contains,
                value: Some(expected.to_string()),
                threshold: None,
            });
        }
    }
    out
}
