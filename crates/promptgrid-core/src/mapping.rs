//! Column -> variable mapping: precedence resolution, application, validation
//! and best-effort suggestion.

use crate::model::{ColumnMapping, MappingSource, Row};
use serde::{Deserialize, Serialize};

/// Synonyms tried (against lower-cased column names) when a variable has no
/// exact or case-insensitive column match.
const ALIASES: &[(&str, &[&str])] = &[
    (
        "question",
        &["query", "q", "user_query", "input", "user_input"],
    ),
    (
        "context",
        &["document", "doc", "doc_chunk", "chunk", "passage", "text"],
    ),
    (
        "answer",
        &["response", "output", "expected", "expected_output", "gold"],
    ),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingValidation {
    pub is_valid: bool,
    pub missing_variables: Vec<String>,
    pub unused_columns: Vec<String>,
    pub warnings: Vec<String>,
}

/// Pick exactly one tier: run override, else dataset default, else identity.
///
/// An empty override or default counts as absent.
pub fn resolve_with_source(
    run_mapping: Option<&ColumnMapping>,
    dataset_mapping: Option<&ColumnMapping>,
    raw_columns: &[String],
) -> (ColumnMapping, MappingSource) {
    if let Some(m) = run_mapping.filter(|m| !m.is_empty()) {
        return (m.clone(), MappingSource::RunOverride);
    }
    if let Some(m) = dataset_mapping.filter(|m| !m.is_empty()) {
        return (m.clone(), MappingSource::DatasetDefault);
    }
    let identity = raw_columns
        .iter()
        .map(|c| (c.clone(), c.clone()))
        .collect();
    (identity, MappingSource::Identity)
}

pub fn resolve(
    run_mapping: Option<&ColumnMapping>,
    dataset_mapping: Option<&ColumnMapping>,
    raw_columns: &[String],
) -> ColumnMapping {
    resolve_with_source(run_mapping, dataset_mapping, raw_columns).0
}

/// Derive bound variables from a raw row. The row itself is left untouched;
/// fields absent from the row produce no key.
pub fn apply(raw_row: &Row, mapping: &ColumnMapping) -> Row {
    let mut out = Row::with_capacity(mapping.len());
    for (raw_field, variable) in mapping {
        if let Some(v) = raw_row.get(raw_field) {
            out.insert(variable.clone(), v.clone());
        }
    }
    out
}

pub fn validate(
    mapping: &ColumnMapping,
    required_variables: &[String],
    available_columns: &[String],
) -> MappingValidation {
    let mut missing_variables = Vec::new();
    for var in required_variables {
        let produced = mapping.values().any(|v| v == var);
        if !produced && !missing_variables.contains(var) {
            missing_variables.push(var.clone());
        }
    }

    let unused_columns = available_columns
        .iter()
        .filter(|c| !mapping.contains_key(c.as_str()))
        .cloned()
        .collect();

    let mut warnings = Vec::new();
    for source in mapping.keys() {
        if available_columns.iter().any(|c| c == source) {
            continue;
        }
        let mut msg = format!("mapped column '{}' is not present in the data", source);
        if let Some(hint) = closest_column(source, available_columns) {
            msg.push_str(&format!(" (did you mean '{}'?)", hint));
        }
        warnings.push(msg);
    }

    MappingValidation {
        is_valid: missing_variables.is_empty(),
        missing_variables,
        unused_columns,
        warnings,
    }
}

fn closest_column<'a>(name: &str, columns: &'a [String]) -> Option<&'a str> {
    let target = name.to_lowercase();
    columns
        .iter()
        .map(|c| (c, strsim::jaro_winkler(&target, &c.to_lowercase())))
        .filter(|(_, score)| *score >= 0.85)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.as_str())
}

/// Best-effort mapping: exact name, then case-insensitive, then alias table.
///
/// Each variable takes at most one column and a column feeds at most one
/// variable.
pub fn suggest(available_columns: &[String], required_variables: &[String]) -> ColumnMapping {
    let mut suggested = ColumnMapping::new();
    let mut satisfied: Vec<&str> = Vec::new();

    for var in required_variables {
        if satisfied.contains(&var.as_str()) {
            continue;
        }
        let free = |col: &&String| !suggested.contains_key(col.as_str());

        let pick = available_columns
            .iter()
            .filter(free)
            .find(|c| *c == var)
            .or_else(|| {
                let lower = var.to_lowercase();
                available_columns
                    .iter()
                    .filter(free)
                    .find(|c| c.to_lowercase() == lower)
            })
            .or_else(|| alias_match(var, available_columns, &suggested));

        if let Some(col) = pick {
            suggested.insert(col.clone(), var.clone());
            satisfied.push(var.as_str());
        }
    }
    suggested
}

fn alias_match<'a>(
    var: &str,
    columns: &'a [String],
    taken: &ColumnMapping,
) -> Option<&'a String> {
    let lower = var.to_lowercase();
    let (_, aliases) = ALIASES.iter().find(|(canon, _)| *canon == lower)?;
    aliases.iter().find_map(|alias| {
        columns
            .iter()
            .find(|c| c.to_lowercase() == *alias && !taken.contains_key(c.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn run_override_wins_verbatim() {
        let run = mapping(&[("a", "x")]);
        let ds = mapping(&[("b", "y")]);
        let (m, src) = resolve_with_source(Some(&run), Some(&ds), &cols(&["a", "b"]));
        assert_eq!(m, run);
        assert_eq!(src, MappingSource::RunOverride);
    }

    #[test]
    fn dataset_default_used_when_no_override() {
        let ds = mapping(&[("q", "question")]);
        let m = resolve(None, Some(&ds), &cols(&["q", "ctx"]));
        assert_eq!(m, ds);
    }

    #[test]
    fn identity_fallback_keeps_column_order() {
        let (m, src) = resolve_with_source(None, None, &cols(&["b", "a"]));
        assert_eq!(src, MappingSource::Identity);
        assert_eq!(
            m.iter().collect::<Vec<_>>(),
            vec![
                (&"b".to_string(), &"b".to_string()),
                (&"a".to_string(), &"a".to_string())
            ]
        );
    }

    #[test]
    fn empty_override_counts_as_absent() {
        let empty = ColumnMapping::new();
        let ds = mapping(&[("q", "question")]);
        let (_, src) = resolve_with_source(Some(&empty), Some(&ds), &cols(&["q"]));
        assert_eq!(src, MappingSource::DatasetDefault);
    }

    #[test]
    fn tiers_are_never_merged() {
        let run = mapping(&[("a", "x")]);
        let ds = mapping(&[("b", "y")]);
        let m = resolve(Some(&run), Some(&ds), &cols(&["a", "b"]));
        assert!(!m.contains_key("b"));
    }

    #[test]
    fn apply_renames_and_drops() {
        let raw: Row = [
            ("user_query".to_string(), json!("hello")),
            ("doc".to_string(), json!("body")),
            ("extra".to_string(), json!(1)),
        ]
        .into_iter()
        .collect();
        let m = mapping(&[("user_query", "question"), ("doc", "context"), ("gone", "z")]);
        let out = apply(&raw, &m);
        assert_eq!(out.get("question"), Some(&json!("hello")));
        assert_eq!(out.get("context"), Some(&json!("body")));
        assert!(!out.contains_key("z"));
        assert!(!out.contains_key("extra"));
        assert_eq!(raw.len(), 3);
        assert!(raw.contains_key("user_query"));
    }

    #[test]
    fn validate_reports_missing_variable() {
        let m = mapping(&[("q", "question")]);
        let v = validate(&m, &cols(&["context"]), &cols(&["q", "ctx"]));
        assert!(!v.is_valid);
        assert_eq!(v.missing_variables, vec!["context"]);
        assert_eq!(v.unused_columns, vec!["ctx"]);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn validate_warns_on_absent_source_column() {
        let m = mapping(&[("questoin", "question")]);
        let v = validate(&m, &cols(&["question"]), &cols(&["question_text", "question"]));
        assert!(v.is_valid);
        assert_eq!(v.warnings.len(), 1);
        assert!(v.warnings[0].contains("questoin"));
        assert!(v.warnings[0].contains("did you mean 'question'"));
    }

    #[test]
    fn suggest_exact_then_case_then_alias() {
        let m = suggest(
            &cols(&["Context", "user_query", "answer"]),
            &cols(&["answer", "context", "question"]),
        );
        assert_eq!(m.get("answer").map(String::as_str), Some("answer"));
        assert_eq!(m.get("Context").map(String::as_str), Some("context"));
        assert_eq!(m.get("user_query").map(String::as_str), Some("question"));
    }

    #[test]
    fn suggest_skips_unknown_variables() {
        let m = suggest(&cols(&["foo"]), &cols(&["bar"]));
        assert!(m.is_empty());
    }

    #[test]
    fn suggest_does_not_reassign_a_column() {
        let m = suggest(&cols(&["query"]), &cols(&["query", "question"]));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("query").map(String::as_str), Some("query"));
    }
}
