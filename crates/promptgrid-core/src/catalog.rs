//! YAML catalog of prompts and datasets, loaded straight into a store.

use crate::errors::ConfigError;
use crate::model::{new_id, Assertion, ColumnMapping, Dataset, PromptVersion, Row, TestCase};
use crate::storage::SqliteStore;
use crate::template;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default)]
    pub prompts: Vec<PromptEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionEntry {
    #[serde(default = "one")]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
    pub content: String,
    #[serde(default)]
    pub active: bool,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub column_mapping: Option<ColumnMapping>,
    #[serde(default)]
    pub default_assertions: Vec<Assertion>,
    #[serde(default)]
    pub cases: Vec<CaseEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub input: Row,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub assertions: Option<Vec<Assertion>>,
    #[serde(default)]
    pub is_edge_case: bool,
    #[serde(default)]
    pub is_error_pattern: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub prompts: usize,
    pub versions: usize,
    pub datasets: usize,
    pub cases: usize,
}

pub fn load_catalog(path: &Path) -> Result<Catalog, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read catalog {}: {}", path.display(), e)))?;
    parse_catalog(&raw)
}

pub fn parse_catalog(raw: &str) -> Result<Catalog, ConfigError> {
    let catalog: Catalog = serde_yaml::from_str(raw)
        .map_err(|e| ConfigError(format!("failed to parse catalog YAML: {}", e)))?;
    for p in &catalog.prompts {
        if p.versions.is_empty() {
            return Err(ConfigError(format!("prompt '{}' has no versions", p.id)));
        }
        if p.versions.iter().filter(|v| v.active).count() > 1 {
            return Err(ConfigError(format!(
                "prompt '{}' marks more than one version active",
                p.id
            )));
        }
    }
    Ok(catalog)
}

/// Write a catalog into the store. When no version of a prompt is marked
/// active the last listed one is.
pub fn seed(store: &SqliteStore, catalog: &Catalog) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();

    for p in &catalog.prompts {
        store.put_prompt(&p.id, p.name.as_deref().unwrap_or(&p.id))?;
        let explicit_active = p.versions.iter().any(|v| v.active);
        let last = p.versions.len().saturating_sub(1);
        for (i, v) in p.versions.iter().enumerate() {
            let version = PromptVersion {
                id: new_id("pv"),
                prompt_id: p.id.clone(),
                major: v.major,
                minor: v.minor,
                patch: v.patch,
                content: v.content.clone(),
                variables: template::extract(&v.content),
            };
            let active = if explicit_active { v.active } else { i == last };
            store.put_prompt_version(&version, active)?;
            report.versions += 1;
        }
        report.prompts += 1;
    }

    for d in &catalog.datasets {
        store.put_dataset(&Dataset {
            id: d.id.clone(),
            name: d.name.clone().unwrap_or_else(|| d.id.clone()),
            column_mapping: d.column_mapping.clone(),
            default_assertions: d.default_assertions.clone(),
        })?;
        for c in &d.cases {
            store.put_case(&TestCase {
                id: c.id.clone().unwrap_or_else(|| new_id("case")),
                dataset_id: d.id.clone(),
                raw_input: c.input.clone(),
                expected_output: c.expected_output.clone(),
                assertions: c.assertions.clone(),
                is_edge_case: c.is_edge_case,
                is_error_pattern: c.is_error_pattern,
            })?;
            report.cases += 1;
        }
        report.datasets += 1;
    }

    tracing::info!(
        event = "promptgrid.catalog.seeded",
        prompts = report.prompts,
        versions = report.versions,
        datasets = report.datasets,
        cases = report.cases,
    );
    Ok(report)
}
