//! SARIF 2.1.0 front end for the ledger.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A SARIF result reduced to what the store keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedFinding {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub tool: String,
    pub message: String,
}

/// Extracts one finding per result that has a message and a file location.
/// The tool is the rule id when present, else the driver name. Relative uris
/// are resolved against `base_dir`; a missing region yields line and
/// column 0.
pub fn parse_sarif(source: &str, base_dir: &Path) -> Result<Vec<ImportedFinding>> {
    let root: Value = serde_json::from_str(source).with_context(|| "parse SARIF JSON")?;
    let runs = root
        .get("runs")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    let mut findings = Vec::new();
    for run in runs {
        let driver = run.get("tool").and_then(|tool| tool.get("driver"));
        let driver_name = driver
            .and_then(|driver| driver.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or("sarif")
            .to_string();
        let rules = driver
            .and_then(|driver| driver.get("rules"))
            .and_then(|rules| rules.as_array())
            .cloned()
            .unwrap_or_default();
        let results = run
            .get("results")
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default();
        for result in results {
            let message = result_message(&result);
            if message.is_empty() {
                continue;
            }
            let Some(location) = first_location(&result) else {
                continue;
            };
            let Some(path) = location
                .get("physicalLocation")
                .and_then(|value| value.get("artifactLocation"))
                .and_then(|value| value.get("uri"))
                .and_then(|value| value.as_str())
                .and_then(|uri| resolve_uri(uri, base_dir))
            else {
                continue;
            };
            let region = location
                .get("physicalLocation")
                .and_then(|value| value.get("region"));
            let position = |key: &str| {
                region
                    .and_then(|region| region.get(key))
                    .and_then(|value| value.as_u64())
                    .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
            };
            let line = position("startLine").unwrap_or(0);
            let column = position("startColumn").unwrap_or(if line > 0 { 1 } else { 0 });
            let tool = rule_id(&result, &rules).unwrap_or_else(|| driver_name.clone());

            findings.push(ImportedFinding {
                path,
                line,
                column,
                tool,
                message,
            });
        }
    }
    Ok(findings)
}

fn rule_id(result: &Value, rules: &[Value]) -> Option<String> {
    result
        .get("ruleId")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
        .or_else(|| {
            result
                .get("rule")
                .and_then(|rule| rule.get("id"))
                .and_then(|value| value.as_str())
                .map(|value| value.to_string())
        })
        .or_else(|| {
            let index = result.get("ruleIndex").and_then(|value| value.as_u64())?;
            let rule = rules.get(index as usize)?;
            rule.get("id")
                .and_then(|value| value.as_str())
                .map(|value| value.to_string())
        })
}

fn result_message(result: &Value) -> String {
    result
        .get("message")
        .and_then(|value| value.get("text"))
        .and_then(|value| value.as_str())
        .or_else(|| {
            result
                .get("message")
                .and_then(|value| value.get("markdown"))
                .and_then(|value| value.as_str())
        })
        .or_else(|| result.get("message").and_then(|value| value.as_str()))
        .unwrap_or("")
        .to_string()
}

fn first_location(result: &Value) -> Option<&Value> {
    result
        .get("locations")
        .and_then(|value| value.as_array())
        .and_then(|value| value.first())
}

fn resolve_uri(uri: &str, base_dir: &Path) -> Option<PathBuf> {
    let trimmed = uri.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned = trimmed
        .strip_prefix("file://")
        .or_else(|| trimmed.strip_prefix("file:"))
        .unwrap_or(trimmed);
    let path = PathBuf::from(cleaned);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(base_dir.join(path))
    }
}
