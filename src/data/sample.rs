//! Sample discovery from a directory of per-sample count files

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;

use crate::error::{AnalysisError, Result};

/// Default file name suffix written by the read-counting step
pub const DEFAULT_SUFFIX: &str = "_htseq.out";

/// One sequenced library
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub id: String,
    pub condition: String,
    pub path: PathBuf,
}

/// Assigns a condition label to every sample id matching a pattern
///
/// Parsed from `LABEL=REGEX`, e.g. `Activated=^A\d+$`.
#[derive(Debug, Clone)]
pub struct ConditionRule {
    pub label: String,
    pub pattern: Regex,
}

impl ConditionRule {
    pub fn new(label: &str, pattern: &str) -> Result<Self> {
        if label.is_empty() {
            return Err(AnalysisError::InvalidInput {
                reason: format!("Condition rule '={}' has an empty label", pattern),
            });
        }
        Ok(Self {
            label: label.to_string(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, sample_id: &str) -> bool {
        self.pattern.is_match(sample_id)
    }
}

impl FromStr for ConditionRule {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        let (label, pattern) = s.split_once('=').ok_or_else(|| AnalysisError::InvalidInput {
            reason: format!("Condition rule '{}' is not of the form LABEL=REGEX", s),
        })?;
        Self::new(label.trim(), pattern)
    }
}

impl fmt::Display for ConditionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.pattern.as_str())
    }
}

/// How count files are found and labelled
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// File name suffix identifying count files
    pub suffix: String,
    pub rules: Vec<ConditionRule>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            rules: Vec::new(),
        }
    }
}

/// List count files in `dir` and label each with exactly one condition
///
/// Files are returned sorted by file name, so the sample order (and every
/// table column derived from it) is stable between runs.
pub fn discover_samples(dir: &Path, config: &DiscoveryConfig) -> Result<Vec<Sample>> {
    if !dir.is_dir() {
        return Err(AnalysisError::MissingInput {
            path: dir.to_path_buf(),
        });
    }
    if config.rules.is_empty() {
        return Err(AnalysisError::SampleDiscovery {
            reason: "No condition rules given".to_string(),
        });
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if let Some(id) = name.strip_suffix(&config.suffix) {
            if id.is_empty() {
                log::warn!("Ignoring '{}': no sample name before the suffix", name);
                continue;
            }
            files.push((id.to_string(), path));
        }
    }

    if files.is_empty() {
        return Err(AnalysisError::SampleDiscovery {
            reason: format!(
                "No files ending in '{}' found in {}",
                config.suffix,
                dir.display()
            ),
        });
    }

    files.sort_by(|a, b| a.1.file_name().cmp(&b.1.file_name()));

    let samples = files
        .into_iter()
        .map(|(id, path)| {
            let condition = assign_condition(&id, &config.rules)?;
            log::debug!("{} -> {} ({})", id, condition, path.display());
            Ok(Sample {
                id,
                condition,
                path,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    log::info!(
        "Discovered {} samples in {}",
        samples.len(),
        dir.display()
    );
    Ok(samples)
}

/// Label of the single rule matching `sample_id`
pub fn assign_condition(sample_id: &str, rules: &[ConditionRule]) -> Result<String> {
    let matched: Vec<&ConditionRule> = rules.iter().filter(|r| r.matches(sample_id)).collect();
    match matched.as_slice() {
        [rule] => Ok(rule.label.clone()),
        [] => Err(AnalysisError::SampleDiscovery {
            reason: format!("Sample '{}' matches no condition rule", sample_id),
        }),
        many => {
            let labels: Vec<&str> = many.iter().map(|r| r.label.as_str()).collect();
            // Same label from two patterns is still unambiguous
            if labels.iter().all(|l| *l == labels[0]) {
                Ok(labels[0].to_string())
            } else {
                Err(AnalysisError::SampleDiscovery {
                    reason: format!(
                        "Sample '{}' matches several condition rules ({})",
                        sample_id,
                        labels.join(", ")
                    ),
                })
            }
        }
    }
}
