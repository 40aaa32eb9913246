//! Per-sample experimental annotations

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::data::Sample;
use crate::error::{AnalysisError, Result};

/// Column name holding the experimental group of each sample
pub const CONDITION_COLUMN: &str = "condition";

/// Sample metadata containing categorical experimental factors
#[derive(Debug, Clone, Serialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Factor name -> value for each sample
    conditions: BTreeMap<String, Vec<String>>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!("Duplicate sample ID '{}'", dup),
            });
        }
        Ok(Self {
            sample_ids,
            conditions: BTreeMap::new(),
        })
    }

    /// Build metadata with a `condition` column from discovered samples
    pub fn from_samples(samples: &[Sample]) -> Result<Self> {
        let mut meta = Self::new(samples.iter().map(|s| s.id.clone()).collect())?;
        meta.add_condition(
            CONDITION_COLUMN,
            samples.iter().map(|s| s.condition.clone()).collect(),
        )?;
        Ok(meta)
    }

    /// Add a condition column (categorical factor)
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        self.conditions.insert(name.to_string(), values);
        Ok(())
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Get condition values for a specific column
    pub fn condition(&self, name: &str) -> Option<&[String]> {
        self.conditions.get(name).map(|v| v.as_slice())
    }

    /// Unique levels of a factor, sorted
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let values = self
            .conditions
            .get(name)
            .ok_or_else(|| AnalysisError::InvalidMetadata {
                reason: format!("condition '{}' not found", name),
            })?;
        let mut unique = values.clone();
        unique.sort();
        unique.dedup();
        Ok(unique)
    }

    /// Fail with `UnknownCondition` unless `label` is a level of `name`
    pub fn require_level(&self, name: &str, label: &str) -> Result<()> {
        let levels = self.levels(name)?;
        if levels.iter().any(|l| l == label) {
            Ok(())
        } else {
            Err(AnalysisError::UnknownCondition {
                label: label.to_string(),
                known: levels.join(", "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        let mut meta = SampleMetadata::new(
            ["A1", "A2", "U1", "U2"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        meta.add_condition(
            CONDITION_COLUMN,
            ["Activated", "Activated", "Unactivated", "Unactivated"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        meta
    }

    #[test]
    fn test_levels_and_membership() {
        let meta = metadata();
        assert_eq!(
            meta.levels(CONDITION_COLUMN).unwrap(),
            vec!["Activated", "Unactivated"]
        );
        assert_eq!(meta.condition(CONDITION_COLUMN).unwrap()[2], "Unactivated");
    }

    #[test]
    fn test_require_level() {
        let meta = metadata();
        assert!(meta.require_level(CONDITION_COLUMN, "Activated").is_ok());
        let err = meta.require_level(CONDITION_COLUMN, "Naive").unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownCondition { .. }));
    }

    #[test]
    fn test_length_mismatch() {
        let mut meta = SampleMetadata::new(vec!["s1".to_string()]).unwrap();
        assert!(meta
            .add_condition("condition", vec!["a".to_string(), "b".to_string()])
            .is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(SampleMetadata::new(vec!["s1".to_string(), "s1".to_string()]).is_err());
    }
}
