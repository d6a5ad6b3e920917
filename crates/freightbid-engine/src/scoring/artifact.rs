//! On-disk scoring model artifacts.
//!
//! `model_dir/model-<version>.json` holds one artifact; `model_dir/CURRENT`
//! names the version that should be live. An artifact lists the feature
//! names it was trained on and is rejected unless they match
//! [`FEATURE_NAMES`] exactly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{FeatureVector, ScoringModel, FEATURE_COUNT, FEATURE_NAMES};
use crate::error::ScoringError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub version: String,
    pub features: Vec<String>,
    pub model: ModelSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Regression trees whose predictions are averaged.
    Forest { trees: Vec<RegressionTree> },
    Linear { weights: Vec<f64>, intercept: f64 },
}

/// A binary regression tree in flat array form. Node 0 is the root; a split
/// sends `x[feature] <= threshold` left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

impl RegressionTree {
    /// Children must point forward and features must be in range, which also
    /// guarantees every walk terminates.
    fn validate(&self, index: usize) -> Result<(), ScoringError> {
        if self.nodes.is_empty() {
            return Err(ScoringError::Malformed(format!("tree {index} has no nodes")));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                let in_range = |c: usize| c > i && c < self.nodes.len();
                if *feature >= FEATURE_COUNT || !threshold.is_finite() {
                    return Err(ScoringError::Malformed(format!(
                        "tree {index} node {i} splits on invalid feature {feature}"
                    )));
                }
                if !in_range(*left) || !in_range(*right) {
                    return Err(ScoringError::Malformed(format!(
                        "tree {index} node {i} has out-of-order children"
                    )));
                }
            }
        }
        Ok(())
    }

    fn predict(&self, x: &FeatureVector) -> f64 {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

impl ModelArtifact {
    pub fn from_json(raw: &str) -> Result<Self, ScoringError> {
        let artifact: ModelArtifact =
            serde_json::from_str(raw).map_err(|e| ScoringError::Malformed(e.to_string()))?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.features.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ScoringError::FeatureMismatch {
                expected: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                actual: self.features.clone(),
            });
        }
        match &self.model {
            ModelSpec::Forest { trees } => {
                if trees.is_empty() {
                    return Err(ScoringError::Malformed("forest has no trees".to_string()));
                }
                for (i, tree) in trees.iter().enumerate() {
                    tree.validate(i)?;
                }
            }
            ModelSpec::Linear { weights, intercept } => {
                if weights.len() != FEATURE_COUNT {
                    return Err(ScoringError::Malformed(format!(
                        "linear model has {} weights, expected {FEATURE_COUNT}",
                        weights.len()
                    )));
                }
                if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                    return Err(ScoringError::Malformed("non-finite coefficient".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl ScoringModel for ModelArtifact {
    fn score(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let raw = match &self.model {
            ModelSpec::Forest { trees } => {
                trees.iter().map(|t| t.predict(features)).sum::<f64>() / trees.len() as f64
            }
            ModelSpec::Linear { weights, intercept } => {
                intercept + weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>()
            }
        };
        if raw.is_finite() {
            Ok(raw)
        } else {
            Err(ScoringError::NonFinite)
        }
    }
}

/// Directory holding versioned artifacts and the `CURRENT` pointer.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.root.join(format!("model-{version}.json"))
    }

    /// Version named by `CURRENT`, or `None` when the pointer does not exist.
    pub fn current_version(&self) -> Result<Option<String>, ScoringError> {
        let path = self.root.join("CURRENT");
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let version = raw.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ScoringError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn load(&self, version: &str) -> Result<ModelArtifact, ScoringError> {
        let path = self.artifact_path(version);
        let raw = std::fs::read_to_string(&path).map_err(|source| ScoringError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let artifact = ModelArtifact::from_json(&raw)?;
        if artifact.version != version {
            return Err(ScoringError::Malformed(format!(
                "{} declares version {}",
                path.display(),
                artifact.version
            )));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature_names() -> Vec<&'static str> {
        FEATURE_NAMES.to_vec()
    }

    fn stump_forest() -> serde_json::Value {
        // Cheaper per km scores higher.
        json!({
            "version": "v1",
            "features": feature_names(),
            "model": {
                "kind": "forest",
                "trees": [
                    { "nodes": [
                        { "feature": 8, "threshold": 1.5, "left": 1, "right": 2 },
                        { "value": 0.9 },
                        { "value": 0.2 }
                    ]},
                    { "nodes": [ { "value": 0.5 } ] }
                ]
            }
        })
    }

    #[test]
    fn forest_averages_trees() {
        let artifact = ModelArtifact::from_json(&stump_forest().to_string()).unwrap();
        let mut x = [0.0; FEATURE_COUNT];
        x[8] = 1.0;
        assert!((artifact.score(&x).unwrap() - 0.7).abs() < 1e-12);
        x[8] = 2.0;
        assert!((artifact.score(&x).unwrap() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn linear_model_scores() {
        let raw = json!({
            "version": "lin",
            "features": feature_names(),
            "model": {
                "kind": "linear",
                "weights": [0.0, 0.0, -0.001, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0],
                "intercept": 5.0
            }
        });
        let artifact = ModelArtifact::from_json(&raw.to_string()).unwrap();
        let mut x = [0.0; FEATURE_COUNT];
        x[2] = 1000.0;
        x[3] = 2.0;
        assert!((artifact.score(&x).unwrap() - 3.8).abs() < 1e-12);
    }

    #[test]
    fn wrong_feature_shape_is_rejected() {
        let mut raw = stump_forest();
        raw["features"] = json!(["distance", "price"]);
        let err = ModelArtifact::from_json(&raw.to_string()).unwrap_err();
        assert!(matches!(err, ScoringError::FeatureMismatch { .. }));
    }

    #[test]
    fn cyclic_tree_is_rejected() {
        let mut raw = stump_forest();
        raw["model"]["trees"][0]["nodes"][0]["left"] = json!(0);
        let err = ModelArtifact::from_json(&raw.to_string()).unwrap_err();
        assert!(matches!(err, ScoringError::Malformed(_)));
    }

    #[test]
    fn artifact_dir_reads_current_and_versions() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        assert_eq!(artifacts.current_version().unwrap(), None);

        std::fs::write(dir.path().join("CURRENT"), "v1\n").unwrap();
        std::fs::write(artifacts.artifact_path("v1"), stump_forest().to_string()).unwrap();
        assert_eq!(artifacts.current_version().unwrap().as_deref(), Some("v1"));
        assert_eq!(artifacts.load("v1").unwrap().version, "v1");

        let err = artifacts.load("v2").unwrap_err();
        assert!(matches!(err, ScoringError::Io { .. }));
    }
}
