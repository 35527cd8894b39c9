//! Reproducibility manifest written into every build context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resolver::{BuildChain, ChainNode};
use crate::templating::BuildScript;

/// One unit of the build chain as recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestUnit {
    pub name: String,
    pub version: String,
    pub image_id: String,
}

/// A staged copy as recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCopy {
    pub source: String,
    pub destination: String,
}

/// Everything needed to explain how one chain image was built.
///
/// Written as `manifest.json`; the timestamp is the invocation's `__timestamp__`, so two
/// manifests from the same invocation agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub image: String,
    pub version: String,
    pub tag: String,
    pub hash: String,
    pub image_ref: String,
    pub base: Option<String>,
    pub backend: String,
    pub distro: String,
    pub system: String,
    pub arch: String,
    pub timestamp: String,
    /// The whole chain, dependencies first
    pub chain: Vec<ManifestUnit>,
    pub arguments: BTreeMap<String, String>,
    pub variables: BTreeMap<String, String>,
    pub copies: Vec<ManifestCopy>,
    pub files: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub entrypoint: Option<String>,
}

impl BuildManifest {
    /// Manifest of `node` within `chain`, built from `script`.
    #[must_use]
    pub fn new(chain: &BuildChain, node: &ChainNode, script: &BuildScript) -> Self {
        let settings = &chain.settings;
        Self {
            image: node.name.clone(),
            version: node.version.to_string(),
            tag: node.tag.clone(),
            hash: node.hash.clone(),
            image_ref: node.image_ref.clone(),
            base: node.base.clone(),
            backend: settings.backend.name().to_string(),
            distro: settings.distro.clone(),
            system: settings.system.clone(),
            arch: settings.arch.clone(),
            timestamp: node.variables.get("__timestamp__").unwrap_or_default().to_string(),
            chain: chain
                .nodes
                .iter()
                .map(|n| ManifestUnit {
                    name: n.name.clone(),
                    version: n.version.to_string(),
                    image_id: n.image_id.clone(),
                })
                .collect(),
            arguments: node.arguments.iter().cloned().collect(),
            variables: node.variables.snapshot(),
            copies: script
                .copies
                .iter()
                .map(|c| ManifestCopy {
                    source: c.source.clone(),
                    destination: c.destination.clone(),
                })
                .collect(),
            files: node.spec.files.clone(),
            labels: script.labels.iter().map(|l| (l.name.clone(), l.value.clone())).collect(),
            entrypoint: script.entrypoint.clone(),
        }
    }

    /// Pretty-printed JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}
