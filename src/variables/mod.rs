//! Layered variable store.
//!
//! Every value remembers the [`Layer`] it came from. A write only lands when its layer
//! is at least as high as the layer already holding the name, so the final value of a
//! name depends on the layers involved and never on the order writes happen in:
//!
//! ```text
//! Builtin < Specification < Prolog < CommandLine
//! ```
//!
//! Within one layer the later write wins, which is how an image's own declarations
//! override config-wide constraints that share the specification layer.
//!
//! Build chain nodes never share a store. Each node receives a materialized copy
//! (`Clone`) of the chain-level store and applies its own layers on top.

pub mod builtins;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Source of a variable value, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    /// Computed by Velocity (`__name__`, `__tag__`, ...)
    Builtin,
    /// Declared in `specs.yaml` or the config file's constraints
    Specification,
    /// Printed by the image's prolog
    Prolog,
    /// Passed with `--arg`
    CommandLine,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Builtin => "builtin",
            Self::Specification => "specification",
            Self::Prolog => "prolog",
            Self::CommandLine => "command-line",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    layer: Layer,
}

/// Name to value mapping with layer-aware precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableStore {
    entries: BTreeMap<String, Entry>,
}

impl VariableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` from `layer`.
    ///
    /// Returns whether the write took effect; it is ignored when a higher layer
    /// already holds the name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, layer: Layer) -> bool {
        let name = name.into();
        if let Some(existing) = self.entries.get(&name)
            && existing.layer > layer
        {
            tracing::trace!("ignoring {layer} value for '{name}', already set by {}", existing.layer);
            return false;
        }

        self.entries.insert(
            name,
            Entry {
                value: value.into(),
                layer,
            },
        );
        true
    }

    /// Set every pair from one layer.
    pub fn extend<I, K, V>(&mut self, values: I, layer: Layer)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in values {
            self.set(name, value, layer);
        }
    }

    /// Current value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.value.as_str())
    }

    /// Layer currently holding `name`.
    #[must_use]
    pub fn layer(&self, name: &str) -> Option<Layer> {
        self.entries.get(name).map(|e| e.layer)
    }

    /// Whether `name` is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Defined names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(name, value)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e.value.as_str()))
    }

    /// Plain name to value copy.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shell-sourceable `export NAME='value'` lines, one per variable.
    #[must_use]
    pub fn to_exports(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("export {name}='{}'\n", value.replace('\'', r"'\''")))
            .collect()
    }
}

impl Serialize for VariableStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Whether `name` has the reserved built-in shape `__name__`.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_layer_wins_regardless_of_order() {
        let mut forward = VariableStore::new();
        forward.set("X", "spec", Layer::Specification);
        forward.set("X", "cli", Layer::CommandLine);
        forward.set("X", "prolog", Layer::Prolog);

        let mut backward = VariableStore::new();
        backward.set("X", "prolog", Layer::Prolog);
        backward.set("X", "cli", Layer::CommandLine);
        backward.set("X", "spec", Layer::Specification);

        assert_eq!(forward.get("X"), Some("cli"));
        assert_eq!(forward, backward);
        assert_eq!(forward.layer("X"), Some(Layer::CommandLine));
    }

    #[test]
    fn test_same_layer_later_write_wins() {
        let mut store = VariableStore::new();
        assert!(store.set("X", "global", Layer::Specification));
        assert!(store.set("X", "image", Layer::Specification));
        assert!(!store.set("X", "builtin", Layer::Builtin));
        assert_eq!(store.get("X"), Some("image"));
    }

    #[test]
    fn test_clones_are_independent() {
        let mut parent = VariableStore::new();
        parent.set("A", "1", Layer::Builtin);

        let mut child = parent.clone();
        child.set("A", "2", Layer::Specification);

        assert_eq!(parent.get("A"), Some("1"));
        assert_eq!(child.get("A"), Some("2"));
    }

    #[test]
    fn test_exports_quote_values() {
        let mut store = VariableStore::new();
        store.set("MSG", "it's here", Layer::Specification);
        assert_eq!(store.to_exports(), "export MSG='it'\\''s here'\n");
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("__name__"));
        assert!(is_reserved("__gcc__version__"));
        assert!(!is_reserved("____"));
        assert!(!is_reserved("__private"));
        assert!(!is_reserved("NAME"));
    }
}
