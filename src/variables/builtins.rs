//! Built-in `__name__` variables.
//!
//! Chain-wide values come from the [`InvocationContext`] and the resolved build units;
//! node values come from the node being rendered. Both are written at
//! [`Layer::Builtin`], so anything a specification or user sets under the same name wins.

use crate::backend::Backend;
use crate::version::Version;

use super::{Layer, VariableStore};

/// Upper bound for `__threads__`.
const MAX_THREADS: usize = 16;

/// Settings fixed for one `velocity` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub backend: Backend,
    pub distro: String,
    pub system: String,
    pub arch: String,
    /// Suggested build parallelism
    pub threads: usize,
    /// Captured once so every node of a chain sees the same value
    pub timestamp: String,
}

impl InvocationContext {
    /// Capture the current time and host parallelism.
    pub fn new(backend: Backend, distro: impl Into<String>, system: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            backend,
            distro: distro.into(),
            system: system.into(),
            arch: arch.into(),
            threads: default_threads(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        }
    }
}

/// Three quarters of the available CPUs, at least 1 and at most 16.
#[must_use]
pub fn default_threads() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (cpus * 3 / 4).clamp(1, MAX_THREADS)
}

fn set_version_parts(store: &mut VariableStore, prefix: &str, version: &Version) {
    let part = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_default();
    store.set(format!("{prefix}version__"), version.to_string(), Layer::Builtin);
    store.set(format!("{prefix}version_major__"), version.major.to_string(), Layer::Builtin);
    store.set(format!("{prefix}version_minor__"), part(version.minor), Layer::Builtin);
    store.set(format!("{prefix}version_patch__"), part(version.patch), Layer::Builtin);
    store.set(format!("{prefix}version_suffix__"), version.suffix.clone().unwrap_or_default(), Layer::Builtin);
}

/// Variables shared by every node of a chain.
///
/// `units` lists every `(name, version)` of the chain; each contributes
/// `__<name>__version__` and its component variables.
#[must_use]
pub fn chain_variables<'a, I>(context: &InvocationContext, units: I) -> VariableStore
where
    I: IntoIterator<Item = (&'a str, &'a Version)>,
{
    let mut store = VariableStore::new();
    store.set("__backend__", context.backend.name(), Layer::Builtin);
    store.set("__backend_executable__", context.backend.executable(), Layer::Builtin);
    store.set("__distro__", &context.distro, Layer::Builtin);
    store.set("__system__", &context.system, Layer::Builtin);
    store.set("__arch__", &context.arch, Layer::Builtin);
    store.set("__threads__", context.threads.to_string(), Layer::Builtin);
    store.set("__timestamp__", &context.timestamp, Layer::Builtin);

    for (name, version) in units {
        set_version_parts(&mut store, &format!("__{name}__"), version);
    }
    store
}

/// Identity of one chain node.
#[derive(Debug, Clone, Copy)]
pub struct NodeIdentity<'a> {
    pub name: &'a str,
    pub version: &'a Version,
    /// Full sha256 hex digest of the node's inputs
    pub hash: &'a str,
    /// Image reference of the previous chain node
    pub base: Option<&'a str>,
}

impl NodeIdentity<'_> {
    /// Short id used in tags and directory names.
    #[must_use]
    pub fn image_id(&self) -> &str {
        self.hash.get(..7).unwrap_or(self.hash)
    }

    /// `<name>-<version>-<image_id>`
    #[must_use]
    pub fn tag(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.image_id())
    }
}

/// Write the per-node built-ins into `store`.
pub fn apply_node(store: &mut VariableStore, node: &NodeIdentity<'_>) {
    store.set("__name__", node.name, Layer::Builtin);
    set_version_parts(store, "__", node.version);
    store.set("__hash__", node.hash, Layer::Builtin);
    store.set("__image_id__", node.image_id(), Layer::Builtin);
    store.set("__tag__", node.tag(), Layer::Builtin);
    if let Some(base) = node.base {
        store.set("__base__", base, Layer::Builtin);
    }
}
