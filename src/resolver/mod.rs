//! Build chain resolution.
//!
//! The resolver turns a target (`gcc` or `gcc@13:`) into a [`BuildChain`]: the root
//! image and every image it transitively depends on, each pinned to one version, laid
//! out dependency-first with the root last. Every node carries its own materialized
//! [`VariableStore`].
//!
//! # Algorithm
//!
//! Resolution runs in passes until the constraints stop changing:
//!
//! 1. **Traverse**: depth-first from the root. Each image is visited once per pass and
//!    pinned to the best version satisfying every constraint known so far (see
//!    [`SelectionPolicy`]). Dependencies whose `when` selector does not hold for the
//!    pinned version are skipped.
//! 2. **Check cycles**: the traversal records edges in a [`DependencyGraph`]; a cycle
//!    fails with [`VelocityError::CyclicDependency`] naming the path.
//! 3. **Intersect**: constraints from every edge are added to the image's
//!    [`ConstraintSet`]. A contradiction fails with
//!    [`VelocityError::UnsatisfiableVersion`]. If anything new was learned, the next
//!    pass re-pins with the larger sets.
//!
//! Constraints only accumulate, so passes are bounded by the number of distinct
//! constraints in the specifications involved.
//!
//! # Variable layering
//!
//! For each node, in chain order:
//!
//! ```text
//! chain built-ins + node built-ins        Layer::Builtin
//! config-wide constraints (when: holds)    Layer::Specification
//! specs.yaml variables, argument defaults  Layer::Specification (later write wins)
//! --arg NAME=VALUE                         Layer::CommandLine
//! prolog output                            Layer::Prolog
//! ```
//!
//! The prolog runs last because it sees every other layer as its environment; its
//! output still ranks below command-line values.

pub mod dependency_graph;
pub mod prolog;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::constants::MAX_RESOLUTION_PASSES;
use crate::core::VelocityError;
use crate::specification::{SelectorContext, SpecStore, Specification, TargetSettings, is_image_name};
use crate::specification::selector::Selector;
use crate::templating::parser::is_identifier;
use crate::variables::builtins::{self, InvocationContext, NodeIdentity};
use crate::variables::{Layer, VariableStore, is_reserved};
use crate::version::{ConstraintSet, SelectionPolicy, Version};

pub use dependency_graph::DependencyGraph;
pub use prolog::{PrologRunner, ShellPrologRunner};

/// What a config-wide constraint sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// A variable visible to templates
    Variable,
    /// A variable that is also passed to the backend as a build argument
    Argument,
}

/// A variable or argument applied to every image whose node satisfies `when`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConstraint {
    pub kind: ConstraintKind,
    pub name: String,
    pub value: String,
    pub when: Selector,
}

/// Inputs of a resolution besides the target itself.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub settings: TargetSettings,
    /// Root of the build contexts; file-based backends write images here
    pub build_dir: PathBuf,
    pub policy: SelectionPolicy,
    pub constraints: Vec<GlobalConstraint>,
    /// `--arg NAME=VALUE` pairs
    pub arguments: Vec<(String, String)>,
}

/// One resolved image of a build chain.
#[derive(Debug, Clone)]
pub struct ChainNode {
    pub name: String,
    pub version: Version,
    pub spec: Specification,
    pub template_path: PathBuf,
    pub template_source: String,
    /// Direct dependencies in declaration order
    pub dependencies: Vec<String>,
    /// Build arguments passed to the backend, with resolved values
    pub arguments: Vec<(String, String)>,
    pub variables: VariableStore,
    pub hash: String,
    pub image_id: String,
    /// `<name>-<version>-<image_id>`, also the build context directory name
    pub tag: String,
    /// Image reference of the previous node
    pub base: Option<String>,
    /// Reference under which this node's image is built
    pub image_ref: String,
}

impl ChainNode {
    /// `name@version`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// The ordered images feeding one build, dependencies first and the root last.
#[derive(Debug, Clone)]
pub struct BuildChain {
    pub nodes: Vec<ChainNode>,
    pub settings: TargetSettings,
    graph: DependencyGraph,
}

impl BuildChain {
    /// The image the user asked for.
    #[must_use]
    pub fn root(&self) -> Option<&ChainNode> {
        self.nodes.last()
    }

    /// Final merged variables of the root.
    #[must_use]
    pub fn variables(&self) -> Option<&VariableStore> {
        self.root().map(|n| &n.variables)
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ChainNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Default name of the finished image:
    /// `<root>-<v>_<dep>-<v>_..._<system>-<distro>`.
    #[must_use]
    pub fn default_tag(&self) -> String {
        let units: Vec<String> = self.nodes.iter().rev().map(|n| format!("{}-{}", n.name, n.version)).collect();
        format!("{}_{}-{}", units.join("_"), self.settings.system, self.settings.distro)
    }

    /// Dependency tree with versions and image ids.
    #[must_use]
    pub fn to_tree_string(&self) -> String {
        let Some(root) = self.root() else {
            return String::new();
        };
        self.graph.to_tree_string(&root.name, |name| {
            self.find(name).map_or_else(|| name.to_string(), |n| format!("{} ({})", n.label(), n.image_id))
        })
    }
}

/// Split a target such as `gcc@12:13` into name and constraint.
///
/// # Errors
///
/// Returns [`VelocityError::InvalidTarget`] for an invalid image name or constraint.
pub fn parse_target(target: &str) -> Result<(String, ConstraintSet), VelocityError> {
    let invalid = |reason: String| VelocityError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let trimmed = target.trim();
    let (name, expr) = match trimmed.split_once('@') {
        Some((_, "")) => return Err(invalid("missing version after '@'".to_string())),
        Some((name, expr)) => (name, expr),
        None => (trimmed, ""),
    };
    if !is_image_name(name) {
        return Err(invalid(format!("'{name}' is not a valid image name")));
    }
    let constraint = ConstraintSet::parse(expr).map_err(|e| invalid(e.to_string()))?;
    Ok((name.to_string(), constraint))
}

#[derive(Debug)]
struct Requirement {
    image: String,
    constraint: ConstraintSet,
    required_by: String,
}

#[derive(Debug, Default)]
struct Pass {
    selected: HashMap<String, Version>,
    graph: DependencyGraph,
    requirements: Vec<Requirement>,
}

/// Accumulated constraints and who asked for them.
#[derive(Debug, Default)]
struct Constraints {
    sets: BTreeMap<String, ConstraintSet>,
    sources: BTreeMap<String, Vec<String>>,
}

impl Constraints {
    fn get(&self, image: &str) -> ConstraintSet {
        self.sets.get(image).cloned().unwrap_or_default()
    }

    fn note(&mut self, image: &str, source: String) {
        let sources = self.sources.entry(image.to_string()).or_default();
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    fn sources(&self, image: &str) -> String {
        self.sources.get(image).map_or_else(|| "nothing".to_string(), |s| s.join(", "))
    }

    /// Add a pass's requirements, returning whether any set narrowed.
    fn merge(&mut self, requirements: Vec<Requirement>) -> Result<bool, VelocityError> {
        let mut changed = false;
        for requirement in requirements {
            let source = format!("{} ({})", requirement.required_by, requirement.constraint);
            let set = self.sets.entry(requirement.image.clone()).or_default();
            let before = set.len();
            for constraint in requirement.constraint.iter() {
                if let Err(conflict) = set.add(constraint.clone()) {
                    let constraints = format!("{set}, {constraint}");
                    return Err(VelocityError::UnsatisfiableVersion {
                        reason: format!(
                            "{} from {} contradicts {} from {}",
                            conflict.incoming,
                            requirement.required_by,
                            conflict.existing,
                            self.sources(&requirement.image)
                        ),
                        image: requirement.image,
                        constraints,
                    });
                }
            }
            changed |= set.len() != before;
            if !requirement.constraint.is_empty() {
                self.note(&requirement.image, source);
            }
        }
        Ok(changed)
    }
}

/// Resolves targets against a [`SpecStore`].
pub struct Resolver<'a, S: SpecStore + ?Sized, P: PrologRunner + ?Sized> {
    store: &'a S,
    prolog: &'a P,
    options: ResolveOptions,
    context: InvocationContext,
}

impl<'a, S: SpecStore + ?Sized, P: PrologRunner + ?Sized> Resolver<'a, S, P> {
    pub fn new(store: &'a S, prolog: &'a P, options: ResolveOptions) -> Self {
        let settings = &options.settings;
        let context = InvocationContext::new(
            settings.backend,
            settings.distro.clone(),
            settings.system.clone(),
            settings.arch.clone(),
        );
        Self {
            store,
            prolog,
            options,
            context,
        }
    }

    /// Replace the captured invocation context (timestamp, thread count).
    #[must_use]
    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve a target string.
    ///
    /// # Errors
    ///
    /// Any resolution error; see [`Resolver::resolve_root`].
    pub fn resolve(&self, target: &str) -> Result<BuildChain, VelocityError> {
        let (name, constraint) = parse_target(target)?;
        let root = self.store.load(&name)?;
        self.resolve_root(root, constraint)
    }

    /// Resolve an already loaded root specification under `constraint`.
    ///
    /// # Errors
    ///
    /// - [`VelocityError::ImageNotFound`] / [`VelocityError::MalformedSpec`] for
    ///   dependencies that cannot be loaded
    /// - [`VelocityError::CyclicDependency`] for a dependency cycle
    /// - [`VelocityError::UnsatisfiableVersion`] for contradictory constraints or no
    ///   matching version
    /// - [`VelocityError::MissingArgument`] for a required argument nobody set
    /// - [`VelocityError::PrologExecution`] for a failing prolog
    pub fn resolve_root(&self, root: Specification, constraint: ConstraintSet) -> Result<BuildChain, VelocityError> {
        for (name, _) in &self.options.arguments {
            if !is_identifier(name) || is_reserved(name) {
                return Err(VelocityError::ConfigError {
                    message: format!("--arg name '{name}' must be alphanumeric and not a built-in"),
                });
            }
        }

        let root_name = root.name.clone();
        let mut specs = HashMap::from([(root_name.clone(), root)]);
        let mut constraints = Constraints::default();
        constraints.merge(vec![Requirement {
            image: root_name.clone(),
            constraint,
            required_by: "the build target".to_string(),
        }])?;

        for pass in 1..=MAX_RESOLUTION_PASSES {
            let mut state = Pass::default();
            self.visit(&root_name, &mut specs, &constraints, &mut state)?;
            state.graph.detect_cycles()?;

            let requirements = std::mem::take(&mut state.requirements);
            if !constraints.merge(requirements)? {
                tracing::debug!(
                    "Resolution of '{root_name}' settled after {pass} pass(es): {} images, {} edges",
                    state.graph.node_count(),
                    state.graph.edge_count()
                );
                return self.materialize(&root_name, &specs, &state);
            }
            tracing::trace!("Pass {pass} narrowed constraints, resolving again");
        }

        Err(VelocityError::UnsatisfiableVersion {
            image: root_name.clone(),
            constraints: constraints.get(&root_name).to_string(),
            reason: format!("version selection did not settle after {MAX_RESOLUTION_PASSES} passes"),
        })
    }

    fn visit(
        &self,
        name: &str,
        specs: &mut HashMap<String, Specification>,
        constraints: &Constraints,
        state: &mut Pass,
    ) -> Result<(), VelocityError> {
        if state.selected.contains_key(name) {
            return Ok(());
        }
        if !specs.contains_key(name) {
            let spec = self.store.load(name)?;
            specs.insert(name.to_string(), spec);
        }
        let Some(spec) = specs.get(name).cloned() else {
            return Err(VelocityError::ImageNotFound {
                name: name.to_string(),
            });
        };

        let set = constraints.get(name);
        let available = spec.available_versions(&self.options.settings);
        let version = set.find_best_match(&available, self.options.policy).cloned().ok_or_else(|| {
            let offered = if available.is_empty() {
                "no versions are available for these settings".to_string()
            } else {
                let list: Vec<String> = available.iter().map(ToString::to_string).collect();
                format!("available: {}", list.join(", "))
            };
            VelocityError::UnsatisfiableVersion {
                image: name.to_string(),
                constraints: set.to_string(),
                reason: format!("{offered}; required by {}", constraints.sources(name)),
            }
        })?;
        tracing::debug!("Selected {name}@{version}");

        state.selected.insert(name.to_string(), version.clone());
        state.graph.ensure_node(name);

        for dependency in spec.active_dependencies(&version, &self.options.settings) {
            state.graph.add_dependency(name, &dependency.name);
            state.requirements.push(Requirement {
                image: dependency.name.clone(),
                constraint: dependency.constraint.clone(),
                required_by: format!("{name}@{version}"),
            });
            self.visit(&dependency.name, specs, constraints, state)?;
        }
        Ok(())
    }

    fn materialize(
        &self,
        root: &str,
        specs: &HashMap<String, Specification>,
        state: &Pass,
    ) -> Result<BuildChain, VelocityError> {
        let order = state.graph.build_order(root)?;
        let pinned = |name: &str| {
            state.selected.get(name).ok_or_else(|| VelocityError::ImageNotFound {
                name: name.to_string(),
            })
        };

        let mut units = Vec::with_capacity(order.len());
        for name in &order {
            units.push((name.as_str(), pinned(name)?));
        }
        let chain_variables = builtins::chain_variables(&self.context, units);

        let mut nodes: Vec<ChainNode> = Vec::with_capacity(order.len());
        for name in &order {
            let spec = specs.get(name).ok_or_else(|| VelocityError::ImageNotFound {
                name: name.clone(),
            })?;
            let version = pinned(name)?.clone();
            let below = nodes.last();
            let node = self.resolve_node(spec, version, state, below, &chain_variables)?;
            tracing::debug!("Chain node {} -> {}", node.label(), node.tag);
            nodes.push(node);
        }

        tracing::info!(
            "Resolved {root}: {}",
            nodes.iter().map(ChainNode::label).collect::<Vec<_>>().join(" -> ")
        );
        Ok(BuildChain {
            nodes,
            settings: self.options.settings.clone(),
            graph: state.graph.clone(),
        })
    }

    fn resolve_node(
        &self,
        spec: &Specification,
        version: Version,
        state: &Pass,
        below: Option<&ChainNode>,
        chain_variables: &VariableStore,
    ) -> Result<ChainNode, VelocityError> {
        let settings = &self.options.settings;
        let spec = &spec.specialize(&version, settings);
        let name = spec.name.as_str();
        let (template_path, template_source) = self.store.template(spec)?;

        let dependencies = state.graph.direct_deps(name);
        let ctx = SelectorContext {
            name,
            version: &version,
            settings,
        };
        let globals: Vec<&GlobalConstraint> =
            self.options.constraints.iter().filter(|c| c.when.matches(&ctx)).collect();

        let dependency_labels: Vec<String> = dependencies
            .iter()
            .map(|d| state.selected.get(d).map_or_else(|| d.clone(), |v| format!("{d}@{v}")))
            .collect();
        let hash = self.node_hash(spec, &version, &dependency_labels, &globals, &template_source, below);

        let identity = NodeIdentity {
            name,
            version: &version,
            hash: &hash,
            base: below.map(|n| n.image_ref.as_str()),
        };
        let tag = identity.tag();
        let image_id = identity.image_id().to_string();
        let image_ref = settings.backend.image_reference(&self.options.build_dir, &tag);

        let mut variables = chain_variables.clone();
        builtins::apply_node(&mut variables, &identity);
        for global in &globals {
            variables.set(&global.name, &global.value, Layer::Specification);
        }
        variables.extend(spec.variables.iter(), Layer::Specification);
        for (argument, declared) in &spec.arguments {
            if let Some(default) = &declared.default {
                variables.set(argument, default, Layer::Specification);
            }
        }
        variables.extend(self.options.arguments.iter().map(|(k, v)| (k.as_str(), v.as_str())), Layer::CommandLine);

        for (argument, declared) in &spec.arguments {
            if declared.required && !variables.contains(argument) {
                return Err(VelocityError::MissingArgument {
                    image: name.to_string(),
                    argument: argument.clone(),
                });
            }
        }

        if let Some(script) = &spec.prolog {
            let values = self.prolog.run(name, script, &variables.snapshot(), spec.path.as_deref())?;
            tracing::debug!("Prolog of {name} set {} variable(s)", values.len());
            variables.extend(values, Layer::Prolog);
        }

        let mut arguments: Vec<(String, String)> = Vec::new();
        let argument_names = spec
            .arguments
            .keys()
            .map(String::as_str)
            .chain(globals.iter().filter(|g| g.kind == ConstraintKind::Argument).map(|g| g.name.as_str()));
        for argument in argument_names {
            if arguments.iter().any(|(n, _)| n == argument) {
                continue;
            }
            if let Some(value) = variables.get(argument) {
                arguments.push((argument.to_string(), value.to_string()));
            }
        }

        Ok(ChainNode {
            name: name.to_string(),
            version,
            spec: spec.clone(),
            template_path,
            template_source,
            dependencies,
            arguments,
            variables,
            hash,
            image_id,
            tag,
            base: below.map(|n| n.image_ref.clone()),
            image_ref,
        })
    }

    /// sha256 over everything that determines the node's image.
    fn node_hash(
        &self,
        spec: &Specification,
        version: &Version,
        dependencies: &[String],
        globals: &[&GlobalConstraint],
        template_source: &str,
        below: Option<&ChainNode>,
    ) -> String {
        let settings = &self.options.settings;
        let pairs = |items: Vec<String>| items.join(",");

        let parts = [
            spec.name.clone(),
            version.to_string(),
            settings.system.clone(),
            settings.backend.name().to_string(),
            settings.distro.clone(),
            settings.arch.clone(),
            dependencies.join(","),
            pairs(spec.variables.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            pairs(
                spec.arguments
                    .iter()
                    .map(|(k, a)| format!("{k}={}", a.default.as_deref().unwrap_or_default()))
                    .collect(),
            ),
            pairs(globals.iter().map(|g| format!("{}={}", g.name, g.value)).collect()),
            pairs(self.options.arguments.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            hex::encode(Sha256::digest(template_source.as_bytes())),
            spec.files.join(","),
            spec.prolog.clone().unwrap_or_default(),
            below.map(|n| n.hash.clone()).unwrap_or_default(),
        ];

        hex::encode(Sha256::digest(parts.join("|").as_bytes()))
    }
}
