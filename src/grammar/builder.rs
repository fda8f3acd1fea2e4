//! Grammar construction from a registry.
//!
//! The builder expands one or more root names into production rules:
//!
//! 1. A referenced name becomes a choice over every available type that
//!    conforms to it, in registry order. When the only candidate is the named
//!    type itself, the reference points straight at its construct rule.
//! 2. Every admitted type gets a construct rule with one argument per
//!    participating parameter. Primitive parameters become terminal rules named
//!    `<Type>::<param>`, component parameters reference the component's rule and
//!    union parameters become a choice over their resolvable members.
//! 3. A type is expanded at most once; recursive composition shows up as a
//!    cycle in the rule graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use regex::Regex;
use tracing::{debug, info, warn};

use super::cfg::{Grammar, SamplingLimits};
use super::compat::CompatibilityChecker;
use super::production::{Alternative, ArgumentRule, Production, Symbol, Terminal};
use crate::error::{GrammarError, InterfaceIncompatible, RegistryError};
use crate::registry::{ParamType, Registry, NAME_SEPARATOR};

/// Result type alias for grammar construction.
pub type Result<T> = std::result::Result<T, GrammarError>;

/// Name of the start symbol when several roots are combined.
pub const MULTI_ROOT_START: &str = "$start";

/// How incompatible candidates are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Skip incompatible candidates and report them alongside the grammar.
    #[default]
    Collect,
    /// Abort on the first incompatible candidate encountered.
    FailFast,
}

/// A built grammar plus the candidates that were left out of it.
#[derive(Debug, Clone)]
pub struct GrammarBuild {
    pub grammar: Grammar,
    /// Incompatible candidates met during expansion, in discovery order.
    pub skipped: Vec<InterfaceIncompatible>,
}

/// Builds grammars from a registry.
///
/// # Example
///
/// ```ignore
/// let build = GrammarBuilder::new(&registry)
///     .exclude("CountVectorizerNoTokenize")
///     .build("Classifier")?;
/// let derivation = build.grammar.sample(&mut SeededSampler::new(0))?;
/// ```
#[derive(Debug, Clone)]
pub struct GrammarBuilder<'r> {
    registry: &'r Registry,
    excluded: BTreeSet<String>,
    exclude_pattern: Option<Regex>,
    mode: BuildMode,
    limits: SamplingLimits,
}

impl<'r> GrammarBuilder<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            excluded: BTreeSet::new(),
            exclude_pattern: None,
            mode: BuildMode::default(),
            limits: SamplingLimits::default(),
        }
    }

    /// Leaves a type out of every rule.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    /// Leaves several types out of every rule.
    pub fn exclude_all<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    /// Leaves out every type whose name matches `pattern`.
    pub fn exclude_matching(mut self, pattern: &str) -> std::result::Result<Self, RegistryError> {
        self.exclude_pattern = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Default sampling limits stored in the built grammar.
    pub fn limits(mut self, limits: SamplingLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Builds the grammar rooted at a type or interface name.
    pub fn build(&self, root: &str) -> Result<GrammarBuild> {
        self.build_many(&[root])
    }

    /// Builds one grammar whose start symbol chooses among several roots.
    ///
    /// In collect mode, roots that cannot be built are skipped as long as at
    /// least one remains.
    pub fn build_many(&self, roots: &[&str]) -> Result<GrammarBuild> {
        if roots.is_empty() {
            return Err(GrammarError::NoRoots);
        }

        let checker = self.checker();
        let mut expansion = Expansion::new(&checker, self.mode);

        let mut root_symbols = Vec::with_capacity(roots.len());
        let mut first_error = None;
        for root in roots {
            match expansion.root(root) {
                Ok(symbol) => root_symbols.push(symbol),
                Err(err) if self.mode == BuildMode::Collect && roots.len() > 1 => {
                    warn!(root = %root, error = %err, "Skipping root");
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        expansion.drain()?;

        let start = match root_symbols.len() {
            0 => {
                return Err(first_error.unwrap_or_else(|| GrammarError::EmptyRoot {
                    root: roots.join(", "),
                }))
            }
            1 => root_symbols.remove(0),
            _ => {
                let start = Symbol::new(MULTI_ROOT_START);
                let mut alternatives: Vec<Alternative> = Vec::new();
                for symbol in root_symbols {
                    if !alternatives.iter().any(|a| a.symbol == symbol) {
                        alternatives.push(Alternative::new(symbol));
                    }
                }
                expansion.insert(start.clone(), Production::Choice { alternatives })?;
                start
            }
        };

        let skipped = expansion.skipped;
        let grammar = Grammar::new(start, expansion.rules, self.limits)?;

        info!(
            roots = %roots.join(", "),
            rules = grammar.len(),
            types = grammar.type_names().len(),
            skipped = skipped.len(),
            "Built grammar"
        );

        Ok(GrammarBuild { grammar, skipped })
    }

    /// Compatibility of every registry type under this builder's exclusions.
    pub fn checker(&self) -> CompatibilityChecker<'r> {
        CompatibilityChecker::with_exclusions(self.registry, self.exclusions())
    }

    /// Explicit exclusions plus every registry name matching the pattern.
    fn exclusions(&self) -> BTreeSet<String> {
        let mut excluded = self.excluded.clone();
        if let Some(pattern) = &self.exclude_pattern {
            excluded.extend(
                self.registry
                    .iter()
                    .filter(|ty| pattern.is_match(&ty.name))
                    .map(|ty| ty.name.clone()),
            );
        }
        excluded
    }
}

/// Builds a grammar for `root` in collect mode with default limits.
///
/// Fails with `GrammarError::Incompatible` when the root type itself cannot be
/// resolved against the registry.
pub fn generate_cfg(root: &str, registry: &Registry) -> Result<Grammar> {
    GrammarBuilder::new(registry)
        .build(root)
        .map(|build| build.grammar)
}

/// Work state of one build call.
struct Expansion<'c, 'r> {
    checker: &'c CompatibilityChecker<'r>,
    mode: BuildMode,
    rules: BTreeMap<Symbol, Production>,
    /// Types queued or already expanded.
    queued: BTreeSet<String>,
    pending: VecDeque<String>,
    skipped: Vec<InterfaceIncompatible>,
    reported: BTreeSet<String>,
}

impl<'c, 'r> Expansion<'c, 'r> {
    fn new(checker: &'c CompatibilityChecker<'r>, mode: BuildMode) -> Self {
        Self {
            checker,
            mode,
            rules: BTreeMap::new(),
            queued: BTreeSet::new(),
            pending: VecDeque::new(),
            skipped: Vec::new(),
            reported: BTreeSet::new(),
        }
    }

    /// Resolves a root name to its symbol.
    fn root(&mut self, root: &str) -> Result<Symbol> {
        let registry = self.checker.registry();
        if !registry.is_known(root) {
            return Err(GrammarError::UnknownRoot(root.to_string()));
        }

        // A concrete root that cannot be built is reported even in collect mode.
        if registry.contains(root) && !self.checker.is_excluded(root) {
            if let Err(err) = self.checker.check(root) {
                let only_itself = registry.conforming(root).all(|ty| ty.name == root);
                if only_itself {
                    return Err(GrammarError::Incompatible(err));
                }
            }
        }

        self.reference(root)?
            .ok_or_else(|| GrammarError::EmptyRoot {
                root: root.to_string(),
            })
    }

    /// Symbol for a slot declared as `name`, or `None` if nothing can fill it.
    fn reference(&mut self, name: &str) -> Result<Option<Symbol>> {
        let registry = self.checker.registry();
        let mut candidates = Vec::new();

        for ty in registry.conforming(name) {
            if self.checker.is_excluded(&ty.name) {
                continue;
            }
            match self.checker.check(&ty.name) {
                Ok(_) => candidates.push(ty),
                Err(err) => self.reject(err)?,
            }
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        if candidates.len() == 1 && candidates[0].name == name {
            self.enqueue(name);
            return Ok(Some(type_symbol(name)));
        }

        let symbol = choice_symbol(name, registry.contains(name));
        if !self.rules.contains_key(&symbol) {
            let alternatives = candidates
                .iter()
                .map(|ty| Alternative::weighted(type_symbol(&ty.name), ty.weight))
                .collect();
            let names: Vec<String> = candidates.iter().map(|ty| ty.name.clone()).collect();
            self.insert(symbol.clone(), Production::Choice { alternatives })?;
            for candidate in names {
                self.enqueue(&candidate);
            }
        }
        Ok(Some(symbol))
    }

    fn reject(&mut self, err: InterfaceIncompatible) -> Result<()> {
        match self.mode {
            BuildMode::FailFast => Err(GrammarError::Incompatible(err)),
            BuildMode::Collect => {
                if self.reported.insert(err.type_name.clone()) {
                    warn!(
                        type_name = %err.type_name,
                        parameter = %err.parameter,
                        required = %err.required,
                        "Skipping incompatible candidate"
                    );
                    self.skipped.push(err);
                }
                Ok(())
            }
        }
    }

    fn enqueue(&mut self, name: &str) {
        if self.queued.insert(name.to_string()) {
            self.pending.push_back(name.to_string());
        }
    }

    /// Expands queued types until none are left.
    fn drain(&mut self) -> Result<()> {
        while let Some(name) = self.pending.pop_front() {
            self.construct(&name)?;
        }
        Ok(())
    }

    /// Emits the construct rule of one admitted type.
    fn construct(&mut self, name: &str) -> Result<()> {
        let registry = self.checker.registry();
        let ty = registry
            .get(name)
            .ok_or_else(|| GrammarError::UnknownRoot(name.to_string()))?;
        let resolution = self.checker.check(name)?.clone();

        let mut args = Vec::with_capacity(resolution.params.len());
        for &idx in &resolution.params {
            let param = &ty.params[idx];
            let base = format!("{}{}{}", ty.name, NAME_SEPARATOR, param.name);
            let symbol = self.param_symbol(&base, &param.kind)?.ok_or_else(|| {
                GrammarError::MalformedRule {
                    symbol: base.clone(),
                    message: format!("parameter '{}' resolved to nothing", param.name),
                }
            })?;
            args.push(ArgumentRule {
                name: param.name.clone(),
                symbol,
            });
        }

        if !resolution.dropped.is_empty() {
            debug!(type_name = %name, dropped = ?resolution.dropped, "Left optional parameters to defaults");
        }

        self.insert(
            type_symbol(name),
            Production::Construct {
                type_name: name.to_string(),
                args,
            },
        )
    }

    /// Symbol producing a value for a parameter domain.
    ///
    /// `base` names the rule when the domain needs one of its own.
    fn param_symbol(&mut self, base: &str, kind: &ParamType) -> Result<Option<Symbol>> {
        if let Some(terminal) = Terminal::from_param(kind) {
            let symbol = Symbol::new(base);
            self.insert(symbol.clone(), Production::Terminal { terminal })?;
            return Ok(Some(symbol));
        }

        match kind {
            ParamType::Component { component } => self.reference(component),
            ParamType::Union { members } => {
                let mut alternatives: Vec<Alternative> = Vec::new();
                for (i, member) in members.iter().enumerate() {
                    if !self.checker.resolves(member) {
                        continue;
                    }
                    let member_base = format!("{}{}{}", base, NAME_SEPARATOR, i);
                    if let Some(symbol) = self.param_symbol(&member_base, member)? {
                        if !alternatives.iter().any(|a| a.symbol == symbol) {
                            alternatives.push(Alternative::new(symbol));
                        }
                    }
                }
                if alternatives.is_empty() {
                    return Ok(None);
                }
                let symbol = Symbol::new(base);
                self.insert(symbol.clone(), Production::Choice { alternatives })?;
                Ok(Some(symbol))
            }
            _ => Ok(None),
        }
    }

    /// Adds a rule, refusing to overwrite a different rule under the same name.
    fn insert(&mut self, symbol: Symbol, production: Production) -> Result<()> {
        if let Some(existing) = self.rules.get(&symbol) {
            if *existing != production {
                return Err(GrammarError::MalformedRule {
                    symbol: symbol.as_str().to_string(),
                    message: "two different rules share this name".to_string(),
                });
            }
            return Ok(());
        }
        debug!(symbol = %symbol, production = %production, "Added rule");
        self.rules.insert(symbol, production);
        Ok(())
    }
}

fn type_symbol(name: &str) -> Symbol {
    Symbol::new(name)
}

/// Choice symbols for a name that is also a concrete type get a `*` suffix
/// so they never collide with that type's construct rule.
fn choice_symbol(name: &str, is_type: bool) -> Symbol {
    if is_type {
        Symbol::new(format!("{}*", name))
    } else {
        Symbol::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IncompatibilityReason;
    use crate::registry::ComponentType;
    use crate::sampler::SeededSampler;

    fn abc_registry() -> Registry {
        Registry::builder()
            .add(ComponentType::new("A").param("x", ParamType::discrete(0, 10)))
            .add(
                ComponentType::new("B")
                    .implements("Model")
                    .param("a", ParamType::component("A")),
            )
            .add(
                ComponentType::new("C")
                    .implements("Model")
                    .param("a", ParamType::component("A"))
                    .param("flag", ParamType::boolean()),
            )
            .build()
            .expect("registry should build")
    }

    #[test]
    fn test_build_abc_structure() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry)
            .build("Model")
            .expect("grammar should build");
        let grammar = &build.grammar;

        assert!(build.skipped.is_empty());
        assert_eq!(grammar.start(), &Symbol::new("Model"));
        assert_eq!(
            grammar.production(&Symbol::new("Model")),
            Some(&Production::Choice {
                alternatives: vec![
                    Alternative::new(Symbol::new("B")),
                    Alternative::new(Symbol::new("C")),
                ]
            })
        );
        assert_eq!(
            grammar
                .production(&Symbol::new("B"))
                .map(|p| p.references().len()),
            Some(1)
        );
        assert!(matches!(
            grammar.production(&Symbol::new("A::x")),
            Some(Production::Terminal {
                terminal: Terminal::Discrete { min: 0, max: 10, .. }
            })
        ));
        assert!(matches!(
            grammar.production(&Symbol::new("C::flag")),
            Some(Production::Terminal {
                terminal: Terminal::Boolean
            })
        ));
        // Model, B, C, A, A::x, C::flag
        assert_eq!(grammar.len(), 6);
    }

    #[test]
    fn test_zero_parameter_type() {
        let registry = Registry::builder()
            .add(ComponentType::new("Identity"))
            .build()
            .expect("registry should build");
        let grammar = generate_cfg("Identity", &registry).expect("grammar should build");
        assert_eq!(
            grammar.production(&Symbol::new("Identity")),
            Some(&Production::Construct {
                type_name: "Identity".to_string(),
                args: vec![]
            })
        );
        let d = grammar
            .sample(&mut SeededSampler::new(0))
            .expect("sample");
        assert_eq!(d.to_string(), "Identity()");
    }

    #[test]
    fn test_unknown_root() {
        let registry = abc_registry();
        assert!(matches!(
            GrammarBuilder::new(&registry).build("Nope"),
            Err(GrammarError::UnknownRoot(ref r)) if r == "Nope"
        ));
    }

    #[test]
    fn test_incompatible_concrete_root_is_error_in_collect_mode() {
        let registry = Registry::builder()
            .add(ComponentType::new("Stacker").param("base", ParamType::component("Regressor")))
            .build()
            .expect("registry should build");
        assert!(matches!(
            generate_cfg("Stacker", &registry),
            Err(GrammarError::Incompatible(ref e)) if e.reason == IncompatibilityReason::NoImplementation
        ));
    }

    #[test]
    fn test_collect_vs_fail_fast() {
        let registry = Registry::builder()
            .add(ComponentType::new("Good").implements("Model"))
            .add(
                ComponentType::new("Bad")
                    .implements("Model")
                    .param("base", ParamType::component("Missing")),
            )
            .build()
            .expect("registry should build");

        let build = GrammarBuilder::new(&registry)
            .build("Model")
            .expect("collect mode should succeed");
        assert_eq!(build.skipped.len(), 1);
        assert_eq!(build.skipped[0].type_name, "Bad");
        // Only Good remains, and it is not the root name itself, so a choice stays.
        assert_eq!(
            build.grammar.alternative_count(&Symbol::new("Model")),
            Some(1)
        );
        assert!(!build.grammar.type_names().contains(&"Bad"));

        let result = GrammarBuilder::new(&registry)
            .mode(BuildMode::FailFast)
            .build("Model");
        assert!(matches!(
            result,
            Err(GrammarError::Incompatible(ref e)) if e.type_name == "Bad"
        ));
    }

    #[test]
    fn test_exclusion_removes_type_everywhere() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry)
            .exclude("C")
            .build("Model")
            .expect("grammar should build");
        assert!(!build.grammar.type_names().contains(&"C"));
        assert!(build.skipped.is_empty());
        for production in build.grammar.rules().values() {
            assert!(production.references().iter().all(|s| s.as_str() != "C"));
        }
    }

    #[test]
    fn test_exclude_matching_pattern() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry)
            .exclude_matching("^[BC]$")
            .expect("valid pattern")
            .build("A")
            .expect("A still builds");
        assert_eq!(build.grammar.type_names(), vec!["A"]);

        let result = GrammarBuilder::new(&registry)
            .exclude_matching("^[BC]$")
            .expect("valid pattern")
            .build("Model");
        assert!(matches!(result, Err(GrammarError::EmptyRoot { ref root }) if root == "Model"));
    }

    #[test]
    fn test_excluding_required_dependency_skips_dependents() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry).exclude("A").build("Model");
        assert!(matches!(build, Err(GrammarError::EmptyRoot { .. })));
    }

    #[test]
    fn test_recursive_composite_is_a_cycle() {
        let registry = Registry::builder()
            .add(
                ComponentType::new("Leaf")
                    .implements("Estimator")
                    .param("alpha", ParamType::continuous(0.0, 1.0)),
            )
            .add(
                ComponentType::new("Pipeline")
                    .implements("Estimator")
                    .param("first", ParamType::component("Estimator"))
                    .param("second", ParamType::component("Estimator")),
            )
            .build()
            .expect("registry should build");

        let grammar = generate_cfg("Estimator", &registry).expect("grammar should build");
        let pipeline = grammar
            .production(&Symbol::new("Pipeline"))
            .expect("pipeline rule");
        assert!(pipeline
            .references()
            .iter()
            .all(|s| s.as_str() == "Estimator"));
        // Estimator, Leaf, Leaf::alpha, Pipeline
        assert_eq!(grammar.len(), 4);
    }

    #[test]
    fn test_named_type_with_subtypes_uses_star_symbol() {
        let registry = Registry::builder()
            .add(ComponentType::new("Scaler"))
            .add(
                ComponentType::new("RobustScaler")
                    .implements("Scaler")
                    .param("q", ParamType::continuous(0.0, 0.5)),
            )
            .build()
            .expect("registry should build");
        let grammar = generate_cfg("Scaler", &registry).expect("grammar should build");
        assert_eq!(grammar.start(), &Symbol::new("Scaler*"));
        assert_eq!(grammar.alternative_count(&Symbol::new("Scaler*")), Some(2));
        assert!(grammar.production(&Symbol::new("Scaler")).is_some());
    }

    #[test]
    fn test_union_parameter_and_optional_drop() {
        let registry = Registry::builder()
            .add(ComponentType::new("Scaler").implements("Transformer"))
            .add(
                ComponentType::new("Model")
                    .param(
                        "prep",
                        ParamType::union(vec![
                            ParamType::component("Transformer"),
                            ParamType::component("Missing"),
                            ParamType::categorical(["passthrough"]),
                        ]),
                    )
                    .optional_param(
                        "memory",
                        ParamType::Opaque {
                            annotation: "Memory".to_string(),
                        },
                        serde_json::Value::Null,
                    ),
            )
            .build()
            .expect("registry should build");

        let grammar = generate_cfg("Model", &registry).expect("grammar should build");
        assert_eq!(
            grammar.production(&Symbol::new("Model")),
            Some(&Production::Construct {
                type_name: "Model".to_string(),
                args: vec![ArgumentRule {
                    name: "prep".to_string(),
                    symbol: Symbol::new("Model::prep"),
                }],
            })
        );
        assert_eq!(
            grammar.production(&Symbol::new("Model::prep")),
            Some(&Production::Choice {
                alternatives: vec![
                    Alternative::new(Symbol::new("Transformer")),
                    Alternative::new(Symbol::new("Model::prep::2")),
                ]
            })
        );
    }

    #[test]
    fn test_generated_symbols_never_clash_with_type_names() {
        let registry = Registry::builder()
            .add(
                ComponentType::new("A")
                    .implements("M")
                    .param("x", ParamType::discrete(0, 3))
                    .param(
                        "p",
                        ParamType::union(vec![ParamType::boolean(), ParamType::discrete(0, 1)]),
                    )
                    .param("p_0", ParamType::categorical(["only"])),
            )
            .add(ComponentType::new("A_x").implements("M"))
            .add(ComponentType::new("p_0").implements("M"))
            .build()
            .expect("registry should build");

        let build = GrammarBuilder::new(&registry)
            .build("M")
            .expect("grammar should build");
        assert!(build.skipped.is_empty());
        let grammar = &build.grammar;
        assert_eq!(grammar.alternative_count(&Symbol::new("M")), Some(3));
        assert!(matches!(
            grammar.production(&Symbol::new("A::x")),
            Some(Production::Terminal { .. })
        ));
        assert!(matches!(
            grammar.production(&Symbol::new("A_x")),
            Some(Production::Construct { ref type_name, .. }) if type_name == "A_x"
        ));
        assert_eq!(grammar.alternative_count(&Symbol::new("A::p")), Some(2));
        assert!(grammar.production(&Symbol::new("A::p::0")).is_some());
        assert!(grammar.production(&Symbol::new("A::p_0")).is_some());

        let root = SeededSampler::new(4);
        for i in 0..50 {
            let d = grammar.sample(&mut root.derive(i)).expect("sample");
            assert!(grammar.derives(&d));
        }
    }

    #[test]
    fn test_build_many_roots() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry)
            .build_many(&["B", "C"])
            .expect("grammar should build");
        assert_eq!(build.grammar.start(), &Symbol::new(MULTI_ROOT_START));
        assert_eq!(
            build.grammar.alternative_count(&Symbol::new(MULTI_ROOT_START)),
            Some(2)
        );
        assert!(matches!(
            GrammarBuilder::new(&registry).build_many(&[]),
            Err(GrammarError::NoRoots)
        ));
    }

    #[test]
    fn test_build_many_collect_skips_bad_root() {
        let registry = abc_registry();
        let build = GrammarBuilder::new(&registry)
            .build_many(&["B", "Nope"])
            .expect("one good root is enough");
        assert_eq!(build.grammar.start(), &Symbol::new("B"));
    }

    #[test]
    fn test_type_weights_become_alternative_weights() {
        let registry = Registry::builder()
            .add(ComponentType::new("Rare").implements("Model").with_weight(0.5))
            .add(ComponentType::new("Common").implements("Model"))
            .build()
            .expect("registry should build");
        let grammar = generate_cfg("Model", &registry).expect("grammar should build");
        assert_eq!(
            grammar.production(&Symbol::new("Model")),
            Some(&Production::Choice {
                alternatives: vec![
                    Alternative::weighted(Symbol::new("Rare"), 0.5),
                    Alternative::new(Symbol::new("Common")),
                ]
            })
        );
    }
}
