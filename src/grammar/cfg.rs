//! The immutable grammar and its sampling procedure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::derivation::{Argument, Derivation, Instance};
use super::production::{Alternative, Production, Symbol};
use crate::error::{GrammarError, SamplingError};
use crate::sampler::Sampler;

/// Default depth budget before sampling is biased towards terminals.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Default cap on expanded symbols per sampling pass.
pub const DEFAULT_MAX_EXPANSIONS: usize = 10_000;

/// Termination controls for one sampling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingLimits {
    /// Depth after which choices only consider the shortest-terminating
    /// alternatives.
    pub max_depth: usize,
    /// Hard cap on expanded symbols.
    pub max_expansions: usize,
}

impl Default for SamplingLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

/// Serialized form of a grammar; deserialization re-validates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GrammarParts {
    start: Symbol,
    rules: BTreeMap<Symbol, Production>,
    #[serde(default)]
    limits: SamplingLimits,
}

/// A validated set of production rules with a start symbol.
///
/// Built once, then shared read-only between any number of sampling passes.
/// Each rule knows its minimal derivation height, which drives the terminal
/// bias that guarantees sampling terminates even through recursive rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GrammarParts", into = "GrammarParts")]
pub struct Grammar {
    start: Symbol,
    rules: BTreeMap<Symbol, Production>,
    limits: SamplingLimits,
    heights: BTreeMap<Symbol, usize>,
}

impl TryFrom<GrammarParts> for Grammar {
    type Error = GrammarError;

    fn try_from(parts: GrammarParts) -> Result<Self, Self::Error> {
        Grammar::new(parts.start, parts.rules, parts.limits)
    }
}

impl From<Grammar> for GrammarParts {
    fn from(grammar: Grammar) -> Self {
        GrammarParts {
            start: grammar.start,
            rules: grammar.rules,
            limits: grammar.limits,
        }
    }
}

impl Grammar {
    /// Validates and assembles a grammar.
    ///
    /// # Errors
    ///
    /// - `MissingStart` if the start symbol has no rule
    /// - `UndefinedSymbol` if any rule references a symbol without a rule
    /// - `MalformedRule` for choice rules without alternatives or with
    ///   non-positive weights
    /// - `NoFiniteDerivation` if the start symbol can never finish
    pub fn new(
        start: Symbol,
        rules: BTreeMap<Symbol, Production>,
        limits: SamplingLimits,
    ) -> Result<Self, GrammarError> {
        if !rules.contains_key(&start) {
            return Err(GrammarError::MissingStart(start.as_str().to_string()));
        }

        for (symbol, production) in &rules {
            if let Production::Choice { alternatives } = production {
                if alternatives.is_empty() {
                    return Err(GrammarError::MalformedRule {
                        symbol: symbol.as_str().to_string(),
                        message: "choice without alternatives".to_string(),
                    });
                }
                if alternatives
                    .iter()
                    .any(|a| !a.weight.is_finite() || a.weight <= 0.0)
                {
                    return Err(GrammarError::MalformedRule {
                        symbol: symbol.as_str().to_string(),
                        message: "alternative weights must be finite and positive".to_string(),
                    });
                }
            }
            for referenced in production.references() {
                if !rules.contains_key(referenced) {
                    return Err(GrammarError::UndefinedSymbol {
                        symbol: referenced.as_str().to_string(),
                        referenced_by: symbol.as_str().to_string(),
                    });
                }
            }
        }

        let heights = min_heights(&rules);
        if !heights.contains_key(&start) {
            return Err(GrammarError::NoFiniteDerivation {
                root: start.as_str().to_string(),
            });
        }

        Ok(Self {
            start,
            rules,
            limits,
            heights,
        })
    }

    /// The start symbol.
    pub fn start(&self) -> &Symbol {
        &self.start
    }

    /// All rules, ordered by symbol.
    pub fn rules(&self) -> &BTreeMap<Symbol, Production> {
        &self.rules
    }

    /// The rule for a symbol.
    pub fn production(&self, symbol: &Symbol) -> Option<&Production> {
        self.rules.get(symbol)
    }

    /// All symbols, ordered.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.rules.keys()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of alternatives of a symbol's rule.
    pub fn alternative_count(&self, symbol: &Symbol) -> Option<usize> {
        self.rules.get(symbol).map(Production::alternative_count)
    }

    /// Height of the shortest complete derivation from `symbol`, or `None`
    /// if it can never finish.
    pub fn min_height(&self, symbol: &Symbol) -> Option<usize> {
        self.heights.get(symbol).copied()
    }

    /// Default limits used by [`sample`](Self::sample).
    pub fn limits(&self) -> SamplingLimits {
        self.limits
    }

    /// Returns the same grammar with other default limits.
    pub fn with_limits(mut self, limits: SamplingLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Type names that appear in some construct rule, ordered.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .rules
            .values()
            .filter_map(|p| match p {
                Production::Construct { type_name, .. } => Some(type_name.as_str()),
                _ => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// SHA-256 over the BNF rendering, hex-encoded.
    ///
    /// Two grammars with the same symbols and productions share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Samples one derivation using the grammar's default limits.
    pub fn sample<S: Sampler + ?Sized>(&self, sampler: &mut S) -> Result<Derivation, SamplingError> {
        self.sample_with(sampler, self.limits)
    }

    /// Samples one derivation with explicit limits.
    pub fn sample_with<S: Sampler + ?Sized>(
        &self,
        sampler: &mut S,
        limits: SamplingLimits,
    ) -> Result<Derivation, SamplingError> {
        let mut pass = Pass {
            grammar: self,
            sampler,
            limits,
            expansions: 0,
        };
        pass.expand(&self.start, 0)
    }

    /// Checks that a derivation could have been produced from the start symbol,
    /// with every value inside its declared domain.
    pub fn derives(&self, derivation: &Derivation) -> bool {
        self.derives_from(&self.start, derivation, &mut Vec::new())
    }

    /// `choices` holds the choice symbols entered for this derivation node.
    /// A choice chain that comes back to one of them consumed nothing, so it
    /// is cut off there.
    fn derives_from<'a>(
        &'a self,
        symbol: &'a Symbol,
        derivation: &Derivation,
        choices: &mut Vec<&'a Symbol>,
    ) -> bool {
        match self.rules.get(symbol) {
            Some(Production::Choice { alternatives }) => {
                if choices.contains(&symbol) {
                    return false;
                }
                choices.push(symbol);
                let found = alternatives
                    .iter()
                    .any(|a| self.derives_from(&a.symbol, derivation, choices));
                choices.pop();
                found
            }
            Some(Production::Construct { type_name, args }) => match derivation {
                Derivation::Component(instance) => {
                    instance.type_name == *type_name
                        && instance.args.len() == args.len()
                        && instance.args.iter().zip(args).all(|(got, rule)| {
                            got.name == rule.name
                                && self.derives_from(&rule.symbol, &got.value, &mut Vec::new())
                        })
                }
                _ => false,
            },
            Some(Production::Terminal { terminal }) => terminal.contains(derivation),
            None => false,
        }
    }
}

impl fmt::Display for Grammar {
    /// BNF rendering, start rule first, then the rest in symbol order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(production) = self.rules.get(&self.start) {
            writeln!(f, "{} := {}", self.start, production)?;
        }
        for (symbol, production) in &self.rules {
            if *symbol != self.start {
                writeln!(f, "{} := {}", symbol, production)?;
            }
        }
        Ok(())
    }
}

/// Shortest derivation height per symbol; unproductive symbols are absent.
///
/// Terminals have height 1; a construct rule is one more than its tallest
/// argument; a choice is one more than its shortest alternative.
fn min_heights(rules: &BTreeMap<Symbol, Production>) -> BTreeMap<Symbol, usize> {
    let mut heights: BTreeMap<Symbol, usize> = BTreeMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for (symbol, production) in rules {
            let candidate = match production {
                Production::Terminal { .. } => Some(1),
                Production::Construct { args, .. } => args
                    .iter()
                    .map(|a| heights.get(&a.symbol).copied())
                    .try_fold(0usize, |acc, h| h.map(|h| acc.max(h)))
                    .map(|h| h + 1),
                Production::Choice { alternatives } => alternatives
                    .iter()
                    .filter_map(|a| heights.get(&a.symbol).copied())
                    .min()
                    .map(|h| h + 1),
            };
            if let Some(height) = candidate {
                let improves = heights.get(symbol).is_none_or(|&current| height < current);
                if improves {
                    heights.insert(symbol.clone(), height);
                    changed = true;
                }
            }
        }
    }
    heights
}

/// State of one sampling pass.
struct Pass<'g, 's, S: Sampler + ?Sized> {
    grammar: &'g Grammar,
    sampler: &'s mut S,
    limits: SamplingLimits,
    expansions: usize,
}

impl<S: Sampler + ?Sized> Pass<'_, '_, S> {
    fn expand(&mut self, symbol: &Symbol, depth: usize) -> Result<Derivation, SamplingError> {
        self.expansions += 1;
        if self.expansions > self.limits.max_expansions {
            return Err(SamplingError::ExpansionLimit {
                limit: self.limits.max_expansions,
                start: self.grammar.start.as_str().to_string(),
            });
        }

        let grammar = self.grammar;
        let production = grammar
            .rules
            .get(symbol)
            .ok_or_else(|| SamplingError::UndefinedSymbol {
                symbol: symbol.as_str().to_string(),
                start: grammar.start.as_str().to_string(),
            })?;

        match production {
            Production::Choice { alternatives } => {
                let chosen = self.choose(symbol, alternatives, depth)?;
                self.expand(&chosen.symbol, depth + 1)
            }
            Production::Construct { type_name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.expand(&arg.symbol, depth + 1)?;
                    values.push(Argument {
                        name: arg.name.clone(),
                        value,
                    });
                }
                Ok(Derivation::Component(Instance {
                    type_name: type_name.clone(),
                    args: values,
                }))
            }
            Production::Terminal { terminal } => {
                terminal.sample(symbol.as_str(), &mut *self.sampler)
            }
        }
    }

    /// Picks an alternative. Only alternatives that can finish within the
    /// remaining depth budget are eligible; when none can, the ones with the
    /// shortest derivation are.
    fn choose<'a>(
        &mut self,
        symbol: &Symbol,
        alternatives: &'a [Alternative],
        depth: usize,
    ) -> Result<&'a Alternative, SamplingError> {
        let grammar = self.grammar;
        let finite: Vec<(&Alternative, usize)> = alternatives
            .iter()
            .filter_map(|a| grammar.heights.get(&a.symbol).map(|&h| (a, h)))
            .collect();

        if finite.is_empty() {
            return Err(SamplingError::NoAlternatives {
                symbol: symbol.as_str().to_string(),
                start: grammar.start.as_str().to_string(),
            });
        }

        let mut eligible: Vec<&Alternative> = finite
            .iter()
            .filter(|(_, h)| depth + h <= self.limits.max_depth)
            .map(|(a, _)| *a)
            .collect();
        if eligible.is_empty() {
            let shortest = finite.iter().map(|(_, h)| *h).min().unwrap_or(0);
            eligible = finite
                .iter()
                .filter(|(_, h)| *h == shortest)
                .map(|(a, _)| *a)
                .collect();
        }

        let first_weight = eligible[0].weight;
        let index = if eligible.iter().all(|a| a.weight == first_weight) {
            self.sampler.choice(symbol.as_str(), eligible.len())?
        } else {
            let weights: Vec<f64> = eligible.iter().map(|a| a.weight).collect();
            self.sampler.weighted_choice(symbol.as_str(), &weights)?
        };

        eligible
            .get(index)
            .copied()
            .ok_or_else(|| SamplingError::InvalidDomain {
                handle: symbol.as_str().to_string(),
                message: format!("alternative index {} out of range", index),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::production::{ArgumentRule, Terminal};
    use crate::registry::Distribution;
    use crate::sampler::{ReplaySampler, SeededSampler};

    fn terminal(min: i64, max: i64) -> Production {
        Production::Terminal {
            terminal: Terminal::Discrete {
                min,
                max,
                distribution: Distribution::Uniform,
            },
        }
    }

    fn construct(type_name: &str, args: &[(&str, &str)]) -> Production {
        Production::Construct {
            type_name: type_name.to_string(),
            args: args
                .iter()
                .map(|(name, symbol)| ArgumentRule {
                    name: name.to_string(),
                    symbol: Symbol::new(*symbol),
                })
                .collect(),
        }
    }

    fn choice(symbols: &[&str]) -> Production {
        Production::Choice {
            alternatives: symbols
                .iter()
                .map(|s| Alternative::new(Symbol::new(*s)))
                .collect(),
        }
    }

    /// Estimator := Leaf | Chain ; Chain(first: Estimator, second: Estimator)
    fn recursive_rules() -> BTreeMap<Symbol, Production> {
        let mut rules = BTreeMap::new();
        rules.insert(Symbol::new("Estimator"), choice(&["Leaf", "Chain"]));
        rules.insert(Symbol::new("Leaf"), construct("Leaf", &[("k", "Leaf_k")]));
        rules.insert(Symbol::new("Leaf_k"), terminal(1, 5));
        rules.insert(
            Symbol::new("Chain"),
            construct("Chain", &[("first", "Estimator"), ("second", "Estimator")]),
        );
        rules
    }

    #[test]
    fn test_new_rejects_missing_start() {
        let result = Grammar::new(Symbol::new("X"), BTreeMap::new(), SamplingLimits::default());
        assert!(matches!(result, Err(GrammarError::MissingStart(ref s)) if s == "X"));
    }

    #[test]
    fn test_new_rejects_undefined_reference() {
        let mut rules = BTreeMap::new();
        rules.insert(Symbol::new("A"), construct("A", &[("x", "A::x")]));
        let result = Grammar::new(Symbol::new("A"), rules, SamplingLimits::default());
        assert!(matches!(
            result,
            Err(GrammarError::UndefinedSymbol { ref symbol, ref referenced_by })
                if symbol == "A::x" && referenced_by == "A"
        ));
    }

    #[test]
    fn test_new_rejects_empty_choice() {
        let mut rules = BTreeMap::new();
        rules.insert(Symbol::new("S"), choice(&[]));
        assert!(matches!(
            Grammar::new(Symbol::new("S"), rules, SamplingLimits::default()),
            Err(GrammarError::MalformedRule { .. })
        ));
    }

    #[test]
    fn test_new_rejects_unproductive_start() {
        let mut rules = BTreeMap::new();
        rules.insert(Symbol::new("Loop"), construct("Loop", &[("inner", "Loop")]));
        assert!(matches!(
            Grammar::new(Symbol::new("Loop"), rules, SamplingLimits::default()),
            Err(GrammarError::NoFiniteDerivation { .. })
        ));
    }

    #[test]
    fn test_min_heights() {
        let grammar = Grammar::new(
            Symbol::new("Estimator"),
            recursive_rules(),
            SamplingLimits::default(),
        )
        .expect("grammar should be valid");
        assert_eq!(grammar.min_height(&Symbol::new("Leaf_k")), Some(1));
        assert_eq!(grammar.min_height(&Symbol::new("Leaf")), Some(2));
        assert_eq!(grammar.min_height(&Symbol::new("Estimator")), Some(3));
        assert_eq!(grammar.min_height(&Symbol::new("Chain")), Some(4));
    }

    #[test]
    fn test_recursive_sampling_terminates_within_depth() {
        let limits = SamplingLimits {
            max_depth: 6,
            max_expansions: 10_000,
        };
        let grammar = Grammar::new(Symbol::new("Estimator"), recursive_rules(), limits)
            .expect("grammar should be valid");

        let mut sampler = SeededSampler::new(0);
        let mut saw_chain = false;
        for _ in 0..1000 {
            let d = grammar.sample(&mut sampler).expect("sampling should terminate");
            assert!(grammar.derives(&d));
            // Choice, construct and terminal levels: at most three levels per chain step.
            assert!(d.depth() <= limits.max_depth);
            saw_chain |= d.type_name() == Some("Chain");
        }
        assert!(saw_chain);
    }

    #[test]
    fn test_zero_depth_budget_still_terminates() {
        let limits = SamplingLimits {
            max_depth: 0,
            max_expansions: 100,
        };
        let grammar = Grammar::new(Symbol::new("Estimator"), recursive_rules(), limits)
            .expect("grammar should be valid");
        let mut sampler = SeededSampler::new(1);
        for _ in 0..100 {
            let d = grammar.sample(&mut sampler).expect("sample");
            assert_eq!(d.type_name(), Some("Leaf"));
        }
    }

    #[test]
    fn test_expansion_limit_reported() {
        let limits = SamplingLimits {
            max_depth: 64,
            max_expansions: 3,
        };
        let grammar = Grammar::new(Symbol::new("Chain"), recursive_rules(), limits)
            .expect("grammar should be valid");
        let mut sampler = SeededSampler::new(0);
        assert!(matches!(
            grammar.sample(&mut sampler),
            Err(SamplingError::ExpansionLimit { limit: 3, ref start }) if start == "Chain"
        ));
    }

    #[test]
    fn test_weighted_alternatives_skip_zero_mass() {
        let mut rules = BTreeMap::new();
        rules.insert(
            Symbol::new("S"),
            Production::Choice {
                alternatives: vec![
                    Alternative::weighted(Symbol::new("A"), 1.0),
                    Alternative::weighted(Symbol::new("B"), 3.0),
                ],
            },
        );
        rules.insert(Symbol::new("A"), construct("A", &[]));
        rules.insert(Symbol::new("B"), construct("B", &[]));
        let grammar = Grammar::new(Symbol::new("S"), rules, SamplingLimits::default())
            .expect("grammar should be valid");

        let mut sampler = SeededSampler::new(4);
        let mut b_count = 0;
        for _ in 0..2000 {
            if grammar.sample(&mut sampler).expect("sample").type_name() == Some("B") {
                b_count += 1;
            }
        }
        // Expect roughly 75% B.
        assert!(b_count > 1300 && b_count < 1700, "b_count = {}", b_count);
    }

    #[test]
    fn test_replay_reproduces_derivation() {
        let grammar = Grammar::new(
            Symbol::new("Estimator"),
            recursive_rules(),
            SamplingLimits::default(),
        )
        .expect("grammar should be valid");

        let mut recorder = SeededSampler::new(99).recording();
        let original = grammar.sample(&mut recorder).expect("sample");
        let log = recorder.take_log().expect("recording enabled");

        let mut replay = ReplaySampler::new(log);
        let replayed = grammar.sample(&mut replay).expect("replay");
        assert_eq!(replayed, original);
        assert!(replay.is_finished());
    }

    #[test]
    fn test_display_starts_with_start_rule() {
        let grammar = Grammar::new(
            Symbol::new("Estimator"),
            recursive_rules(),
            SamplingLimits::default(),
        )
        .expect("grammar should be valid");
        let bnf = grammar.to_string();
        let first = bnf.lines().next().expect("non-empty");
        assert_eq!(first, "<Estimator> := <Leaf> | <Chain>");
        assert!(bnf.contains("<Leaf_k> := discrete(min=1, max=5)"));
        assert_eq!(bnf.lines().count(), 4);
    }

    #[test]
    fn test_json_round_trip_revalidates() {
        let grammar = Grammar::new(
            Symbol::new("Estimator"),
            recursive_rules(),
            SamplingLimits::default(),
        )
        .expect("grammar should be valid");
        let json = serde_json::to_string(&grammar).expect("serialize");
        let back: Grammar = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, grammar);
        assert_eq!(back.fingerprint(), grammar.fingerprint());

        let broken = json.replace("\"Leaf_k\":", "\"Leaf_q\":");
        assert!(serde_json::from_str::<Grammar>(&broken).is_err());
    }

    #[test]
    fn test_derives_rejects_out_of_domain() {
        let grammar = Grammar::new(
            Symbol::new("Estimator"),
            recursive_rules(),
            SamplingLimits::default(),
        )
        .expect("grammar should be valid");
        let bad = Derivation::Component(Instance {
            type_name: "Leaf".to_string(),
            args: vec![Argument {
                name: "k".to_string(),
                value: Derivation::Int(42),
            }],
        });
        assert!(!grammar.derives(&bad));
    }

    #[test]
    fn test_derives_terminates_on_choice_cycle() {
        // X := Y | T ; Y := X
        let mut rules = BTreeMap::new();
        rules.insert(Symbol::new("X"), choice(&["Y", "T"]));
        rules.insert(Symbol::new("Y"), choice(&["X"]));
        rules.insert(Symbol::new("T"), terminal(0, 1));
        let grammar = Grammar::new(Symbol::new("X"), rules, SamplingLimits::default())
            .expect("grammar should be valid");

        let mut sampler = SeededSampler::new(0);
        for _ in 0..20 {
            let d = grammar.sample(&mut sampler).expect("sample");
            assert!(grammar.derives(&d));
        }
        assert!(!grammar.derives(&Derivation::Int(7)));
        assert!(!grammar.derives(&Derivation::Bool(true)));

        let json = serde_json::to_string(&grammar).expect("serialize");
        let back: Grammar = serde_json::from_str(&json).expect("deserialize");
        assert!(!back.derives(&Derivation::Int(-1)));
        assert!(back.derives(&Derivation::Int(1)));
    }
}
