//! Production rules: symbols, alternatives and terminal domains.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::derivation::Derivation;
use crate::error::SamplingError;
use crate::registry::{Distribution, ParamType};
use crate::sampler::Sampler;

/// Name of a grammar rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

fn default_weight() -> f64 {
    1.0
}

fn is_default_weight(weight: &f64) -> bool {
    *weight == 1.0
}

/// One option of a choice rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub symbol: Symbol,
    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: f64,
}

impl Alternative {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            weight: default_weight(),
        }
    }

    pub fn weighted(symbol: Symbol, weight: f64) -> Self {
        Self { symbol, weight }
    }
}

/// A constructor argument bound to the symbol that produces its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentRule {
    pub name: String,
    pub symbol: Symbol,
}

/// A value domain at the leaves of the grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Terminal {
    Boolean,
    Discrete {
        min: i64,
        max: i64,
        #[serde(default)]
        distribution: Distribution,
    },
    Continuous {
        min: f64,
        max: f64,
        #[serde(default)]
        distribution: Distribution,
    },
    Categorical {
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        weights: Vec<f64>,
    },
    Subset {
        options: Vec<String>,
    },
}

impl Terminal {
    /// Terminal for a primitive parameter domain, `None` for anything else.
    pub fn from_param(kind: &ParamType) -> Option<Terminal> {
        let terminal = match kind {
            ParamType::Boolean => Terminal::Boolean,
            ParamType::Discrete {
                min,
                max,
                distribution,
            } => Terminal::Discrete {
                min: *min,
                max: *max,
                distribution: *distribution,
            },
            ParamType::Continuous {
                min,
                max,
                distribution,
            } => Terminal::Continuous {
                min: *min,
                max: *max,
                distribution: *distribution,
            },
            ParamType::Categorical { options, weights } => Terminal::Categorical {
                options: options.clone(),
                weights: weights.clone(),
            },
            ParamType::Subset { options } => Terminal::Subset {
                options: options.clone(),
            },
            ParamType::Component { .. } | ParamType::Union { .. } | ParamType::Opaque { .. } => {
                return None
            }
        };
        Some(terminal)
    }

    /// Draws one value from the domain.
    pub fn sample<S: Sampler + ?Sized>(
        &self,
        handle: &str,
        sampler: &mut S,
    ) -> Result<Derivation, SamplingError> {
        let value = match self {
            Terminal::Boolean => Derivation::Bool(sampler.boolean(handle)?),
            Terminal::Discrete {
                min,
                max,
                distribution,
            } => Derivation::Int(sampler.discrete(handle, *min, *max, *distribution)?),
            Terminal::Continuous {
                min,
                max,
                distribution,
            } => Derivation::Float(sampler.continuous(handle, *min, *max, *distribution)?),
            Terminal::Categorical { options, weights } => {
                let index = if weights.is_empty() {
                    sampler.choice(handle, options.len())?
                } else {
                    sampler.weighted_choice(handle, weights)?
                };
                let option = options.get(index).ok_or_else(|| SamplingError::InvalidDomain {
                    handle: handle.to_string(),
                    message: format!("option index {} out of range", index),
                })?;
                Derivation::Category(option.clone())
            }
            Terminal::Subset { options } => {
                let indices = sampler.subset(handle, options.len())?;
                let picked = indices
                    .into_iter()
                    .filter_map(|i| options.get(i).cloned())
                    .collect();
                Derivation::Subset(picked)
            }
        };
        Ok(value)
    }

    /// Whether a derived value lies inside this domain.
    pub fn contains(&self, value: &Derivation) -> bool {
        match (self, value) {
            (Terminal::Boolean, Derivation::Bool(_)) => true,
            (Terminal::Discrete { min, max, .. }, Derivation::Int(v)) => (min..=max).contains(&v),
            (Terminal::Continuous { min, max, .. }, Derivation::Float(v)) => {
                (min..=max).contains(&v)
            }
            (Terminal::Categorical { options, .. }, Derivation::Category(v)) => options.contains(v),
            (Terminal::Subset { options }, Derivation::Subset(values)) => {
                values.iter().all(|v| options.contains(v))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Boolean => write!(f, "boolean()"),
            Terminal::Discrete {
                min,
                max,
                distribution,
            } => write!(f, "discrete(min={}, max={}{})", min, max, dist_suffix(distribution)),
            Terminal::Continuous {
                min,
                max,
                distribution,
            } => write!(f, "continuous(min={}, max={}{})", min, max, dist_suffix(distribution)),
            Terminal::Categorical { options, weights } => {
                let quoted: Vec<String> = options.iter().map(|o| format!("'{}'", o)).collect();
                if weights.is_empty() {
                    write!(f, "categorical({})", quoted.join(", "))
                } else {
                    let ws: Vec<String> = weights.iter().map(ToString::to_string).collect();
                    write!(f, "categorical({}; weights={})", quoted.join(", "), ws.join(", "))
                }
            }
            Terminal::Subset { options } => {
                let quoted: Vec<String> = options.iter().map(|o| format!("'{}'", o)).collect();
                write!(f, "subset({})", quoted.join(", "))
            }
        }
    }
}

fn dist_suffix(distribution: &Distribution) -> &'static str {
    match distribution {
        Distribution::Uniform => "",
        Distribution::Normal => ", normal",
        Distribution::LogUniform => ", log_uniform",
    }
}

/// Right-hand side of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Production {
    /// Exactly one of several symbols.
    Choice { alternatives: Vec<Alternative> },
    /// Instantiate a type from argument symbols, in declared order.
    Construct {
        type_name: String,
        args: Vec<ArgumentRule>,
    },
    /// A leaf value.
    Terminal { terminal: Terminal },
}

impl Production {
    /// Symbols this production refers to, in order.
    pub fn references(&self) -> Vec<&Symbol> {
        match self {
            Production::Choice { alternatives } => alternatives.iter().map(|a| &a.symbol).collect(),
            Production::Construct { args, .. } => args.iter().map(|a| &a.symbol).collect(),
            Production::Terminal { .. } => Vec::new(),
        }
    }

    /// Number of alternatives; construct and terminal rules count as one.
    pub fn alternative_count(&self) -> usize {
        match self {
            Production::Choice { alternatives } => alternatives.len(),
            _ => 1,
        }
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Production::Choice { alternatives } => {
                let parts: Vec<String> = alternatives
                    .iter()
                    .map(|a| {
                        if is_default_weight(&a.weight) {
                            a.symbol.to_string()
                        } else {
                            format!("{}[{}]", a.symbol, a.weight)
                        }
                    })
                    .collect();
                write!(f, "{}", parts.join(" | "))
            }
            Production::Construct { type_name, args } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| format!("{}={}", a.name, a.symbol))
                    .collect();
                write!(f, "{}({})", type_name, parts.join(", "))
            }
            Production::Terminal { terminal } => write!(f, "{}", terminal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SeededSampler;

    #[test]
    fn test_terminal_from_param() {
        assert_eq!(
            Terminal::from_param(&ParamType::discrete(0, 3)),
            Some(Terminal::Discrete {
                min: 0,
                max: 3,
                distribution: Distribution::Uniform
            })
        );
        assert!(Terminal::from_param(&ParamType::component("A")).is_none());
    }

    #[test]
    fn test_terminal_samples_stay_in_domain() {
        let terminals = vec![
            Terminal::Boolean,
            Terminal::Discrete {
                min: -3,
                max: 3,
                distribution: Distribution::Normal,
            },
            Terminal::Continuous {
                min: 0.5,
                max: 0.75,
                distribution: Distribution::Uniform,
            },
            Terminal::Categorical {
                options: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                weights: vec![0.0, 1.0, 1.0],
            },
            Terminal::Subset {
                options: vec!["x".to_string(), "y".to_string()],
            },
        ];

        let mut sampler = SeededSampler::new(0);
        for terminal in &terminals {
            for _ in 0..200 {
                let value = terminal.sample("t", &mut sampler).expect("sample");
                assert!(terminal.contains(&value), "{} produced {:?}", terminal, value);
                assert_ne!(value, Derivation::Category("a".to_string()));
            }
        }
    }

    #[test]
    fn test_contains_rejects_wrong_kind() {
        let terminal = Terminal::Discrete {
            min: 0,
            max: 1,
            distribution: Distribution::Uniform,
        };
        assert!(!terminal.contains(&Derivation::Bool(true)));
        assert!(!terminal.contains(&Derivation::Int(2)));
    }

    #[test]
    fn test_production_display() {
        let choice = Production::Choice {
            alternatives: vec![
                Alternative::new(Symbol::new("B")),
                Alternative::weighted(Symbol::new("C"), 2.0),
            ],
        };
        assert_eq!(choice.to_string(), "<B> | <C>[2]");

        let construct = Production::Construct {
            type_name: "C".to_string(),
            args: vec![
                ArgumentRule {
                    name: "a".to_string(),
                    symbol: Symbol::new("A"),
                },
                ArgumentRule {
                    name: "flag".to_string(),
                    symbol: Symbol::new("C::flag"),
                },
            ],
        };
        assert_eq!(construct.to_string(), "C(a=<A>, flag=<C::flag>)");
        assert_eq!(construct.alternative_count(), 1);
        assert_eq!(construct.references().len(), 2);

        let terminal = Production::Terminal {
            terminal: Terminal::Discrete {
                min: 0,
                max: 10,
                distribution: Distribution::LogUniform,
            },
        };
        assert_eq!(terminal.to_string(), "discrete(min=0, max=10, log_uniform)");
    }
}
