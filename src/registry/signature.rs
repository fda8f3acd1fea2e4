//! Constructor signatures of candidate component types.
//!
//! A [`ComponentType`] describes one constructible type: its name, the
//! interfaces it conforms to, and the ordered list of constructor parameters
//! with their declared domains. Signatures are either built in code (directly
//! or through the [`Describe`] capability) or loaded from YAML/JSON documents.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

/// Distribution used when drawing numeric values from a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum Distribution {
    /// Uniform distribution across the range.
    #[default]
    Uniform,
    /// Normal distribution centered at the midpoint, clamped to the range.
    Normal,
    /// Uniform in log space. Requires a strictly positive lower bound.
    LogUniform,
}

/// Helper for serde to skip serializing the default uniform distribution.
fn is_uniform(dist: &Distribution) -> bool {
    matches!(dist, Distribution::Uniform)
}

/// Declared type of a constructor parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    /// `true` or `false`.
    Boolean,

    /// Integer within an inclusive range.
    Discrete {
        min: i64,
        max: i64,
        #[serde(default, skip_serializing_if = "is_uniform")]
        distribution: Distribution,
    },

    /// Floating-point value within an inclusive range.
    Continuous {
        min: f64,
        max: f64,
        #[serde(default, skip_serializing_if = "is_uniform")]
        distribution: Distribution,
    },

    /// One option out of a fixed list, optionally weighted.
    Categorical {
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        weights: Vec<f64>,
    },

    /// Any subset of a fixed list of options.
    Subset { options: Vec<String> },

    /// An instance of a registered type, or of any type implementing the
    /// named interface.
    Component { component: String },

    /// Exactly one of several member types.
    Union { members: Vec<ParamType> },

    /// An annotation that cannot be represented in a grammar. Only usable when
    /// the parameter declares a default.
    Opaque { annotation: String },
}

impl ParamType {
    /// Boolean domain.
    pub fn boolean() -> Self {
        ParamType::Boolean
    }

    /// Uniform integer range.
    pub fn discrete(min: i64, max: i64) -> Self {
        ParamType::Discrete {
            min,
            max,
            distribution: Distribution::Uniform,
        }
    }

    /// Uniform float range.
    pub fn continuous(min: f64, max: f64) -> Self {
        ParamType::Continuous {
            min,
            max,
            distribution: Distribution::Uniform,
        }
    }

    /// Unweighted categorical choice.
    pub fn categorical<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamType::Categorical {
            options: options.into_iter().map(Into::into).collect(),
            weights: Vec::new(),
        }
    }

    /// Subset of the given options.
    pub fn subset<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParamType::Subset {
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Reference to a registered type or interface.
    pub fn component(name: impl Into<String>) -> Self {
        ParamType::Component {
            component: name.into(),
        }
    }

    /// Union of several members.
    pub fn union(members: Vec<ParamType>) -> Self {
        ParamType::Union { members }
    }

    /// Returns the same numeric domain with another distribution.
    ///
    /// Non-numeric domains are returned unchanged.
    pub fn with_distribution(self, distribution: Distribution) -> Self {
        match self {
            ParamType::Discrete { min, max, .. } => ParamType::Discrete {
                min,
                max,
                distribution,
            },
            ParamType::Continuous { min, max, .. } => ParamType::Continuous {
                min,
                max,
                distribution,
            },
            other => other,
        }
    }

    /// True for domains that become terminal rules.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ParamType::Boolean
                | ParamType::Discrete { .. }
                | ParamType::Continuous { .. }
                | ParamType::Categorical { .. }
                | ParamType::Subset { .. }
        )
    }

    /// Validates the domain configuration.
    ///
    /// Returns the problem as a message; the caller attaches type and
    /// parameter names.
    fn validate_domain(&self) -> Result<(), String> {
        match self {
            ParamType::Boolean => Ok(()),
            ParamType::Discrete {
                min,
                max,
                distribution,
            } => {
                if min > max {
                    return Err(format!("min ({}) must be <= max ({})", min, max));
                }
                if *distribution == Distribution::LogUniform && *min < 1 {
                    return Err("log-uniform integer ranges must start at 1 or above".to_string());
                }
                Ok(())
            }
            ParamType::Continuous {
                min,
                max,
                distribution,
            } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err("bounds must be finite".to_string());
                }
                if min > max {
                    return Err(format!("min ({}) must be <= max ({})", min, max));
                }
                if *distribution == Distribution::LogUniform && *min <= 0.0 {
                    return Err("log-uniform ranges require a positive lower bound".to_string());
                }
                Ok(())
            }
            ParamType::Categorical { options, weights } => {
                if options.is_empty() {
                    return Err("categorical options cannot be empty".to_string());
                }
                if !weights.is_empty() {
                    if weights.len() != options.len() {
                        return Err(format!(
                            "weights count ({}) does not match options count ({})",
                            weights.len(),
                            options.len()
                        ));
                    }
                    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        return Err("weights must be finite and non-negative".to_string());
                    }
                    if weights.iter().sum::<f64>() <= 0.0 {
                        return Err("total weight must be positive".to_string());
                    }
                }
                Ok(())
            }
            ParamType::Subset { options } => {
                if options.is_empty() {
                    return Err("subset options cannot be empty".to_string());
                }
                Ok(())
            }
            ParamType::Component { component } => {
                if component.is_empty() {
                    return Err("component reference cannot be empty".to_string());
                }
                Ok(())
            }
            ParamType::Union { members } => {
                if members.is_empty() {
                    return Err("union must have at least one member".to_string());
                }
                members.iter().try_for_each(ParamType::validate_domain)
            }
            ParamType::Opaque { .. } => Ok(()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Boolean => write!(f, "bool"),
            ParamType::Discrete { min, max, .. } => write!(f, "int[{}, {}]", min, max),
            ParamType::Continuous { min, max, .. } => write!(f, "float[{}, {}]", min, max),
            ParamType::Categorical { options, .. } => write!(f, "{{{}}}", options.join(", ")),
            ParamType::Subset { options } => write!(f, "subset{{{}}}", options.join(", ")),
            ParamType::Component { component } => write!(f, "{}", component),
            ParamType::Union { members } => {
                let parts: Vec<String> = members.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(" | "))
            }
            ParamType::Opaque { annotation } => write!(f, "opaque({})", annotation),
        }
    }
}

/// One constructor parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, unique within its signature.
    pub name: String,

    /// Declared domain.
    #[serde(flatten)]
    pub kind: ParamType,

    /// Default used by the consumer when the parameter is left out.
    /// A parameter with a default is optional. An explicit `null` counts.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
}

impl Parameter {
    /// Creates a required parameter.
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    /// Whether the parameter may be left out.
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Maps a present key to `Some`, including an explicit `null`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn default_weight() -> f64 {
    1.0
}

fn is_default_weight(weight: &f64) -> bool {
    *weight == 1.0
}

/// The constructible signature of a candidate type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentType {
    /// Unique type name.
    pub name: String,

    /// Interfaces (capabilities) this type conforms to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,

    /// Constructor parameters in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Parameter>,

    /// Relative weight when this type competes with others for a slot.
    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: f64,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ComponentType {
    /// Creates a type with no interfaces and no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            params: Vec::new(),
            weight: default_weight(),
            description: None,
        }
    }

    /// Declares conformance to an interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Appends a required parameter.
    pub fn param(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.params.push(Parameter::new(name, kind));
        self
    }

    /// Appends an optional parameter with its default.
    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        default: impl Into<Value>,
    ) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            kind,
            default: Some(default.into()),
        });
        self
    }

    /// Sets the selection weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Adds a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether this type can fill a slot declared as `name`, either by
    /// identity or by interface conformance.
    pub fn conforms_to(&self, name: &str) -> bool {
        self.name == name || self.interfaces.iter().any(|i| i == name)
    }

    /// Looks up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validates names, weights and every declared domain.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::EmptyTypeName);
        }
        check_name(&self.name)?;
        for interface in &self.interfaces {
            check_name(interface)?;
        }
        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(RegistryError::InvalidWeight {
                type_name: self.name.clone(),
                weight: self.weight,
            });
        }

        for (idx, param) in self.params.iter().enumerate() {
            if self.params[..idx].iter().any(|p| p.name == param.name) {
                return Err(RegistryError::DuplicateParameter {
                    type_name: self.name.clone(),
                    parameter: param.name.clone(),
                });
            }
            if param.name.contains(NAME_SEPARATOR) {
                return Err(RegistryError::ReservedName {
                    name: param.name.clone(),
                    message: format!("parameter names cannot contain '{}'", NAME_SEPARATOR),
                });
            }
            param
                .kind
                .validate_domain()
                .map_err(|message| RegistryError::InvalidDomain {
                    type_name: self.name.clone(),
                    parameter: param.name.clone(),
                    message,
                })?;
        }

        Ok(())
    }
}

/// Joins a type name and a parameter name into a grammar symbol.
///
/// Never valid inside a registered name, so generated symbols cannot collide
/// with type or interface rules.
pub const NAME_SEPARATOR: &str = "::";

/// Type and interface names may not contain the separator, the `*` marking
/// choice rules, or start with `$`.
fn check_name(name: &str) -> Result<(), RegistryError> {
    let message = if name.contains(NAME_SEPARATOR) {
        format!("names cannot contain '{}'", NAME_SEPARATOR)
    } else if name.contains('*') {
        "names cannot contain '*'".to_string()
    } else if name.starts_with('$') {
        "names cannot start with '$'".to_string()
    } else {
        return Ok(());
    };
    Err(RegistryError::ReservedName {
        name: name.to_string(),
        message,
    })
}

/// Capability of a Rust type to describe its own constructor signature.
///
/// Implemented by component wrappers so they can be registered with
/// [`RegistryBuilder::register`](crate::registry::RegistryBuilder::register).
pub trait Describe {
    /// Returns the signature. Called once per registration.
    fn describe() -> ComponentType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conforms_by_name_and_interface() {
        let ty = ComponentType::new("LogisticRegression").implements("Classifier");
        assert!(ty.conforms_to("LogisticRegression"));
        assert!(ty.conforms_to("Classifier"));
        assert!(!ty.conforms_to("Regressor"));
    }

    #[test]
    fn test_validate_rejects_duplicate_parameter() {
        let ty = ComponentType::new("A")
            .param("x", ParamType::discrete(0, 1))
            .param("x", ParamType::boolean());
        assert!(matches!(
            ty.validate(),
            Err(RegistryError::DuplicateParameter { ref parameter, .. }) if parameter == "x"
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let ty = ComponentType::new("A").param("x", ParamType::discrete(5, 1));
        assert!(matches!(
            ty.validate(),
            Err(RegistryError::InvalidDomain { .. })
        ));

        let ty = ComponentType::new("A").param("x", ParamType::continuous(1.0, 0.5));
        assert!(ty.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_full_width_continuous_range() {
        let ty = ComponentType::new("W").param("v", ParamType::continuous(-1e308, 1e308));
        assert!(ty.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved_names() {
        for ty in [
            ComponentType::new("A::x"),
            ComponentType::new("Model*"),
            ComponentType::new("$start"),
            ComponentType::new("A").implements("Iface::B"),
        ] {
            assert!(
                matches!(ty.validate(), Err(RegistryError::ReservedName { .. })),
                "{} should be rejected",
                ty.name
            );
        }

        let param = ComponentType::new("A").param("p::0", ParamType::boolean());
        assert!(matches!(
            param.validate(),
            Err(RegistryError::ReservedName { ref name, .. }) if name == "p::0"
        ));

        // Dotted paths and underscores are ordinary names.
        assert!(ComponentType::new("sklearn.svm.LinearSVC")
            .implements("A_x")
            .param("max_iter", ParamType::discrete(1, 10))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let ty = ComponentType::new("A").param(
            "kernel",
            ParamType::Categorical {
                options: vec!["rbf".to_string(), "linear".to_string()],
                weights: vec![1.0],
            },
        );
        assert!(ty.validate().is_err());

        let ty = ComponentType::new("A").param(
            "kernel",
            ParamType::Categorical {
                options: vec!["rbf".to_string()],
                weights: vec![0.0],
            },
        );
        assert!(ty.validate().is_err());

        let ty = ComponentType::new("A").with_weight(0.0);
        assert!(matches!(
            ty.validate(),
            Err(RegistryError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_validate_log_uniform_requires_positive_min() {
        let ty = ComponentType::new("A").param(
            "alpha",
            ParamType::continuous(0.0, 1.0).with_distribution(Distribution::LogUniform),
        );
        assert!(ty.validate().is_err());

        let ty = ComponentType::new("A").param(
            "alpha",
            ParamType::continuous(1e-4, 1.0).with_distribution(Distribution::LogUniform),
        );
        assert!(ty.validate().is_ok());
    }

    #[test]
    fn test_validate_nested_union() {
        let ty = ComponentType::new("A").param(
            "x",
            ParamType::union(vec![ParamType::boolean(), ParamType::subset(Vec::<String>::new())]),
        );
        assert!(ty.validate().is_err());
    }

    #[test]
    fn test_optional_param_has_default() {
        let ty = ComponentType::new("A").optional_param(
            "memory",
            ParamType::Opaque {
                annotation: "joblib.Memory".to_string(),
            },
            Value::Null,
        );
        let param = ty.parameter("memory").expect("parameter should exist");
        assert!(param.is_optional());
        assert!(!param.kind.is_primitive());
    }

    #[test]
    fn test_yaml_signature_parses() {
        let ty: ComponentType = serde_yaml::from_str(
            r#"
name: Svc
interfaces: [Classifier]
params:
  - name: C
    type: continuous
    min: 0.01
    max: 100.0
    distribution: log_uniform
  - name: kernel
    type: categorical
    options: [rbf, linear]
  - name: preprocessor
    type: component
    component: Transformer
    default: null
"#,
        )
        .expect("signature should parse");
        assert_eq!(ty.params.len(), 3);
        assert_eq!(ty.weight, 1.0);
        assert!(matches!(
            ty.params[0].kind,
            ParamType::Continuous {
                distribution: Distribution::LogUniform,
                ..
            }
        ));
        assert_eq!(ty.params[2].kind, ParamType::component("Transformer"));
        assert_eq!(ty.params[2].default, Some(Value::Null));
        assert!(!ty.params[0].is_optional());
        ty.validate().expect("signature should be valid");
    }

    #[test]
    fn test_display_param_types() {
        assert_eq!(ParamType::discrete(1, 5).to_string(), "int[1, 5]");
        assert_eq!(ParamType::categorical(["a", "b"]).to_string(), "{a, b}");
        assert_eq!(
            ParamType::union(vec![ParamType::component("A"), ParamType::boolean()]).to_string(),
            "A | bool"
        );
    }
}
