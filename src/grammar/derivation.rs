//! Sampled configurations.
//!
//! A [`Derivation`] is one fully resolved configuration: a tree of constructor
//! calls whose leaves are concrete values. It is handed to the consumer, which
//! turns it into real objects or serializes it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One concrete configuration derived from a grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Derivation {
    Bool(bool),
    Int(i64),
    Float(f64),
    Category(String),
    Subset(Vec<String>),
    Component(Instance),
}

/// A resolved constructor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub type_name: String,
    pub args: Vec<Argument>,
}

/// A named constructor argument with its resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Derivation,
}

impl Derivation {
    /// Type name when this is a constructor call.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Derivation::Component(instance) => Some(&instance.type_name),
            _ => None,
        }
    }

    /// Looks up a constructor argument by name.
    pub fn arg(&self, name: &str) -> Option<&Derivation> {
        match self {
            Derivation::Component(instance) => instance
                .args
                .iter()
                .find(|a| a.name == name)
                .map(|a| &a.value),
            _ => None,
        }
    }

    /// Height of the constructor tree. Leaves have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Derivation::Component(instance) => {
                1 + instance
                    .args
                    .iter()
                    .map(|a| a.value.depth())
                    .max()
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Type names of every constructor call, in pre-order.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_type_names(&mut names);
        names
    }

    fn collect_type_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        if let Derivation::Component(instance) = self {
            names.push(&instance.type_name);
            for arg in &instance.args {
                arg.value.collect_type_names(names);
            }
        }
    }

    /// Plain JSON form for consumers: constructor calls become
    /// `{"type": ..., "args": {...}}`, leaves become JSON scalars or arrays.
    pub fn to_json(&self) -> Value {
        match self {
            Derivation::Bool(v) => Value::Bool(*v),
            Derivation::Int(v) => Value::Number((*v).into()),
            Derivation::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Derivation::Category(v) => Value::String(v.clone()),
            Derivation::Subset(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
            Derivation::Component(instance) => {
                let mut args = Map::new();
                for arg in &instance.args {
                    args.insert(arg.name.clone(), arg.value.to_json());
                }
                let mut object = Map::new();
                object.insert("type".to_string(), Value::String(instance.type_name.clone()));
                object.insert("args".to_string(), Value::Object(args));
                Value::Object(object)
            }
        }
    }
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Derivation::Bool(v) => write!(f, "{}", v),
            Derivation::Int(v) => write!(f, "{}", v),
            Derivation::Float(v) => write!(f, "{}", v),
            Derivation::Category(v) => write!(f, "'{}'", v),
            Derivation::Subset(values) => {
                let quoted: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
                write!(f, "[{}]", quoted.join(", "))
            }
            Derivation::Component(instance) => {
                write!(f, "{}(", instance.type_name)?;
                for (i, arg) in instance.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", arg.name, arg.value)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Derivation {
        Derivation::Component(Instance {
            type_name: "C".to_string(),
            args: vec![
                Argument {
                    name: "a".to_string(),
                    value: Derivation::Component(Instance {
                        type_name: "A".to_string(),
                        args: vec![Argument {
                            name: "x".to_string(),
                            value: Derivation::Int(3),
                        }],
                    }),
                },
                Argument {
                    name: "flag".to_string(),
                    value: Derivation::Bool(true),
                },
            ],
        })
    }

    #[test]
    fn test_display_constructor_call() {
        assert_eq!(nested().to_string(), "C(a=A(x=3), flag=true)");
        assert_eq!(
            Derivation::Subset(vec!["l1".to_string(), "l2".to_string()]).to_string(),
            "['l1', 'l2']"
        );
    }

    #[test]
    fn test_accessors() {
        let d = nested();
        assert_eq!(d.type_name(), Some("C"));
        assert_eq!(d.arg("flag"), Some(&Derivation::Bool(true)));
        assert_eq!(d.arg("a").and_then(|a| a.arg("x")), Some(&Derivation::Int(3)));
        assert_eq!(d.depth(), 2);
        assert_eq!(d.type_names(), vec!["C", "A"]);
    }

    #[test]
    fn test_to_json_shape() {
        let json = nested().to_json();
        assert_eq!(json["type"], "C");
        assert_eq!(json["args"]["flag"], true);
        assert_eq!(json["args"]["a"]["type"], "A");
        assert_eq!(json["args"]["a"]["args"]["x"], 3);
    }

    #[test]
    fn test_serde_round_trip_preserves_structure() {
        let d = nested();
        let encoded = serde_json::to_string(&d).expect("serialize");
        let decoded: Derivation = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, d);
    }
}
