//! Registry of candidate component types.
//!
//! This module provides:
//! - Constructor signatures of candidate types ([`signature`])
//! - An ordered, name-unique collection of those signatures ([`Registry`])
//! - Name-pattern filtering of a registry ([`RegistryFilter`])
//! - Loading registries from YAML or JSON documents

pub mod signature;

pub use signature::{
    ComponentType, Describe, Distribution, ParamType, Parameter, NAME_SEPARATOR,
};

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RegistryError;

/// On-disk layout of a registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDocument {
    types: Vec<ComponentType>,
}

/// Ordered collection of candidate types, unique by name.
///
/// Iteration order is registration order and never changes, so grammars built
/// from the same registry always enumerate alternatives the same way.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: Vec<ComponentType>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Starts a registry builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Creates a registry from signatures, validating each one.
    pub fn new(types: Vec<ComponentType>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(types.len());
        for (pos, ty) in types.iter().enumerate() {
            ty.validate()?;
            if index.insert(ty.name.clone(), pos).is_some() {
                return Err(RegistryError::DuplicateType(ty.name.clone()));
            }
        }
        Ok(Self { types, index })
    }

    /// Parses a YAML registry document (`types: [...]`).
    pub fn from_yaml_str(contents: &str) -> Result<Self, RegistryError> {
        let doc: RegistryDocument = serde_yaml::from_str(contents)?;
        Self::new(doc.types)
    }

    /// Parses a JSON registry document (`{"types": [...]}`).
    pub fn from_json_str(contents: &str) -> Result<Self, RegistryError> {
        let doc: RegistryDocument = serde_json::from_str(contents)?;
        Self::new(doc.types)
    }

    /// Loads a registry file, choosing the parser from the extension.
    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let registry = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&contents)?,
            "json" => Self::from_json_str(&contents)?,
            other => return Err(RegistryError::UnsupportedFormat(other.to_string())),
        };

        debug!(path = %path.display(), types = registry.len(), "Loaded registry");
        Ok(registry)
    }

    /// Serializes the registry as a YAML document.
    pub fn to_yaml(&self) -> Result<String, RegistryError> {
        let doc = RegistryDocument {
            types: self.types.clone(),
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates over types in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentType> {
        self.types.iter()
    }

    /// Looks up a type by name.
    pub fn get(&self, name: &str) -> Option<&ComponentType> {
        self.index.get(name).map(|&pos| &self.types[pos])
    }

    /// True if `name` is a registered type.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of a type in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Types that can fill a slot declared as `name`, in registration order.
    pub fn conforming<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ComponentType> + 'a {
        self.types.iter().filter(move |ty| ty.conforms_to(name))
    }

    /// True if `name` is a type or an interface some type implements.
    pub fn is_known(&self, name: &str) -> bool {
        self.conforming(name).next().is_some()
    }

    /// Returns a new registry containing only the types the filter keeps,
    /// in the same order.
    pub fn filter(&self, filter: &RegistryFilter) -> Registry {
        let types: Vec<ComponentType> = self
            .types
            .iter()
            .filter(|ty| filter.matches(&ty.name))
            .cloned()
            .collect();
        let index = types
            .iter()
            .enumerate()
            .map(|(pos, ty)| (ty.name.clone(), pos))
            .collect();

        debug!(
            before = self.types.len(),
            after = types.len(),
            "Filtered registry"
        );
        Registry { types, index }
    }
}

/// Builder for assembling a [`Registry`] from signatures and [`Describe`] types.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    types: Vec<ComponentType>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a signature.
    pub fn add(mut self, ty: ComponentType) -> Self {
        self.types.push(ty);
        self
    }

    /// Adds the signature a type describes for itself.
    pub fn register<T: Describe>(self) -> Self {
        self.add(T::describe())
    }

    /// Validates everything and builds the registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        Registry::new(self.types)
    }
}

/// Name-pattern filter over registry entries.
///
/// A type is kept if it matches `include` (when set) and does not match
/// `exclude` (when set).
#[derive(Debug, Clone, Default)]
pub struct RegistryFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl RegistryFilter {
    /// A filter that keeps everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only names matching `pattern`.
    pub fn include(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.include = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Drops names matching `pattern`.
    pub fn exclude(mut self, pattern: &str) -> Result<Self, RegistryError> {
        self.exclude = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether a type name passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.as_ref().is_none_or(|re| re.is_match(name));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(name));
        included && !excluded
    }
}
