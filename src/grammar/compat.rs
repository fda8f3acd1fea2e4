//! Interface compatibility of candidate types.
//!
//! A candidate is compatible when it can be constructed from the registry: every
//! required parameter resolves to a primitive domain or to at least one other
//! compatible, non-excluded type. Optional parameters that cannot be resolved
//! are dropped and left to their defaults.
//!
//! Compatibility is computed once for the whole registry as a least fixpoint:
//! start from nothing, then keep admitting types whose required parameters are
//! satisfied by types already admitted. A composite that contains its own
//! interface is admitted as soon as some other implementation of that interface
//! is, so self-reference never causes recursion here. A type that can only be
//! built out of itself is never admitted.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{IncompatibilityReason, InterfaceIncompatible};
use crate::registry::{ComponentType, ParamType, Registry};

/// Parameters of a compatible type that take part in the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Indices into the signature's parameter list, in declared order.
    pub params: Vec<usize>,
    /// Optional parameters that could not be resolved and keep their default.
    pub dropped: Vec<String>,
}

/// Outcome of checking one registry type.
#[derive(Debug, Clone)]
enum Verdict {
    Compatible(Resolution),
    Incompatible(InterfaceIncompatible),
}

/// Why a parameter domain failed to resolve.
struct Unresolved {
    reason: IncompatibilityReason,
}

/// Cached compatibility verdicts for every type of a registry.
#[derive(Debug, Clone)]
pub struct CompatibilityChecker<'r> {
    registry: &'r Registry,
    excluded: BTreeSet<String>,
    available: Vec<bool>,
    constructible: Vec<bool>,
    verdicts: Vec<Verdict>,
}

impl<'r> CompatibilityChecker<'r> {
    /// Checks every type of the registry with nothing excluded.
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_exclusions(registry, BTreeSet::new())
    }

    /// Checks every type, treating `excluded` names as unavailable to others.
    ///
    /// An excluded type still gets its own verdict, but never satisfies
    /// another type's parameter.
    pub fn with_exclusions(registry: &'r Registry, excluded: BTreeSet<String>) -> Self {
        let available: Vec<bool> = registry
            .iter()
            .map(|ty| !excluded.contains(&ty.name))
            .collect();

        let mut constructible = vec![false; registry.len()];
        let mut changed = true;
        let mut rounds = 0usize;
        while changed {
            changed = false;
            rounds += 1;
            for (pos, ty) in registry.iter().enumerate() {
                if constructible[pos] {
                    continue;
                }
                let ok = ty.params.iter().all(|param| {
                    param.is_optional()
                        || resolve(registry, &param.kind, &available, &constructible).is_ok()
                });
                if ok {
                    constructible[pos] = true;
                    changed = true;
                }
            }
        }

        let verdicts = registry
            .iter()
            .enumerate()
            .map(|(pos, ty)| verdict(registry, pos, ty, &available, &constructible))
            .collect();

        debug!(
            types = registry.len(),
            constructible = constructible.iter().filter(|c| **c).count(),
            excluded = excluded.len(),
            rounds,
            "Computed compatibility"
        );

        Self {
            registry,
            excluded,
            available,
            constructible,
            verdicts,
        }
    }

    /// The registry being checked.
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Resolves a type's signature against the registry.
    ///
    /// Returns the parameters that participate in the grammar, or the
    /// incompatibility. Unknown names are reported as having no implementation.
    pub fn check(&self, name: &str) -> Result<&Resolution, InterfaceIncompatible> {
        match self.registry.position(name).map(|pos| &self.verdicts[pos]) {
            Some(Verdict::Compatible(resolution)) => Ok(resolution),
            Some(Verdict::Incompatible(err)) => Err(err.clone()),
            None => Err(InterfaceIncompatible {
                type_name: name.to_string(),
                parameter: String::new(),
                required: name.to_string(),
                reason: IncompatibilityReason::NoImplementation,
            }),
        }
    }

    /// True if the type resolves.
    pub fn is_compatible(&self, name: &str) -> bool {
        self.check(name).is_ok()
    }

    /// True if the type was excluded by name.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// True if the type may appear in a grammar.
    pub fn is_available(&self, name: &str) -> bool {
        !self.is_excluded(name) && self.is_compatible(name)
    }

    /// True if a parameter domain resolves against the available types.
    pub fn resolves(&self, kind: &ParamType) -> bool {
        resolve(self.registry, kind, &self.available, &self.constructible).is_ok()
    }

    /// Every incompatible, non-excluded type, in registry order.
    pub fn incompatibilities(&self) -> impl Iterator<Item = &InterfaceIncompatible> {
        self.registry
            .iter()
            .zip(self.verdicts.iter())
            .filter(|(ty, _)| !self.excluded.contains(&ty.name))
            .filter_map(|(_, verdict)| match verdict {
                Verdict::Incompatible(err) => Some(err),
                Verdict::Compatible(_) => None,
            })
    }
}

/// Resolves a parameter domain given which types are available and constructible.
fn resolve(
    registry: &Registry,
    kind: &ParamType,
    available: &[bool],
    constructible: &[bool],
) -> Result<(), Unresolved> {
    match kind {
        ParamType::Boolean
        | ParamType::Discrete { .. }
        | ParamType::Continuous { .. }
        | ParamType::Categorical { .. }
        | ParamType::Subset { .. } => Ok(()),
        ParamType::Component { component } => {
            let mut any_conforming = false;
            for (pos, ty) in registry.iter().enumerate() {
                if !ty.conforms_to(component) {
                    continue;
                }
                any_conforming = true;
                if available[pos] && constructible[pos] {
                    return Ok(());
                }
            }
            Err(Unresolved {
                reason: if any_conforming {
                    IncompatibilityReason::AllCandidatesRejected
                } else {
                    IncompatibilityReason::NoImplementation
                },
            })
        }
        ParamType::Union { members } => {
            let mut first_failure = None;
            for member in members {
                match resolve(registry, member, available, constructible) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        first_failure.get_or_insert(err);
                    }
                }
            }
            Err(first_failure.unwrap_or(Unresolved {
                reason: IncompatibilityReason::NoImplementation,
            }))
        }
        ParamType::Opaque { .. } => Err(Unresolved {
            reason: IncompatibilityReason::Unrepresentable,
        }),
    }
}

/// Final verdict for one type against the fixpoint.
fn verdict(
    registry: &Registry,
    pos: usize,
    ty: &ComponentType,
    available: &[bool],
    constructible: &[bool],
) -> Verdict {
    let mut params = Vec::with_capacity(ty.params.len());
    let mut dropped = Vec::new();

    for (idx, param) in ty.params.iter().enumerate() {
        match resolve(registry, &param.kind, available, constructible) {
            Ok(()) => params.push(idx),
            Err(_) if param.is_optional() => dropped.push(param.name.clone()),
            Err(unresolved) => {
                let reason = if unresolved.reason == IncompatibilityReason::AllCandidatesRejected
                    && refers_to_self(&param.kind, ty)
                {
                    IncompatibilityReason::NoFiniteDerivation
                } else {
                    unresolved.reason
                };
                return Verdict::Incompatible(InterfaceIncompatible {
                    type_name: ty.name.clone(),
                    parameter: param.name.clone(),
                    required: param.kind.to_string(),
                    reason,
                });
            }
        }
    }

    // Every required parameter resolved, so the fixpoint admitted this type.
    debug_assert!(constructible[pos]);
    Verdict::Compatible(Resolution { params, dropped })
}

/// True if the domain can be filled by the type itself.
fn refers_to_self(kind: &ParamType, ty: &ComponentType) -> bool {
    match kind {
        ParamType::Component { component } => ty.conforms_to(component),
        ParamType::Union { members } => members.iter().any(|m| refers_to_self(m, ty)),
        _ => false,
    }
}
