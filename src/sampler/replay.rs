//! Recording and replaying sampler decisions.

use serde::{Deserialize, Serialize};

use super::{Result, Sampler};
use crate::error::SamplingError;
use crate::registry::Distribution;

/// The value produced by one primitive decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChoiceValue {
    Index { value: usize },
    Boolean { value: bool },
    Integer { value: i64 },
    Float { value: f64 },
    Subset { value: Vec<usize> },
}

impl ChoiceValue {
    fn kind(&self) -> &'static str {
        match self {
            ChoiceValue::Index { .. } => "index",
            ChoiceValue::Boolean { .. } => "boolean",
            ChoiceValue::Integer { .. } => "integer",
            ChoiceValue::Float { .. } => "float",
            ChoiceValue::Subset { .. } => "subset",
        }
    }
}

/// One decision tagged with the symbol it was made for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub handle: String,
    pub value: ChoiceValue,
}

/// Ordered record of the decisions made during one or more sampling passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceLog {
    records: Vec<ChoiceRecord>,
}

impl ChoiceLog {
    /// Appends a decision.
    pub fn push(&mut self, record: ChoiceRecord) {
        self.records.push(record);
    }

    /// All decisions in order.
    pub fn records(&self) -> &[ChoiceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sampler that answers every decision from a recorded [`ChoiceLog`].
///
/// Replaying against the grammar that produced the log reproduces the same
/// derivation. Any divergence (different symbol, different kind of decision,
/// or a value outside the requested domain) is reported instead of guessed.
#[derive(Debug, Clone)]
pub struct ReplaySampler {
    log: ChoiceLog,
    position: usize,
}

impl ReplaySampler {
    pub fn new(log: ChoiceLog) -> Self {
        Self { log, position: 0 }
    }

    /// Number of decisions replayed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// True once every recorded decision has been consumed.
    pub fn is_finished(&self) -> bool {
        self.position >= self.log.len()
    }

    fn next(&mut self, handle: &str, kind: &'static str) -> Result<ChoiceValue> {
        let record = self
            .log
            .records
            .get(self.position)
            .ok_or(SamplingError::ReplayExhausted(self.position))?;

        if record.handle != handle || record.value.kind() != kind {
            return Err(SamplingError::ReplayMismatch {
                position: self.position,
                expected: format!("{} ({})", record.handle, record.value.kind()),
                actual: format!("{} ({})", handle, kind),
            });
        }

        let value = record.value.clone();
        self.position += 1;
        Ok(value)
    }

    fn out_of_domain(&self, handle: &str, detail: String) -> SamplingError {
        SamplingError::ReplayMismatch {
            position: self.position.saturating_sub(1),
            expected: detail,
            actual: handle.to_string(),
        }
    }

    fn index(&mut self, handle: &str, len: usize) -> Result<usize> {
        match self.next(handle, "index")? {
            ChoiceValue::Index { value } if value < len => Ok(value),
            other => Err(self.out_of_domain(handle, format!("{:?} within 0..{}", other, len))),
        }
    }
}

impl Sampler for ReplaySampler {
    fn choice(&mut self, handle: &str, len: usize) -> Result<usize> {
        self.index(handle, len)
    }

    fn weighted_choice(&mut self, handle: &str, weights: &[f64]) -> Result<usize> {
        self.index(handle, weights.len())
    }

    fn boolean(&mut self, handle: &str) -> Result<bool> {
        match self.next(handle, "boolean")? {
            ChoiceValue::Boolean { value } => Ok(value),
            other => Err(self.out_of_domain(handle, format!("{:?}", other))),
        }
    }

    fn discrete(
        &mut self,
        handle: &str,
        min: i64,
        max: i64,
        _distribution: Distribution,
    ) -> Result<i64> {
        match self.next(handle, "integer")? {
            ChoiceValue::Integer { value } if (min..=max).contains(&value) => Ok(value),
            other => Err(self.out_of_domain(
                handle,
                format!("{:?} within [{}, {}]", other, min, max),
            )),
        }
    }

    fn continuous(
        &mut self,
        handle: &str,
        min: f64,
        max: f64,
        _distribution: Distribution,
    ) -> Result<f64> {
        match self.next(handle, "float")? {
            ChoiceValue::Float { value } if (min..=max).contains(&value) => Ok(value),
            other => Err(self.out_of_domain(
                handle,
                format!("{:?} within [{}, {}]", other, min, max),
            )),
        }
    }

    fn subset(&mut self, handle: &str, len: usize) -> Result<Vec<usize>> {
        match self.next(handle, "subset")? {
            ChoiceValue::Subset { value } if value.iter().all(|&i| i < len) => Ok(value),
            other => Err(self.out_of_domain(handle, format!("{:?} within 0..{}", other, len))),
        }
    }
}
