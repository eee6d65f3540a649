//! Results of fail-soft operations.
//!
//! Embedding, vector backend and rerank failures never propagate as errors.
//! They are recorded as [`Degradation`]s next to a usable fallback value so a
//! caller can tell "no results" apart from "the backend failed".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::Interrupted;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// An embedding or rerank provider call failed.
    Provider(String),
    /// A vector backend call failed.
    Backend(String),
    /// A call was cut short by its deadline or by the caller.
    Interrupted(Interrupted),
}

impl Degradation {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Degradation::Interrupted(_))
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::Provider(msg) => write!(f, "provider: {msg}"),
            Degradation::Backend(msg) => write!(f, "backend: {msg}"),
            Degradation::Interrupted(why) => write!(f, "interrupted: {why}"),
        }
    }
}

/// A value plus the degradations hit while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub issues: Vec<Degradation>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { value, issues: Vec::new() }
    }

    pub fn degraded(value: T, issue: Degradation) -> Self {
        Self { value, issues: vec![issue] }
    }

    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn was_interrupted(&self) -> Option<Interrupted> {
        self.issues.iter().find_map(|d| match d {
            Degradation::Interrupted(why) => Some(*why),
            _ => None,
        })
    }

    pub fn push(&mut self, issue: Degradation) {
        self.issues.push(issue);
    }

    /// Moves this outcome's issues into `sink` and returns the bare value.
    pub fn drain_into(self, sink: &mut Vec<Degradation>) -> T {
        sink.extend(self.issues);
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome { value: f(self.value), issues: self.issues }
    }

    pub fn into_parts(self) -> (T, Vec<Degradation>) {
        (self.value, self.issues)
    }
}

impl<T: Default> Default for Outcome<T> {
    fn default() -> Self {
        Self::ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interruption_is_visible_through_issues() {
        let mut out = Outcome::ok(3usize);
        assert!(!out.is_degraded());
        out.push(Degradation::Backend("unreachable".into()));
        assert!(out.is_degraded());
        assert_eq!(out.was_interrupted(), None);
        out.push(Degradation::Interrupted(Interrupted::Cancelled));
        assert_eq!(out.was_interrupted(), Some(Interrupted::Cancelled));

        let mut sink = Vec::new();
        let value = out.drain_into(&mut sink);
        assert_eq!(value, 3);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn degradation_serializes_with_kind_tag() {
        let json = serde_json::to_value(Degradation::Interrupted(Interrupted::DeadlineExceeded)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "interrupted", "detail": "deadline_exceeded"}));
    }

    #[test]
    fn interrupted_reads_back_from_snake_case() {
        let back: Degradation = serde_json::from_value(serde_json::json!({"kind": "interrupted", "detail": "cancelled"})).unwrap();
        assert_eq!(back, Degradation::Interrupted(Interrupted::Cancelled));
        assert!(serde_json::from_value::<Interrupted>(serde_json::json!("timed_out")).is_err());
    }
}
