//! Execution context and the step hand-off contract
//!
//! A context-aware step receives the current context by shared reference
//! and must say explicitly what happens next: either the context passes
//! through untouched or it is replaced wholesale. Anything else is a
//! contract violation that fails the scenario.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{Error, Result};

/// String keys to arbitrary values, threaded through one scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(Map<String, Value>);

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Copy of this context with one key set
    ///
    /// The usual way for a step to produce its replacement context:
    /// `Ok(StepResult::Updated(ctx.with("count", 1)))`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut next = self.clone();
        next.insert(key, value);
        next
    }

    /// Overlay every key of `other` onto this context
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ExecutionContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// What a context-aware step hands to the next step
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Pass the incoming context on untouched
    Unchanged,
    /// Replace the context
    Updated(ExecutionContext),
    /// Anything else a step produced; always rejected by [`hand_off`]
    Invalid(Value),
}

/// Sentinel spelling of [`StepResult::Unchanged`] in dynamic values
pub const UNCHANGED_SENTINEL: &str = "unchanged";

/// Key wrapping a replacement context in dynamic values
pub const UPDATED_KEY: &str = "ok";

impl StepResult {
    /// Classify a raw dynamic value
    ///
    /// `"unchanged"` means [`StepResult::Unchanged`], `{ok: <mapping>}`
    /// means [`StepResult::Updated`]; every other value is kept as
    /// [`StepResult::Invalid`] so the contract can report it verbatim.
    pub fn from_value(value: Value) -> Self {
        if value.as_str() == Some(UNCHANGED_SENTINEL) {
            return StepResult::Unchanged;
        }
        if let Some(map) = value.as_object().filter(|m| m.len() == 1) {
            if let Some(Value::Object(ctx)) = map.get(UPDATED_KEY) {
                return StepResult::Updated(ctx.clone().into());
            }
        }
        StepResult::Invalid(value)
    }

    /// Wrap an arbitrary serializable value as an invalid result
    pub fn invalid(value: impl Serialize) -> Self {
        StepResult::Invalid(serde_json::to_value(value).unwrap_or(Value::Null))
    }
}

/// Apply the hand-off contract, producing the context for the next step
pub fn hand_off(result: StepResult, incoming: ExecutionContext) -> Result<ExecutionContext> {
    match result {
        StepResult::Unchanged => Ok(incoming),
        StepResult::Updated(next) => Ok(next),
        StepResult::Invalid(value) => Err(Error::contract_violation(&value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unchanged_passes_context_through() {
        let ctx: ExecutionContext = [("user", "ada")].into_iter().collect();
        let next = hand_off(StepResult::Unchanged, ctx.clone()).unwrap();
        assert_eq!(next, ctx);
    }

    #[test]
    fn test_updated_replaces_context() {
        let ctx: ExecutionContext = [("a", 1)].into_iter().collect();
        let replacement = ExecutionContext::new().with("b", 2);
        let next = hand_off(StepResult::Updated(replacement.clone()), ctx).unwrap();
        assert_eq!(next, replacement);
        assert!(!next.contains_key("a"));
    }

    #[test]
    fn test_invalid_value_is_violation_with_literal() {
        let err = hand_off(StepResult::Invalid(json!(true)), ExecutionContext::new()).unwrap_err();
        match &err {
            Error::ContractViolation { value } => assert_eq!(value, "true"),
            other => panic!("Expected ContractViolation, got {other:?}"),
        }
        assert!(err.to_string().contains("Step returned true"));

        let err = hand_off(StepResult::invalid(vec![1, 2]), ExecutionContext::new()).unwrap_err();
        assert!(err.to_string().contains("Step returned [1,2]"));
    }

    #[test]
    fn test_from_value_classification() {
        assert_eq!(StepResult::from_value(json!("unchanged")), StepResult::Unchanged);
        assert_eq!(
            StepResult::from_value(json!({"ok": {"x": 10}})),
            StepResult::Updated([("x", 10)].into_iter().collect())
        );
        assert_eq!(StepResult::from_value(json!(true)), StepResult::Invalid(json!(true)));
        assert_eq!(
            StepResult::from_value(json!({"ok": 5})),
            StepResult::Invalid(json!({"ok": 5}))
        );
        assert_eq!(
            StepResult::from_value(json!({"x": 1})),
            StepResult::Invalid(json!({"x": 1}))
        );
        assert_eq!(
            StepResult::from_value(json!("ok")),
            StepResult::Invalid(json!("ok"))
        );
    }

    #[test]
    fn test_with_does_not_mutate_original() {
        let ctx = ExecutionContext::new().with("x", 10);
        let next = ctx.with("computed", 20);
        assert_eq!(ctx.len(), 1);
        assert_eq!(next.get_i64("x"), Some(10));
        assert_eq!(next.get_i64("computed"), Some(20));
    }

    #[test]
    fn test_merge_overlays_keys() {
        let mut base: ExecutionContext = [("a", 1), ("b", 2)].into_iter().collect();
        let overlay: ExecutionContext = [("b", 3), ("c", 4)].into_iter().collect();
        base.merge(&overlay);
        assert_eq!(base.get_i64("a"), Some(1));
        assert_eq!(base.get_i64("b"), Some(3));
        assert_eq!(base.get_i64("c"), Some(4));
    }
}
