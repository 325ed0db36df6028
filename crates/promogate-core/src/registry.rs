use crate::checks_api::{CheckEvaluator, ConstraintEvaluator};
use crate::errors::CheckError;
use crate::model::{CheckSpec, ConstraintSpec};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps check-kind tags to the evaluators that handle them.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<&'static str, Arc<dyn CheckEvaluator>>,
    constraints: HashMap<&'static str, Arc<dyn ConstraintEvaluator>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_check(&mut self, evaluator: Arc<dyn CheckEvaluator>) {
        self.checks.insert(evaluator.kind(), evaluator);
    }

    pub fn register_constraint(&mut self, evaluator: Arc<dyn ConstraintEvaluator>) {
        self.constraints.insert(evaluator.kind(), evaluator);
    }

    pub fn check_evaluator(&self, check: &CheckSpec) -> anyhow::Result<Arc<dyn CheckEvaluator>> {
        self.checks
            .get(check.kind())
            .cloned()
            .ok_or_else(|| CheckError::UnsupportedKind(check.kind().to_string()).into())
    }

    pub fn constraint_evaluator(
        &self,
        constraint: &ConstraintSpec,
    ) -> anyhow::Result<Arc<dyn ConstraintEvaluator>> {
        self.constraints
            .get(constraint.kind())
            .cloned()
            .ok_or_else(|| CheckError::UnsupportedKind(constraint.kind().to_string()).into())
    }

    /// Turns a host-supplied tag and payload into a typed check.
    pub fn parse_check(&self, tag: &str, payload: Value) -> anyhow::Result<CheckSpec> {
        if !self.checks.contains_key(tag) {
            return Err(CheckError::UnsupportedKind(tag.to_string()).into());
        }
        Ok(serde_json::from_value(tagged(tag, payload)?).map_err(|e| {
            CheckError::InvalidPayload {
                kind: tag.to_string(),
                detail: e.to_string(),
            }
        })?)
    }

    pub fn parse_constraint(&self, tag: &str, payload: Value) -> anyhow::Result<ConstraintSpec> {
        if !self.constraints.contains_key(tag) {
            return Err(CheckError::UnsupportedKind(tag.to_string()).into());
        }
        Ok(serde_json::from_value(tagged(tag, payload)?).map_err(|e| {
            CheckError::InvalidPayload {
                kind: tag.to_string(),
                detail: e.to_string(),
            }
        })?)
    }

    pub fn supported_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self
            .checks
            .keys()
            .chain(self.constraints.keys())
            .copied()
            .collect();
        kinds.sort_unstable();
        kinds
    }
}

fn tagged(tag: &str, payload: Value) -> Result<Value, CheckError> {
    match payload {
        Value::Object(mut m) => {
            m.insert("type".to_string(), Value::String(tag.to_string()));
            Ok(Value::Object(m))
        }
        other => Err(CheckError::InvalidPayload {
            kind: tag.to_string(),
            detail: format!("expected an object, got {}", other),
        }),
    }
}
