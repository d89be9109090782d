//! Typed condition predicates.
//!
//! Conditions arrive as `(field, op, value)` triples. They are compiled once
//! when a policy is loaded so that evaluation never parses a regex, never
//! re-splits a field path and never fails: a field that is missing or of the
//! wrong type simply makes the predicate false (or true for the negative
//! operators `ne` and `not_in`).

use regex_lite::Regex;
use serde_json::{Map, Value};

use crate::model::{Condition, Operator};
use crate::{PolicyError, PolicyResult};

/// The merged context a policy is evaluated against:
/// `{subject_id, action, ...metadata}`.
///
/// `subject_id` and `action` always win over metadata keys of the same name.
#[derive(Debug, Clone)]
pub struct EvalContext {
    root: Value,
}

impl EvalContext {
    pub fn new(subject_id: &str, action: &str, metadata: &Value) -> Self {
        let mut merged = match metadata {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        merged.insert("subject_id".into(), Value::String(subject_id.into()));
        merged.insert("action".into(), Value::String(action.into()));
        Self {
            root: Value::Object(merged),
        }
    }

    fn resolve(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = &self.root;
        for segment in &path.0 {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// A dot-separated path, split once at compile time.
#[derive(Debug, Clone)]
struct FieldPath(Vec<String>);

impl FieldPath {
    fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self(segments))
    }
}

#[derive(Debug, Clone, Copy)]
enum Ordering {
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone)]
enum Test {
    Eq(Value),
    Ne(Value),
    Compare(Ordering, f64),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Contains(String),
    Matches(Regex),
    Exists,
}

#[derive(Debug, Clone)]
struct Predicate {
    path: FieldPath,
    test: Test,
}

impl Predicate {
    fn holds(&self, ctx: &EvalContext) -> bool {
        let field = ctx.resolve(&self.path);
        match &self.test {
            Test::Eq(expected) => field.is_some_and(|v| values_equal(v, expected)),
            Test::Ne(expected) => field.is_none_or(|v| !values_equal(v, expected)),
            Test::Compare(ordering, bound) => field.and_then(Value::as_f64).is_some_and(|x| match ordering {
                Ordering::Gt => x > *bound,
                Ordering::Lt => x < *bound,
                Ordering::Gte => x >= *bound,
                Ordering::Lte => x <= *bound,
            }),
            Test::In(set) => field.is_some_and(|v| set.iter().any(|s| values_equal(v, s))),
            Test::NotIn(set) => field.is_none_or(|v| !set.iter().any(|s| values_equal(v, s))),
            Test::Contains(needle) => field
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Test::Matches(re) => field.and_then(Value::as_str).is_some_and(|s| re.is_match(s)),
            Test::Exists => field.is_some_and(|v| !v.is_null()),
        }
    }
}

/// All of a policy's conditions, compiled. Empty = always matches.
#[derive(Debug, Clone, Default)]
pub struct CompiledConditions {
    predicates: Vec<Predicate>,
}

impl CompiledConditions {
    pub fn compile(policy_name: &str, conditions: &[Condition]) -> PolicyResult<Self> {
        let invalid = |detail: String| PolicyError::InvalidCondition {
            policy: policy_name.to_string(),
            detail,
        };

        let mut predicates = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let path = FieldPath::parse(&condition.field)
                .ok_or_else(|| invalid(format!("invalid field path '{}'", condition.field)))?;

            let test = match condition.op {
                Operator::Eq => Test::Eq(condition.value.clone()),
                Operator::Ne => Test::Ne(condition.value.clone()),
                Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
                    let bound = condition.value.as_f64().ok_or_else(|| {
                        invalid(format!("'{}' needs a numeric value", condition.field))
                    })?;
                    let ordering = match condition.op {
                        Operator::Gt => Ordering::Gt,
                        Operator::Lt => Ordering::Lt,
                        Operator::Gte => Ordering::Gte,
                        _ => Ordering::Lte,
                    };
                    Test::Compare(ordering, bound)
                }
                Operator::In | Operator::NotIn => {
                    let set = condition.value.as_array().cloned().ok_or_else(|| {
                        invalid(format!("'{}' needs an array value", condition.field))
                    })?;
                    if condition.op == Operator::In {
                        Test::In(set)
                    } else {
                        Test::NotIn(set)
                    }
                }
                Operator::Contains => {
                    let needle = condition.value.as_str().ok_or_else(|| {
                        invalid(format!("'{}' needs a string value", condition.field))
                    })?;
                    Test::Contains(needle.to_string())
                }
                Operator::Matches => {
                    let pattern = condition.value.as_str().ok_or_else(|| {
                        invalid(format!("'{}' needs a regex string", condition.field))
                    })?;
                    let re = Regex::new(pattern)
                        .map_err(|e| invalid(format!("bad regex '{pattern}': {e}")))?;
                    Test::Matches(re)
                }
                Operator::Exists => Test::Exists,
            };

            predicates.push(Predicate { path, test });
        }

        Ok(Self { predicates })
    }

    /// True when every predicate holds.
    pub fn matches(&self, ctx: &EvalContext) -> bool {
        self.predicates.iter().all(|p| p.holds(ctx))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Numbers compare by value (`1` equals `1.0`); everything else structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}
