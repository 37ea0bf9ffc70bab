//! Dynamic step results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value produced by a step and handed to continuations, selectors and
/// transforms.
///
/// Serializes untagged: `null`, `true`, `12.5`, `"text"`, `[...]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    /// No value (`NoOp`, empty loops, `Delay`).
    #[default]
    Unit,
    /// Boolean state (actuator state, level checks).
    Bool(bool),
    /// Scalar (positions, analog readings).
    Number(f64),
    /// Text (material ids, variable names).
    Text(String),
    /// Ordered results of a `Parallel` node.
    List(Vec<StepValue>),
}

impl StepValue {
    /// Numeric view. Booleans read as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StepValue::Number(n) => Some(*n),
            StepValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Boolean view. Numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StepValue::Bool(b) => Some(*b),
            StepValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StepValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[StepValue]> {
        match self {
            StepValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// True for [`StepValue::Unit`].
    pub fn is_unit(&self) -> bool {
        matches!(self, StepValue::Unit)
    }
}

impl fmt::Display for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepValue::Unit => f.write_str("()"),
            StepValue::Bool(b) => write!(f, "{b}"),
            StepValue::Number(n) => write!(f, "{n}"),
            StepValue::Text(s) => f.write_str(s),
            StepValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<f64> for StepValue {
    fn from(value: f64) -> Self {
        StepValue::Number(value)
    }
}

impl From<bool> for StepValue {
    fn from(value: bool) -> Self {
        StepValue::Bool(value)
    }
}

impl From<&str> for StepValue {
    fn from(value: &str) -> Self {
        StepValue::Text(value.to_string())
    }
}

impl From<String> for StepValue {
    fn from(value: String) -> Self {
        StepValue::Text(value)
    }
}

impl From<Vec<StepValue>> for StepValue {
    fn from(value: Vec<StepValue>) -> Self {
        StepValue::List(value)
    }
}

impl From<()> for StepValue {
    fn from(_: ()) -> Self {
        StepValue::Unit
    }
}
