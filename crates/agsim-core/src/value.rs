//! Values exchanged between models, reports and storage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named property value read from, or written to, a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Number(f64),
    Date(NaiveDate),
    Text(String),
    Integers(Vec<i64>),
    Numbers(Vec<f64>),
}

impl VariableValue {
    /// Parse a literal as written in a factor specification.
    ///
    /// Integers are preferred over floats and ISO dates over free text.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(v) = text.parse::<i64>() {
            return VariableValue::Integer(v);
        }
        if let Ok(v) = text.parse::<f64>() {
            return VariableValue::Number(v);
        }
        if let Ok(v) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return VariableValue::Date(v);
        }
        VariableValue::Text(text.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            VariableValue::Integer(v) => Some(*v as f64),
            VariableValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            VariableValue::Integer(v) => Some(*v),
            VariableValue::Number(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            VariableValue::Date(d) => Some(*d),
            VariableValue::Text(t) => NaiveDate::parse_from_str(t, "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VariableValue::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            VariableValue::Integer(_) => "integer",
            VariableValue::Number(_) => "number",
            VariableValue::Date(_) => "date",
            VariableValue::Text(_) => "text",
            VariableValue::Integers(_) => "integer array",
            VariableValue::Numbers(_) => "number array",
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(values: &[T]) -> String {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }
        match self {
            VariableValue::Integer(v) => write!(f, "{}", v),
            VariableValue::Number(v) => write!(f, "{}", v),
            VariableValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            VariableValue::Text(v) => write!(f, "{}", v),
            VariableValue::Integers(v) => write!(f, "{}", join(v)),
            VariableValue::Numbers(v) => write!(f, "{}", join(v)),
        }
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        VariableValue::Number(value)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        VariableValue::Integer(value)
    }
}

impl From<NaiveDate> for VariableValue {
    fn from(value: NaiveDate) -> Self {
        VariableValue::Date(value)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::Text(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::Text(value)
    }
}

impl From<Vec<f64>> for VariableValue {
    fn from(value: Vec<f64>) -> Self {
        VariableValue::Numbers(value)
    }
}

impl From<Vec<i64>> for VariableValue {
    fn from(value: Vec<i64>) -> Self {
        VariableValue::Integers(value)
    }
}
