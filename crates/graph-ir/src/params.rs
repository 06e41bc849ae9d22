// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator parameter blocks.
//!
//! Parameters are a flat map of named scalars and integer lists, decoded by
//! each operator with its own defaults. A parameter of the wrong type is an
//! error even when a default exists; an absent one falls back to the default.

use crate::GraphError;
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Ints(_) => "int list",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Ints(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        Self::Ints(v)
    }
}

/// Named parameters attached to an operator node.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OpParams {
    values: BTreeMap<String, ParamValue>,
}

impl OpParams {
    /// Creates an empty parameter block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// ```
    /// use graph_ir::OpParams;
    /// let p = OpParams::new().with("eps", 1e-5).with("n_groups", 4i64);
    /// assert_eq!(p.i64_or("n_groups", 32).unwrap(), 4);
    /// ```
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a parameter, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Returns the raw value of a parameter.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Iterates over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reads a float, accepting integers. Absent keys yield `default`.
    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32, GraphError> {
        Ok(self.f64_opt(key)?.map_or(default, |v| v as f32))
    }

    /// Reads a float that must be present.
    pub fn require_f32(&self, key: &str) -> Result<f32, GraphError> {
        self.f64_opt(key)?
            .map(|v| v as f32)
            .ok_or_else(|| missing(key))
    }

    /// Reads an integer. Absent keys yield `default`.
    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, GraphError> {
        Ok(self.i64_opt(key)?.unwrap_or(default))
    }

    /// Reads an integer that must be present.
    pub fn require_i64(&self, key: &str) -> Result<i64, GraphError> {
        self.i64_opt(key)?.ok_or_else(|| missing(key))
    }

    /// Reads a boolean. Integers 0 and 1 are accepted.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, GraphError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(ParamValue::Int(0)) => Ok(false),
            Some(ParamValue::Int(1)) => Ok(true),
            Some(other) => Err(wrong_type(key, "bool", other)),
        }
    }

    /// Reads a string. Absent keys yield `default`.
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, GraphError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ParamValue::Str(v)) => Ok(v.as_str()),
            Some(other) => Err(wrong_type(key, "string", other)),
        }
    }

    /// Reads an integer list; a single integer is treated as a list of one.
    pub fn ints(&self, key: &str) -> Result<Option<Vec<i64>>, GraphError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::Ints(v)) => Ok(Some(v.clone())),
            Some(ParamValue::Int(v)) => Ok(Some(vec![*v])),
            Some(other) => Err(wrong_type(key, "int list", other)),
        }
    }

    fn f64_opt(&self, key: &str) -> Result<Option<f64>, GraphError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::Float(v)) => Ok(Some(*v)),
            Some(ParamValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(wrong_type(key, "float", other)),
        }
    }

    fn i64_opt(&self, key: &str) -> Result<Option<i64>, GraphError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::Int(v)) => Ok(Some(*v)),
            Some(ParamValue::Float(v)) if v.fract() == 0.0 => Ok(Some(*v as i64)),
            Some(other) => Err(wrong_type(key, "int", other)),
        }
    }
}

fn missing(key: &str) -> GraphError {
    GraphError::InvalidParam {
        key: key.to_string(),
        detail: "required parameter is missing".into(),
    }
}

fn wrong_type(key: &str, expected: &str, found: &ParamValue) -> GraphError {
    GraphError::InvalidParam {
        key: key.to_string(),
        detail: format!("expected {expected}, found {} `{found}`", found.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_absent() {
        let p = OpParams::new();
        assert_eq!(p.f32_or("scale", 1.0).unwrap(), 1.0);
        assert_eq!(p.i64_or("mode", 0).unwrap(), 0);
        assert!(!p.bool_or("inplace", false).unwrap());
        assert_eq!(p.str_or("order", "asc").unwrap(), "asc");
        assert_eq!(p.ints("pads").unwrap(), None);
    }

    #[test]
    fn test_int_promotes_to_float() {
        let p = OpParams::new().with("max", 1i64);
        assert_eq!(p.require_f32("max").unwrap(), 1.0);
    }

    #[test]
    fn test_whole_float_accepted_as_int() {
        let p = OpParams::new().with("n_past", 3.0);
        assert_eq!(p.require_i64("n_past").unwrap(), 3);
        let p = OpParams::new().with("n_past", 3.5);
        assert!(p.require_i64("n_past").is_err());
    }

    #[test]
    fn test_required_missing_is_error() {
        let err = OpParams::new().require_f32("eps").unwrap_err();
        assert!(err.to_string().contains("eps"));
    }

    #[test]
    fn test_wrong_type_is_error_even_with_default() {
        let p = OpParams::new().with("scale", "big");
        let err = p.f32_or("scale", 1.0).unwrap_err();
        assert!(err.to_string().contains("expected float"));
    }

    #[test]
    fn test_json_decoding() {
        let p: OpParams = serde_json::from_str(
            r#"{"eps": 1e-5, "n_groups": 2, "inplace": true, "op": "avg", "dims": [1, 2]}"#,
        )
        .unwrap();
        assert_eq!(p.get("n_groups"), Some(&ParamValue::Int(2)));
        assert!((p.require_f32("eps").unwrap() - 1e-5).abs() < 1e-12);
        assert!(p.bool_or("inplace", false).unwrap());
        assert_eq!(p.str_or("op", "max").unwrap(), "avg");
        assert_eq!(p.ints("dims").unwrap(), Some(vec![1, 2]));
        assert_eq!(p.len(), 5);
    }
}
