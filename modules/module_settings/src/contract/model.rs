//! Contract models for module settings
//!
//! `SettingValue` carries serde derives because the plaintext backend
//! persists values with their type tag. Everything else here is a plain
//! domain type shared by callers and the module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::error::SettingsError;

/// Kind of a setting value, taken from the declared default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Int,
    Long,
    Float,
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

/// A single setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f64),
    String(String),
}

impl SettingValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Long(_) => ValueKind::Long,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(i64::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to `kind` without losing information.
    ///
    /// Integers widen freely, floats narrow to integers only when integral
    /// and in range, and strings are parsed. Anything else yields `None`.
    pub fn coerce_to(&self, kind: ValueKind) -> Option<SettingValue> {
        if self.kind() == kind {
            return Some(self.clone());
        }

        match (self, kind) {
            (Self::Int(i), ValueKind::Long) => Some(Self::Long(i64::from(*i))),
            (Self::Int(i), ValueKind::Float) => Some(Self::Float(f64::from(*i))),
            (Self::Long(l), ValueKind::Int) => i32::try_from(*l).ok().map(Self::Int),
            (Self::Long(l), ValueKind::Float) => Some(Self::Float(*l as f64)),
            (Self::Float(f), ValueKind::Int) => integral_f64(*f)
                .and_then(|l| i32::try_from(l).ok())
                .map(Self::Int),
            (Self::Float(f), ValueKind::Long) => integral_f64(*f).map(Self::Long),
            (Self::String(s), kind) => Self::parse_as(kind, s.trim()),
            _ => None,
        }
    }

    /// Parse the string form produced by [`SettingValue::to_storage_string`].
    pub fn parse_as(kind: ValueKind, raw: &str) -> Option<SettingValue> {
        match kind {
            ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            ValueKind::Int => raw.parse().ok().map(Self::Int),
            ValueKind::Long => raw.parse().ok().map(Self::Long),
            ValueKind::Float => raw.parse().ok().map(Self::Float),
            ValueKind::String => Some(Self::String(raw.to_string())),
        }
    }

    /// String form used by string-only backends
    pub fn to_storage_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Long(l) => l.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
        }
    }

    /// JSON scalar for import/export documents.
    ///
    /// Non-finite floats have no JSON representation and become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Long(l) => Value::from(*l),
            Self::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Read a JSON scalar. `null` maps to `None`; arrays and objects are rejected.
    pub fn from_json(value: &Value) -> Result<Option<SettingValue>, String> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(Self::Bool(*b))),
            Value::Number(n) => {
                if let Some(l) = n.as_i64() {
                    Ok(Some(match i32::try_from(l) {
                        Ok(i) => Self::Int(i),
                        Err(_) => Self::Long(l),
                    }))
                } else if n.is_u64() {
                    Err(format!("integer {} is out of range", n))
                } else {
                    n.as_f64()
                        .map(|f| Some(Self::Float(f)))
                        .ok_or_else(|| format!("unsupported number {}", n))
                }
            }
            Value::String(s) => Ok(Some(Self::String(s.clone()))),
            Value::Array(_) => Err("arrays are not supported".to_string()),
            Value::Object(_) => Err("nested objects are not supported".to_string()),
        }
    }
}

fn integral_f64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Identity of a settings module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    /// Storage namespace discriminator
    pub id: String,
    /// Display name
    pub name: String,
    /// Grouping category
    pub category: String,
}

/// Outcome of validating a candidate value
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Accepted as given
    Valid,
    /// Accepted after correction (clamping, coercion, default substitution)
    Corrected(SettingValue),
    /// Rejected with a reason
    Invalid(String),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }
}

/// Flat import/export document: string keys to JSON scalars
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument(Map<String, Value>);

impl SettingsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document. The top level must be a JSON object; per-entry
    /// shape problems are left for import to report.
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| SettingsError::Document {
            message: e.to_string(),
        })?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SettingsError::Document {
                message: format!("expected a JSON object, found {}", json_type_name(&other)),
            }),
        }
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SettingsError> {
        serde_json::to_string_pretty(&self.0).map_err(|e| SettingsError::Document {
            message: e.to_string(),
        })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: &SettingValue) {
        self.0.insert(key.into(), value.to_json());
    }

    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
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

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SettingsDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<&BTreeMap<String, SettingValue>> for SettingsDocument {
    fn from(values: &BTreeMap<String, SettingValue>) -> Self {
        let mut doc = Self::new();
        for (key, value) in values {
            doc.insert(key.clone(), value);
        }
        doc
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single rejected import entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntryFailure {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for ImportEntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Per-entry outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Keys whose validated value is now in memory
    pub applied: Vec<String>,
    /// Sensitive keys present in the document and ignored
    pub skipped_sensitive: Vec<String>,
    /// Entries rejected by validation or shape checks
    pub failures: Vec<ImportEntryFailure>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
