//! Module definitions: identity, defaults, constraints and sensitive keys
//!
//! A definition is declared once per concrete module, either through the
//! builder or from a YAML document, and is immutable afterwards.

use crate::contract::{ModuleIdentity, SettingValue, ValueKind};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use super::validation::validate_module_id;

/// Error type for invalid module definitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("Invalid module id: {0}")]
    InvalidModuleId(String),

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Module has no settings: {0}")]
    Empty(String),

    #[error("Failed to parse definition: {0}")]
    Parse(String),
}

/// Constraint applied by the schema validator
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Constraint {
    #[default]
    None,
    /// Inclusive integer bound; out-of-range input is clamped
    IntRange { min: i64, max: i64 },
    /// Inclusive float bound; out-of-range input is clamped
    FloatRange { min: f64, max: f64 },
    /// Closed set of string values; anything else is rejected
    OneOf(Vec<String>),
    /// Maximum length in characters; longer input is truncated
    MaxLen(usize),
}

/// Declaration of a single setting
#[derive(Debug, Clone, PartialEq)]
pub struct SettingSpec {
    default: SettingValue,
    constraint: Constraint,
    /// Constraint setters called; more than one is a definition error
    constraints_declared: u8,
    sensitive: bool,
}

impl SettingSpec {
    pub fn new(default: SettingValue) -> Self {
        Self {
            default,
            constraint: Constraint::None,
            constraints_declared: 0,
            sensitive: false,
        }
    }

    pub fn bool(default: bool) -> Self {
        Self::new(SettingValue::Bool(default))
    }

    pub fn int(default: i32) -> Self {
        Self::new(SettingValue::Int(default))
    }

    pub fn long(default: i64) -> Self {
        Self::new(SettingValue::Long(default))
    }

    pub fn float(default: f64) -> Self {
        Self::new(SettingValue::Float(default))
    }

    pub fn string(default: impl Into<String>) -> Self {
        Self::new(SettingValue::String(default.into()))
    }

    /// Inclusive bound for `int` and `long` settings
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.constraint = Constraint::IntRange { min, max };
        self.constraints_declared = self.constraints_declared.saturating_add(1);
        self
    }

    /// Inclusive bound for `float` settings
    pub fn float_range(mut self, min: f64, max: f64) -> Self {
        self.constraint = Constraint::FloatRange { min, max };
        self.constraints_declared = self.constraints_declared.saturating_add(1);
        self
    }

    pub fn one_of<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraint = Constraint::OneOf(options.into_iter().map(Into::into).collect());
        self.constraints_declared = self.constraints_declared.saturating_add(1);
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.constraint = Constraint::MaxLen(max);
        self.constraints_declared = self.constraints_declared.saturating_add(1);
        self
    }

    /// Persist encrypted and exclude from default export
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn default_value(&self) -> &SettingValue {
        &self.default
    }

    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    fn check(&self, key: &str) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidSetting {
            key: key.to_string(),
            reason,
        };

        if self.constraints_declared > 1 {
            return Err(invalid("only one constraint may be declared".to_string()));
        }

        if let SettingValue::Float(f) = self.default {
            if !f.is_finite() {
                return Err(invalid("default must be a finite number".to_string()));
            }
        }

        match &self.constraint {
            Constraint::None => Ok(()),
            Constraint::IntRange { min, max } => {
                let default = self
                    .default
                    .as_i64()
                    .ok_or_else(|| {
                        invalid(format!(
                            "range requires an int or long default, got {}",
                            self.kind()
                        ))
                    })?;
                if min > max {
                    return Err(invalid(format!("min {} exceeds max {}", min, max)));
                }
                if self.kind() == ValueKind::Int
                    && (i32::try_from(*min).is_err() || i32::try_from(*max).is_err())
                {
                    return Err(invalid("range exceeds the int domain".to_string()));
                }
                if default < *min || default > *max {
                    return Err(invalid(format!("default {} outside [{}, {}]", default, min, max)));
                }
                Ok(())
            }
            Constraint::FloatRange { min, max } => {
                let default = self
                    .default
                    .as_f64()
                    .ok_or_else(|| {
                        invalid(format!(
                            "float range requires a float default, got {}",
                            self.kind()
                        ))
                    })?;
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(invalid(format!("invalid bound [{}, {}]", min, max)));
                }
                if default < *min || default > *max {
                    return Err(invalid(format!("default {} outside [{}, {}]", default, min, max)));
                }
                Ok(())
            }
            Constraint::OneOf(options) => {
                let default = self
                    .default
                    .as_str()
                    .ok_or_else(|| {
                        invalid(format!(
                            "one_of requires a string default, got {}",
                            self.kind()
                        ))
                    })?;
                if !options.iter().any(|o| o == default) {
                    return Err(invalid(format!(
                        "default '{}' is not one of {:?}",
                        default, options
                    )));
                }
                Ok(())
            }
            Constraint::MaxLen(max) => {
                let default = self
                    .default
                    .as_str()
                    .ok_or_else(|| {
                        invalid(format!(
                            "max_len requires a string default, got {}",
                            self.kind()
                        ))
                    })?;
                if default.chars().count() > *max {
                    return Err(invalid(format!("default longer than {} characters", max)));
                }
                Ok(())
            }
        }
    }
}

/// Immutable definition of a settings module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDefinition {
    identity: ModuleIdentity,
    specs: BTreeMap<String, SettingSpec>,
    sensitive_keys: BTreeSet<String>,
}

impl ModuleDefinition {
    pub fn builder(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> ModuleDefinitionBuilder {
        ModuleDefinitionBuilder {
            identity: ModuleIdentity {
                id: id.into(),
                name: name.into(),
                category: category.into(),
            },
            specs: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn spec(&self, key: &str) -> Option<&SettingSpec> {
        self.specs.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.specs.keys()
    }

    pub fn default_of(&self, key: &str) -> Option<&SettingValue> {
        self.specs.get(key).map(SettingSpec::default_value)
    }

    /// The Defaults Map
    pub fn defaults(&self) -> BTreeMap<String, SettingValue> {
        self.specs
            .iter()
            .map(|(key, spec)| (key.clone(), spec.default.clone()))
            .collect()
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        self.sensitive_keys.contains(key)
    }

    pub fn sensitive_keys(&self) -> &BTreeSet<String> {
        &self.sensitive_keys
    }

    /// Parse a single definition from YAML
    pub fn from_yaml_str(raw: &str) -> Result<Self, DefinitionError> {
        let parsed: RawDefinition =
            serde_yaml::from_str(raw).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        parsed.into_definition()
    }

    /// Parse a `modules:` list of definitions from YAML
    pub fn list_from_yaml_str(raw: &str) -> Result<Vec<Self>, DefinitionError> {
        let parsed: RawDefinitionFile =
            serde_yaml::from_str(raw).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        parsed
            .modules
            .into_iter()
            .map(RawDefinition::into_definition)
            .collect()
    }
}

/// Builder for [`ModuleDefinition`]
#[derive(Debug, Clone)]
pub struct ModuleDefinitionBuilder {
    identity: ModuleIdentity,
    specs: BTreeMap<String, SettingSpec>,
}

impl ModuleDefinitionBuilder {
    pub fn setting(mut self, key: impl Into<String>, spec: SettingSpec) -> Self {
        self.specs.insert(key.into(), spec);
        self
    }

    pub fn build(self) -> Result<ModuleDefinition, DefinitionError> {
        validate_module_id(&self.identity.id)?;

        if self.specs.is_empty() {
            return Err(DefinitionError::Empty(self.identity.id));
        }

        for (key, spec) in &self.specs {
            if key.trim().is_empty() {
                return Err(DefinitionError::InvalidSetting {
                    key: key.clone(),
                    reason: "key cannot be blank".to_string(),
                });
            }
            spec.check(key)?;
        }

        let sensitive_keys = self
            .specs
            .iter()
            .filter(|(_, spec)| spec.sensitive)
            .map(|(key, _)| key.clone())
            .collect();

        Ok(ModuleDefinition {
            identity: self.identity,
            specs: self.specs,
            sensitive_keys,
        })
    }
}

// ===== YAML representation =====

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinitionFile {
    modules: Vec<RawDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    id: String,
    name: String,
    #[serde(default = "default_category")]
    category: String,
    settings: BTreeMap<String, RawSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSetting {
    #[serde(rename = "type")]
    kind: ValueKind,
    default: serde_json::Value,
    #[serde(default)]
    min: Option<serde_json::Number>,
    #[serde(default)]
    max: Option<serde_json::Number>,
    #[serde(default)]
    one_of: Option<Vec<String>>,
    #[serde(default)]
    max_len: Option<usize>,
    #[serde(default)]
    sensitive: bool,
}

fn default_category() -> String {
    "general".to_string()
}

impl RawDefinition {
    fn into_definition(self) -> Result<ModuleDefinition, DefinitionError> {
        let mut builder = ModuleDefinition::builder(self.id, self.name, self.category);
        for (key, raw) in self.settings {
            let spec = raw.into_spec(&key)?;
            builder = builder.setting(key, spec);
        }
        builder.build()
    }
}

impl RawSetting {
    fn into_spec(self, key: &str) -> Result<SettingSpec, DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidSetting {
            key: key.to_string(),
            reason,
        };

        let default = SettingValue::from_json(&self.default)
            .map_err(&invalid)?
            .ok_or_else(|| invalid("default cannot be null".to_string()))?
            .coerce_to(self.kind)
            .ok_or_else(|| invalid(format!("default is not a valid {}", self.kind)))?;

        // A setting carries a single constraint
        let declared = [
            self.min.is_some() || self.max.is_some(),
            self.one_of.is_some(),
            self.max_len.is_some(),
        ];
        if declared.iter().filter(|d| **d).count() > 1 {
            return Err(invalid(
                "min/max, one_of and max_len are mutually exclusive".to_string(),
            ));
        }

        let mut spec = SettingSpec::new(default);

        match (self.min, self.max) {
            (None, None) => {}
            (Some(min), Some(max)) => {
                spec = match self.kind {
                    ValueKind::Int | ValueKind::Long => {
                        let min = min
                            .as_i64()
                            .ok_or_else(|| invalid(format!("min {} is not an integer", min)))?;
                        let max = max
                            .as_i64()
                            .ok_or_else(|| invalid(format!("max {} is not an integer", max)))?;
                        spec.range(min, max)
                    }
                    ValueKind::Float => {
                        let min = min.as_f64().ok_or_else(|| invalid("bad min".to_string()))?;
                        let max = max.as_f64().ok_or_else(|| invalid("bad max".to_string()))?;
                        spec.float_range(min, max)
                    }
                    other => return Err(invalid(format!("min/max not supported for {}", other))),
                };
            }
            _ => return Err(invalid("min and max must be given together".to_string())),
        }

        if let Some(options) = self.one_of {
            spec = spec.one_of(options);
        }
        if let Some(max_len) = self.max_len {
            spec = spec.max_len(max_len);
        }
        if self.sensitive {
            spec = spec.sensitive();
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_sensitive_keys() {
        let definition = ModuleDefinition::builder("voice_input", "Voice Input", "input")
            .setting("retryLimit", SettingSpec::int(3).range(1, 10))
            .setting("apiToken", SettingSpec::string("").sensitive())
            .build()
            .unwrap();

        assert!(definition.is_sensitive("apiToken"));
        assert!(!definition.is_sensitive("retryLimit"));
        assert_eq!(definition.sensitive_keys().len(), 1);
        assert_eq!(definition.default_of("retryLimit"), Some(&SettingValue::Int(3)));
        assert_eq!(definition.defaults().len(), 2);
    }

    #[test]
    fn test_builder_rejects_bad_module_id() {
        let result = ModuleDefinition::builder("_voice", "Voice", "input")
            .setting("a", SettingSpec::bool(true))
            .build();
        assert!(matches!(result, Err(DefinitionError::InvalidModuleId(_))));
    }

    #[test]
    fn test_builder_rejects_inconsistent_constraints() {
        let outside = ModuleDefinition::builder("m", "M", "c")
            .setting("size", SettingSpec::int(20).range(1, 10))
            .build();
        assert!(matches!(outside, Err(DefinitionError::InvalidSetting { .. })));

        let inverted = ModuleDefinition::builder("m", "M", "c")
            .setting("size", SettingSpec::int(5).range(10, 1))
            .build();
        assert!(matches!(inverted, Err(DefinitionError::InvalidSetting { .. })));

        let wrong_kind = ModuleDefinition::builder("m", "M", "c")
            .setting("mode", SettingSpec::string("a").range(1, 2))
            .build();
        assert!(matches!(wrong_kind, Err(DefinitionError::InvalidSetting { .. })));

        let not_an_option = ModuleDefinition::builder("m", "M", "c")
            .setting("mode", SettingSpec::string("c").one_of(["a", "b"]))
            .build();
        assert!(matches!(not_an_option, Err(DefinitionError::InvalidSetting { .. })));

        let empty = ModuleDefinition::builder("m", "M", "c").build();
        assert!(matches!(empty, Err(DefinitionError::Empty(_))));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
id: assistant
name: AI Assistant
category: ai
settings:
  retryLimit: { type: int, default: 3, min: 1, max: 10 }
  temperature: { type: float, default: 0.7, min: 0, max: 2 }
  timeoutMs: { type: long, default: 30000 }
  mode: { type: string, default: chat, one_of: [chat, completion] }
  apiToken: { type: string, default: "", sensitive: true }
  streaming: { type: bool, default: true }
"#;
        let definition = ModuleDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(definition.id(), "assistant");
        assert_eq!(definition.identity().category, "ai");
        assert_eq!(definition.default_of("timeoutMs"), Some(&SettingValue::Long(30000)));
        assert_eq!(definition.default_of("temperature"), Some(&SettingValue::Float(0.7)));
        assert_eq!(
            definition.spec("temperature").unwrap().constraint(),
            &Constraint::FloatRange { min: 0.0, max: 2.0 }
        );
        assert!(definition.is_sensitive("apiToken"));
    }

    #[test]
    fn test_from_yaml_rejects_combined_constraints() {
        let yaml = r#"
id: assistant
name: AI Assistant
settings:
  mode: { type: string, default: push, one_of: [push, toggle], max_len: 10 }
"#;
        assert!(matches!(
            ModuleDefinition::from_yaml_str(yaml),
            Err(DefinitionError::InvalidSetting { ref key, .. }) if key == "mode"
        ));

        let yaml = r#"
id: assistant
name: AI Assistant
settings:
  retryLimit: { type: int, default: 3, min: 1, max: 10, max_len: 2 }
"#;
        assert!(ModuleDefinition::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_builder_rejects_combined_constraints() {
        let result = ModuleDefinition::builder("assistant", "AI Assistant", "ai")
            .setting("mode", SettingSpec::string("push").one_of(["push", "toggle"]).max_len(10))
            .build();
        assert!(matches!(result, Err(DefinitionError::InvalidSetting { .. })));
    }

    #[test]
    fn test_from_yaml_rejects_mismatched_default() {
        let yaml = r#"
id: assistant
name: AI Assistant
settings:
  retryLimit: { type: int, default: "many" }
"#;
        assert!(matches!(
            ModuleDefinition::from_yaml_str(yaml),
            Err(DefinitionError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_list_from_yaml() {
        let yaml = r#"
modules:
  - id: voice_input
    name: Voice Input
    settings:
      language: { type: string, default: en-US }
  - id: console
    name: Console
    category: tools
    settings:
      historySize: { type: int, default: 100, min: 0, max: 1000 }
"#;
        let definitions = ModuleDefinition::list_from_yaml_str(yaml).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].identity().category, "general");
        assert_eq!(definitions[1].id(), "console");
    }
}
