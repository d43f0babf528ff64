//! Validation of module ids and setting values

use crate::contract::{SettingValue, ValidationResult};
use std::sync::Arc;

use super::definition::{Constraint, DefinitionError, ModuleDefinition};

/// Validate a module id
///
/// The id doubles as the storage namespace, so it must start with an
/// alphanumeric character and contain only alphanumerics, '_', '.' and '-'.
pub fn validate_module_id(module_id: &str) -> Result<(), DefinitionError> {
    let Some(first_char) = module_id.chars().next() else {
        return Err(DefinitionError::InvalidModuleId(
            "module id cannot be empty".to_string(),
        ));
    };

    if !first_char.is_ascii_alphanumeric() {
        return Err(DefinitionError::InvalidModuleId(format!(
            "module id '{}' must start with an alphanumeric character",
            module_id
        )));
    }

    let is_valid = module_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');

    if !is_valid {
        return Err(DefinitionError::InvalidModuleId(format!(
            "module id '{}' contains invalid characters. Only alphanumeric, '_', '.', and '-' are allowed",
            module_id
        )));
    }

    Ok(())
}

/// Per-module value validator
///
/// Implementations must be pure: no side effects, safe to call
/// concurrently without synchronization.
pub trait Validator: Send + Sync {
    /// Validate `candidate` for `key`. `None` stands for a missing value.
    fn validate(&self, key: &str, candidate: Option<&SettingValue>) -> ValidationResult;
}

/// Validator driven by the constraints of a [`ModuleDefinition`]
///
/// - missing values resolve to the declared default
/// - values are coerced toward the default's kind, or rejected
/// - numeric ranges clamp instead of rejecting
/// - enumerations reject anything outside the set
/// - length limits truncate
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    definition: Arc<ModuleDefinition>,
}

impl SchemaValidator {
    pub fn new(definition: Arc<ModuleDefinition>) -> Self {
        Self { definition }
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, key: &str, candidate: Option<&SettingValue>) -> ValidationResult {
        let Some(spec) = self.definition.spec(key) else {
            return ValidationResult::Invalid(format!("unknown key '{}'", key));
        };

        let Some(candidate) = candidate else {
            return ValidationResult::Corrected(spec.default_value().clone());
        };

        let Some(coerced) = candidate.coerce_to(spec.kind()) else {
            return ValidationResult::Invalid(format!(
                "expected {}, got {} '{}'",
                spec.kind(),
                candidate.kind(),
                candidate
            ));
        };

        if let SettingValue::Float(f) = coerced {
            if !f.is_finite() {
                return ValidationResult::Invalid(format!("{} is not a finite number", f));
            }
        }

        let constrained = match apply_constraint(spec.constraint(), coerced) {
            Ok(value) => value,
            Err(reason) => return ValidationResult::Invalid(reason),
        };

        if &constrained == candidate {
            ValidationResult::Valid
        } else {
            ValidationResult::Corrected(constrained)
        }
    }
}

fn apply_constraint(constraint: &Constraint, value: SettingValue) -> Result<SettingValue, String> {
    match (constraint, value) {
        (Constraint::IntRange { min, max }, SettingValue::Int(i)) => {
            // Range bounds fit i32 for int settings; checked at definition time
            let clamped = i64::from(i).clamp(*min, *max);
            Ok(SettingValue::Int(i32::try_from(clamped).unwrap_or(i)))
        }
        (Constraint::IntRange { min, max }, SettingValue::Long(l)) => {
            Ok(SettingValue::Long(l.clamp(*min, *max)))
        }
        (Constraint::FloatRange { min, max }, SettingValue::Float(f)) => {
            Ok(SettingValue::Float(f.clamp(*min, *max)))
        }
        (Constraint::OneOf(options), SettingValue::String(s)) => {
            if options.iter().any(|o| *o == s) {
                Ok(SettingValue::String(s))
            } else {
                Err(format!("'{}' is not one of {:?}", s, options))
            }
        }
        (Constraint::MaxLen(max), SettingValue::String(s)) => {
            if s.chars().count() > *max {
                Ok(SettingValue::String(s.chars().take(*max).collect()))
            } else {
                Ok(SettingValue::String(s))
            }
        }
        (_, value) => Ok(value),
    }
}
