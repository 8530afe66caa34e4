//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations per field.
//! The resolver turns error violations into one consolidated failure.

use serde::{Deserialize, Serialize};

use crate::fields::{FieldValue, FieldValues};
use crate::templates::{FieldDecl, FieldType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationViolation {
    pub rule: String,
    pub field: String,
    pub severity: ViolationSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<ValidationViolation>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Names of required fields without a value, in declaration order.
    pub fn missing(&self) -> Vec<String> {
        self.errors()
            .filter(|v| v.rule == RequiredFieldRule.name())
            .map(|v| v.field.clone())
            .collect()
    }

    /// Names of fields whose value has the wrong shape, in declaration order.
    pub fn invalid(&self) -> Vec<String> {
        let mut fields: Vec<String> = vec![];
        for v in self.errors().filter(|v| v.rule != RequiredFieldRule.name()) {
            if !fields.contains(&v.field) {
                fields.push(v.field.clone());
            }
        }
        fields
    }

    fn errors(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
    }
}

/// Validation rule trait - produces violations for one field
pub trait FieldRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, decl: &FieldDecl, value: Option<&FieldValue>) -> Vec<ValidationViolation>;
}

fn violation(rule: &dyn FieldRule, decl: &FieldDecl, message: String) -> ValidationViolation {
    ValidationViolation {
        rule: rule.name().to_string(),
        field: decl.name.clone(),
        severity: ViolationSeverity::Error,
        message,
    }
}

// --- Concrete Rules ---

pub struct RequiredFieldRule;

impl FieldRule for RequiredFieldRule {
    fn name(&self) -> &'static str { "required" }

    fn check(&self, decl: &FieldDecl, value: Option<&FieldValue>) -> Vec<ValidationViolation> {
        let provided = value.map_or(false, |v| !v.is_blank());
        if decl.required && !provided && decl.default.is_none() {
            vec![violation(self, decl, format!("'{}' is required", decl.name))]
        } else {
            vec![]
        }
    }
}

/// The value must have the JSON shape its declared type accepts.
pub struct FieldKindRule;

impl FieldRule for FieldKindRule {
    fn name(&self) -> &'static str { "kind" }

    fn check(&self, decl: &FieldDecl, value: Option<&FieldValue>) -> Vec<ValidationViolation> {
        // Blank values are absent, not malformed.
        let Some(value) = value.filter(|v| !v.is_blank()) else {
            return vec![];
        };
        let accepted = match decl.field_type {
            FieldType::Text | FieldType::Date | FieldType::Select => {
                matches!(value, FieldValue::Text(_))
            }
            FieldType::Checkbox => value.as_bool().is_some(),
            FieldType::Image => matches!(value, FieldValue::Text(_) | FieldValue::Bytes(_)),
        };
        if accepted {
            vec![]
        } else {
            vec![violation(
                self,
                decl,
                format!("'{}' does not accept this value for a {:?} field", decl.name, decl.field_type),
            )]
        }
    }
}

pub struct SelectOptionRule;

impl FieldRule for SelectOptionRule {
    fn name(&self) -> &'static str { "select_option" }

    fn check(&self, decl: &FieldDecl, value: Option<&FieldValue>) -> Vec<ValidationViolation> {
        if decl.field_type != FieldType::Select || decl.options.is_empty() {
            return vec![];
        }
        match value {
            Some(FieldValue::Text(s)) if !s.is_empty() && !decl.options.contains(s) => {
                vec![violation(
                    self,
                    decl,
                    format!("'{}' is not one of [{}]", s, decl.options.join(", ")),
                )]
            }
            _ => vec![],
        }
    }
}

/// Validator runs every rule over every field and keeps all violations
pub struct FieldValidator {
    rules: Vec<Box<dyn FieldRule>>,
}

impl FieldValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldRule),
                Box::new(FieldKindRule),
                Box::new(SelectOptionRule),
            ],
        }
    }

    pub fn validate<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a FieldDecl>,
        values: &FieldValues,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        for decl in fields {
            let value = values.get(&decl.name);
            for rule in &self.rules {
                report.violations.extend(rule.check(decl, value));
            }
        }
        report
    }
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new()
    }
}
