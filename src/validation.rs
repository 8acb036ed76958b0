//! Parameter validation
//!
//! Input and result values are validated structurally against the profile's
//! use case shapes before and after map execution. The validator reads the
//! profile AST as data: named model and field references are resolved
//! lazily with cycle detection, and every issue carries the field path it
//! was found at.

use serde_json::Value;

use crate::ast::{FieldDefinition, PrimitiveTypeName, ProfileDocument, TypeNode};
use crate::values::{Variable, Variables};
use crate::{Error, ErrorReport, Result};

/// Validate a use case's input against its profile shape.
pub fn validate_input(
    profile: &ProfileDocument,
    usecase_name: &str,
    input: &Variables,
) -> Result<()> {
    let use_case = profile.use_case(usecase_name).ok_or_else(|| {
        Error::unexpected(format!("Profile does not define use case '{usecase_name}'"))
    })?;

    let Some(slot) = &use_case.input else {
        return Ok(());
    };

    let issues = collect_issues(profile, &slot.value, &Variable::Map(input.clone()), "input");
    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::InputValidation(report(usecase_name, "Input", issues)))
    }
}

/// Validate a use case's result against its profile shape.
pub fn validate_result(
    profile: &ProfileDocument,
    usecase_name: &str,
    result: &Variable,
) -> Result<()> {
    let use_case = profile.use_case(usecase_name).ok_or_else(|| {
        Error::unexpected(format!("Profile does not define use case '{usecase_name}'"))
    })?;

    let Some(slot) = &use_case.result else {
        return Ok(());
    };

    let issues = collect_issues(profile, &slot.value, result, "result");
    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::ResultValidation(report(usecase_name, "Result", issues)))
    }
}

fn report(usecase_name: &str, what: &str, issues: Vec<String>) -> ErrorReport {
    let mut report = ErrorReport::new(format!(
        "{what} validation failed for use case '{usecase_name}'"
    ));
    for issue in issues {
        report = report.detail(issue);
    }
    report
}

fn collect_issues(
    profile: &ProfileDocument,
    shape: &TypeNode,
    value: &Variable,
    path: &str,
) -> Vec<String> {
    let mut walker = Walker {
        profile,
        issues: Vec::new(),
        resolution_stack: Vec::new(),
    };
    walker.validate(shape, value, path);
    walker.issues
}

struct Walker<'a> {
    profile: &'a ProfileDocument,
    issues: Vec<String>,
    /// Named models currently being resolved, for cycle detection
    resolution_stack: Vec<String>,
}

impl Walker<'_> {
    fn validate(&mut self, shape: &TypeNode, value: &Variable, path: &str) {
        // Every shape is nullable unless wrapped in NonNull
        if matches!(value, Variable::None) && !matches!(shape, TypeNode::NonNull { .. }) {
            return;
        }

        match shape {
            TypeNode::Primitive { name } => self.validate_primitive(*name, value, path),
            TypeNode::ModelReference { name } => self.validate_model(name, value, path),
            TypeNode::Object { fields } => self.validate_object(fields, value, path),
            TypeNode::List { element_type } => self.validate_list(element_type, value, path),
            TypeNode::Union { types } => self.validate_union(types, value, path),
            TypeNode::Enum { values } => self.validate_enum(values, value, path),
            TypeNode::NonNull { inner } => {
                if matches!(value, Variable::None) {
                    self.issues.push(format!("{path}: must not be null"));
                } else {
                    self.validate(inner, value, path);
                }
            }
        }
    }

    fn validate_primitive(&mut self, name: PrimitiveTypeName, value: &Variable, path: &str) {
        let ok = match name {
            PrimitiveTypeName::String => matches!(value, Variable::String(_)),
            PrimitiveTypeName::Number => matches!(value, Variable::Number(_)),
            PrimitiveTypeName::Boolean => matches!(value, Variable::Bool(_)),
        };
        if !ok {
            let expected = match name {
                PrimitiveTypeName::String => "string",
                PrimitiveTypeName::Number => "number",
                PrimitiveTypeName::Boolean => "boolean",
            };
            self.issues.push(format!("{path}: expected {expected}"));
        }
    }

    /// Named-model references are resolved before field references and
    /// memoized through the profile document itself.
    fn validate_model(&mut self, name: &str, value: &Variable, path: &str) {
        if self.resolution_stack.iter().any(|seen| seen == name) {
            self.issues.push(format!(
                "{path}: circular reference while resolving model '{name}'"
            ));
            return;
        }

        match self.profile.named_model(name) {
            Some(shape) => {
                self.resolution_stack.push(name.to_string());
                let shape = shape.clone();
                self.validate(&shape, value, path);
                self.resolution_stack.pop();
            }
            // An opaque model declaration accepts any value
            None if self.model_is_declared(name) => {}
            None => self
                .issues
                .push(format!("{path}: unknown model '{name}'")),
        }
    }

    fn model_is_declared(&self, name: &str) -> bool {
        self.profile.definitions.iter().any(|definition| {
            matches!(
                definition,
                crate::ast::ProfileDefinition::NamedModel(model) if model.model_name == name
            )
        })
    }

    fn validate_object(&mut self, fields: &[FieldDefinition], value: &Variable, path: &str) {
        let Some(map) = value.cast_to_non_primitive() else {
            self.issues.push(format!("{path}: expected object"));
            return;
        };

        for field in fields {
            let field_path = format!("{path}.{}", field.field_name);
            match map.get(&field.field_name) {
                Some(field_value) => {
                    let shape = field
                        .field_type
                        .as_deref()
                        .cloned()
                        .or_else(|| self.profile.named_field(&field.field_name).cloned());
                    if let Some(shape) = shape {
                        // Descending into a field is structural progress, so
                        // the reference-cycle guard starts fresh
                        let saved = std::mem::take(&mut self.resolution_stack);
                        self.validate(&shape, field_value, &field_path);
                        self.resolution_stack = saved;
                    }
                }
                None if field.required => {
                    self.issues
                        .push(format!("{field_path}: required field is missing"));
                }
                None => {}
            }
        }
        // Objects are open: fields beyond the declared ones pass through
    }

    fn validate_list(&mut self, element_type: &TypeNode, value: &Variable, path: &str) {
        let Variable::List(items) = value else {
            self.issues.push(format!("{path}: expected list"));
            return;
        };
        for (index, item) in items.iter().enumerate() {
            let saved = std::mem::take(&mut self.resolution_stack);
            self.validate(element_type, item, &format!("{path}[{index}]"));
            self.resolution_stack = saved;
        }
    }

    fn validate_union(&mut self, types: &[TypeNode], value: &Variable, path: &str) {
        for alternative in types {
            let mut probe = Walker {
                profile: self.profile,
                issues: Vec::new(),
                resolution_stack: self.resolution_stack.clone(),
            };
            probe.validate(alternative, value, path);
            if probe.issues.is_empty() {
                return;
            }
        }
        self.issues
            .push(format!("{path}: no union alternative matched"));
    }

    fn validate_enum(&mut self, values: &[crate::ast::EnumValue], value: &Variable, path: &str) {
        let actual = Value::from(value);
        if !values.iter().any(|allowed| allowed.value == actual) {
            self.issues.push(format!(
                "{path}: '{actual}' is not one of the allowed enum values"
            ));
        }
    }
}
