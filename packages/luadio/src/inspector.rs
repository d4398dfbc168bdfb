//! UI-side model of the script's fields.
//!
//! One control per [`FieldDescriptor`], in declaration order. An edit
//! normalizes the value for its control (clamp into range, snap stepped
//! knobs), stores it as the control's displayed value and queues exactly
//! one update for the audio thread. The displayed value is never read back
//! from the interpreter.

use crate::attributes::{FieldDescriptor, FieldKind};
use crate::field_queue::{FieldSender, FieldValue};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("field '{name}' expects a {expected:?} value, got {got:?}")]
    KindMismatch {
        name: String,
        expected: FieldKind,
        got: FieldKind,
    },
    #[error("expected name=value, got '{0}'")]
    BadAssignment(String),
    #[error("cannot parse '{text}' as a {kind:?} value")]
    BadValue { text: String, kind: FieldKind },
}

/// Result of an accepted edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edit {
    /// Value after clamping and snapping.
    pub value: FieldValue,
    /// Whether an update reached the queue (only while a script runs).
    pub queued: bool,
}

/// Current value shown by the control for `field`.
pub fn field_value(field: &FieldDescriptor) -> FieldValue {
    match field {
        FieldDescriptor::Float { value, .. } => FieldValue::Float(*value),
        FieldDescriptor::Int { value, .. } => FieldValue::Int(*value),
        FieldDescriptor::Bool { value, .. } => FieldValue::Bool(*value),
    }
}

fn snap(value: f32, min: f32, max: f32, steps: Option<u32>) -> f32 {
    let value = value.clamp(min, max);
    match steps {
        Some(steps) if steps > 0 && max > min => {
            let step = (max - min) / steps as f32;
            (min + ((value - min) / step).round() * step).clamp(min, max)
        }
        _ => value,
    }
}

pub struct Inspector {
    fields: Vec<FieldDescriptor>,
    sender: FieldSender,
}

impl Inspector {
    pub fn new(sender: FieldSender) -> Self {
        Self {
            fields: Vec::new(),
            sender,
        }
    }

    /// Replace the controls after a successful compile.
    pub fn set_fields(&mut self, fields: Vec<FieldDescriptor>) {
        self.fields = fields;
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.field(name).map(field_value)
    }

    pub fn edit(&mut self, name: &str, value: FieldValue) -> Result<Edit, EditError> {
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.name() == name)
            .ok_or_else(|| EditError::UnknownField(name.to_string()))?;

        let normalized = match (field, value) {
            (
                FieldDescriptor::Float {
                    min,
                    max,
                    value: current,
                    steps,
                    ..
                },
                FieldValue::Float(v),
            ) => {
                *current = snap(v, *min, *max, *steps);
                FieldValue::Float(*current)
            }
            (
                FieldDescriptor::Int {
                    min,
                    max,
                    value: current,
                    ..
                },
                FieldValue::Int(v),
            ) => {
                *current = v.clamp(*min, *max);
                FieldValue::Int(*current)
            }
            (FieldDescriptor::Bool { value: current, .. }, FieldValue::Bool(v)) => {
                *current = v;
                FieldValue::Bool(v)
            }
            (field, value) => {
                return Err(EditError::KindMismatch {
                    name: name.to_string(),
                    expected: field.kind(),
                    got: value.kind(),
                })
            }
        };

        let queued = self.sender.send(name, normalized);
        log::debug!("Edited {} = {} (queued: {})", name, normalized, queued);
        Ok(Edit {
            value: normalized,
            queued,
        })
    }

    /// Apply a `name=value` edit, parsing the value for the field's type.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<Edit, EditError> {
        let (name, text) = assignment
            .split_once('=')
            .map(|(n, v)| (n.trim(), v.trim()))
            .filter(|(n, v)| !n.is_empty() && !v.is_empty())
            .ok_or_else(|| EditError::BadAssignment(assignment.to_string()))?;
        let kind = self
            .field(name)
            .map(FieldDescriptor::kind)
            .ok_or_else(|| EditError::UnknownField(name.to_string()))?;
        let value = FieldValue::parse(kind, text).ok_or_else(|| EditError::BadValue {
            text: text.to_string(),
            kind,
        })?;
        self.edit(name, value)
    }
}
