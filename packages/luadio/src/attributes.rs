//! Attribute compiler.
//!
//! Scripts declare UI-editable parameters with a bracketed annotation on the
//! line before a global assignment:
//!
//! ```text
//! [SliderFloat(20, 880)]
//! frequency = 440.0
//!
//! [KnobFloat(0, 1, 8)]
//! mix = 0.5
//!
//! [Checkbox]
//! bypass = false
//! ```
//!
//! Annotations are not valid Lua, so the compiler rewrites each recognized
//! one into a line comment by inserting `--` in front of the `[`, and emits a
//! [`FieldDescriptor`] for it. Both outputs come from the same token list.
//!
//! Recognition is best-effort: an annotation whose literals do not parse is
//! left untouched and produces no field, and bracketed text that does not
//! name a known control is ordinary script text.

use serde::{Deserialize, Serialize};

use crate::tokenizer::{tokenize, Token, TokenKind};

/// Inserted before each recognized annotation.
pub const COMMENT_MARKER: &str = "--";

/// UI control requested by an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    SliderFloat,
    SliderInt,
    InputFloat,
    InputInt,
    DragFloat,
    DragInt,
    KnobFloat,
    Checkbox,
}

impl ControlKind {
    pub const ALL: [ControlKind; 8] = [
        ControlKind::SliderFloat,
        ControlKind::SliderInt,
        ControlKind::InputFloat,
        ControlKind::InputInt,
        ControlKind::DragFloat,
        ControlKind::DragInt,
        ControlKind::KnobFloat,
        ControlKind::Checkbox,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ControlKind::SliderFloat => "SliderFloat",
            ControlKind::SliderInt => "SliderInt",
            ControlKind::InputFloat => "InputFloat",
            ControlKind::InputInt => "InputInt",
            ControlKind::DragFloat => "DragFloat",
            ControlKind::DragInt => "DragInt",
            ControlKind::KnobFloat => "KnobFloat",
            ControlKind::Checkbox => "Checkbox",
        }
    }

    /// Case-insensitive lookup of a control name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Value type edited by this control.
    pub fn field_kind(self) -> FieldKind {
        match self {
            ControlKind::SliderFloat
            | ControlKind::InputFloat
            | ControlKind::DragFloat
            | ControlKind::KnobFloat => FieldKind::Float,
            ControlKind::SliderInt | ControlKind::InputInt | ControlKind::DragInt => FieldKind::Int,
            ControlKind::Checkbox => FieldKind::Bool,
        }
    }
}

/// Value type of a field, used as the tag on queued updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Float,
    Int,
    Bool,
}

/// One UI-editable parameter discovered in a script.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDescriptor {
    Float {
        control: ControlKind,
        name: String,
        min: f32,
        max: f32,
        value: f32,
        /// Quantization step count for stepped controls.
        #[serde(skip_serializing_if = "Option::is_none")]
        steps: Option<u32>,
    },
    Int {
        control: ControlKind,
        name: String,
        min: i32,
        max: i32,
        value: i32,
    },
    Bool {
        name: String,
        value: bool,
    },
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        match self {
            FieldDescriptor::Float { name, .. }
            | FieldDescriptor::Int { name, .. }
            | FieldDescriptor::Bool { name, .. } => name,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldDescriptor::Float { .. } => FieldKind::Float,
            FieldDescriptor::Int { .. } => FieldKind::Int,
            FieldDescriptor::Bool { .. } => FieldKind::Bool,
        }
    }

    pub fn control(&self) -> ControlKind {
        match self {
            FieldDescriptor::Float { control, .. } | FieldDescriptor::Int { control, .. } => *control,
            FieldDescriptor::Bool { .. } => ControlKind::Checkbox,
        }
    }
}

/// Output of one compile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    /// Source with every recognized annotation commented out.
    pub source: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

/// Tokenize and compile `source` in one pass.
pub fn compile(source: &str) -> CompiledScript {
    let tokens = tokenize(source);
    compile_tokens(&tokens, source)
}

/// Compile a token list produced from `source`.
pub fn compile_tokens(tokens: &[Token<'_>], source: &str) -> CompiledScript {
    let mut fields = Vec::new();
    let mut insertions = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        if !token.is(TokenKind::SquareBracketOpen) {
            continue;
        }

        let matched = match_numeric_pair(tokens, source, index)
            .or_else(|| match_numeric_stepped(tokens, source, index))
            .or_else(|| match_checkbox(tokens, source, index));

        match matched {
            Some(Ok(field)) => {
                log::debug!("Annotation at byte {}: {:?}", token.offset, field);
                insertions.push(token.offset);
                fields.push(field);
            }
            Some(Err(reason)) => {
                log::debug!("Skipping annotation at byte {}: {}", token.offset, reason);
            }
            None => {}
        }
    }

    CompiledScript {
        source: rewrite(source, &insertions),
        fields,
    }
}

/// Insert the comment marker at each offset (ascending) in a single
/// left-to-right pass.
fn rewrite(source: &str, offsets: &[usize]) -> String {
    let mut out = String::with_capacity(source.len() + offsets.len() * COMMENT_MARKER.len());
    let mut drift = 0;
    let mut copied = 0;

    for (rewritten, &offset) in offsets.iter().enumerate() {
        debug_assert_eq!(drift, COMMENT_MARKER.len() * rewritten);
        out.push_str(&source[copied..offset]);
        debug_assert_eq!(out.len(), offset + drift);
        out.push_str(COMMENT_MARKER);
        drift += COMMENT_MARKER.len();
        copied = offset;
    }
    out.push_str(&source[copied..]);
    out
}

/// A recognized annotation shape: `Ok` carries the field, `Err` why its
/// literals were rejected.
type Match = Option<Result<FieldDescriptor, String>>;

fn kinds_match(tokens: &[Token<'_>], start: usize, pattern: &[TokenKind]) -> bool {
    tokens.len() > start + pattern.len()
        && tokens[start..start + pattern.len()]
            .iter()
            .zip(pattern)
            .all(|(token, kind)| token.kind == *kind)
}

/// `name = <literal>` starting at `start`, on a later line than the
/// annotation's closing bracket.
fn assignment<'a, 'src>(
    tokens: &'a [Token<'src>],
    source: &str,
    start: usize,
    literal: TokenKind,
) -> Option<(&'a Token<'src>, &'a Token<'src>)> {
    let name = tokens.get(start)?;
    let equals = tokens.get(start + 1)?;
    let value = tokens.get(start + 2)?;

    if !name.is(TokenKind::Identifier) || !equals.is(TokenKind::Operator) || equals.text != "=" {
        return None;
    }
    if !value.is(literal) {
        return None;
    }
    // The assignment has to survive the rewrite, so it cannot share the
    // annotation's line.
    let close = tokens.get(start - 1)?;
    if !source[close.offset..name.offset].contains('\n') {
        return None;
    }
    Some((name, value))
}

/// Grammar A: `[Type(min, max)]` then `name = number`.
fn match_numeric_pair(tokens: &[Token<'_>], source: &str, i: usize) -> Match {
    use TokenKind::*;
    let shape = [
        SquareBracketOpen,
        Identifier,
        ParenthesisOpen,
        Number,
        Comma,
        Number,
        ParenthesisClose,
        SquareBracketClose,
    ];
    if !kinds_match(tokens, i, &shape) {
        return None;
    }
    let control = ControlKind::from_name(tokens[i + 1].text)?;
    if control.field_kind() == FieldKind::Bool {
        return None;
    }
    let (name, value) = assignment(tokens, source, i + 8, Number)?;
    Some(numeric_field(
        control,
        name.text,
        tokens[i + 3].text,
        tokens[i + 5].text,
        None,
        value.text,
    ))
}

/// Grammar B: `[Type(min, max, steps)]` then `name = number`. Only float
/// controls take a step count.
fn match_numeric_stepped(tokens: &[Token<'_>], source: &str, i: usize) -> Match {
    use TokenKind::*;
    let shape = [
        SquareBracketOpen,
        Identifier,
        ParenthesisOpen,
        Number,
        Comma,
        Number,
        Comma,
        Number,
        ParenthesisClose,
        SquareBracketClose,
    ];
    if !kinds_match(tokens, i, &shape) {
        return None;
    }
    let control = ControlKind::from_name(tokens[i + 1].text)?;
    if control.field_kind() != FieldKind::Float {
        return None;
    }
    let (name, value) = assignment(tokens, source, i + 10, Number)?;
    Some(numeric_field(
        control,
        name.text,
        tokens[i + 3].text,
        tokens[i + 5].text,
        Some(tokens[i + 7].text),
        value.text,
    ))
}

/// Grammar C: `[Checkbox]` then `name = true|false`.
fn match_checkbox(tokens: &[Token<'_>], source: &str, i: usize) -> Match {
    use TokenKind::*;
    if !kinds_match(tokens, i, &[SquareBracketOpen, Identifier, SquareBracketClose]) {
        return None;
    }
    if ControlKind::from_name(tokens[i + 1].text)? != ControlKind::Checkbox {
        return None;
    }
    let (name, value) = assignment(tokens, source, i + 3, Keyword)?;
    let parsed = match value.text {
        "true" => true,
        "false" => false,
        other => return Some(Err(format!("'{}' is not a boolean", other))),
    };
    Some(Ok(FieldDescriptor::Bool {
        name: name.text.to_string(),
        value: parsed,
    }))
}

fn parse_literal<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, String> {
    text.parse::<T>()
        .map_err(|_| format!("{} '{}' is not a valid {}", what, text, std::any::type_name::<T>()))
}

fn numeric_field(
    control: ControlKind,
    name: &str,
    min: &str,
    max: &str,
    steps: Option<&str>,
    value: &str,
) -> Result<FieldDescriptor, String> {
    let name = name.to_string();
    match control.field_kind() {
        FieldKind::Float => {
            let min: f32 = parse_literal(min, "min")?;
            let max: f32 = parse_literal(max, "max")?;
            let value: f32 = parse_literal(value, "value")?;
            let steps = steps.map(|s| parse_literal::<u32>(s, "steps")).transpose()?;
            if !(min.is_finite() && max.is_finite() && value.is_finite()) {
                return Err("non-finite bound".to_string());
            }
            if min > max {
                return Err(format!("min {} exceeds max {}", min, max));
            }
            Ok(FieldDescriptor::Float {
                control,
                name,
                min,
                max,
                value: value.clamp(min, max),
                steps,
            })
        }
        FieldKind::Int => {
            let min: i32 = parse_literal(min, "min")?;
            let max: i32 = parse_literal(max, "max")?;
            let value: i32 = parse_literal(value, "value")?;
            if min > max {
                return Err(format!("min {} exceeds max {}", min, max));
            }
            Ok(FieldDescriptor::Int {
                control,
                name,
                min,
                max,
                value: value.clamp(min, max),
            })
        }
        FieldKind::Bool => Err("checkbox takes no arguments".to_string()),
    }
}
