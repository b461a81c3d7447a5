//! Rendering of submission script templates.
//!
//! Templates use `{name}` placeholders where `name` is an identifier, and
//! `{{`/`}}` for literal braces. Shell variables therefore have to be
//! written as `${{VAR}}`.
//!
//! A placeholder may carry a format spec after a colon, `{threads:03d}` or
//! `{queue:>8}`. Fill, alignment, zero padding, width and the `d`/`s` types
//! are understood. The only conversion accepted is `!s`.

use crate::config::TemplateOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;

static FORMAT_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<fill>.)?(?P<align>[<>^]))?(?P<zero>0)?(?P<width>\d+)?(?P<kind>[ds])?$")
        .expect("valid format spec regex")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template references {{{0}}} but no value with that name is set")]
    MissingPlaceholder(String),
    #[error("Malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("Format spec '{spec}' can't be applied to {{{name}}}")]
    Format { name: String, spec: String },
}

/// substitute every placeholder of `template` with its value from `values`
pub fn render(template: &str, values: &TemplateOptions) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((offset, current)) = chars.next() {
        match current {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                output.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                output.push('}');
            }
            '}' => {
                return Err(TemplateError::Malformed {
                    offset,
                    reason: "single '}' encountered",
                })
            }
            '{' => {
                let start = offset + 1;
                let end = loop {
                    match chars.next() {
                        Some((end, '}')) => break end,
                        Some(_) => continue,
                        None => {
                            return Err(TemplateError::Malformed {
                                offset,
                                reason: "unterminated placeholder",
                            })
                        }
                    }
                };

                let field = &template[start..end];
                let (name, spec) = split_field(field).ok_or(TemplateError::Malformed {
                    offset,
                    reason: "only the !s conversion is supported",
                })?;
                if !is_identifier(name) {
                    return Err(TemplateError::Malformed {
                        offset,
                        reason: "placeholder is not an identifier",
                    });
                }

                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingPlaceholder(name.to_owned()))?;
                let rendered = apply_spec(value, spec).ok_or_else(|| TemplateError::Format {
                    name: name.to_owned(),
                    spec: spec.to_owned(),
                })?;
                output.push_str(&rendered);
            }
            other => output.push(other),
        }
    }

    Ok(output)
}

/// split `name[!conversion][:spec]`, `None` for conversions other than `!s`
fn split_field(field: &str) -> Option<(&str, &str)> {
    let split = field.find([':', '!']).unwrap_or(field.len());
    let (name, rest) = field.split_at(split);

    let spec = match rest.strip_prefix('!') {
        Some(conversion) => match conversion.strip_prefix('s')? {
            "" => "",
            spec => spec.strip_prefix(':')?,
        },
        None => rest.strip_prefix(':').unwrap_or(rest),
    };

    Some((name, spec))
}

/// `None` if `spec` is outside the supported subset or doesn't fit `value`
fn apply_spec(value: &Value, spec: &str) -> Option<String> {
    let rendered = format_value(value);
    if spec.is_empty() {
        return Some(rendered);
    }

    let captures = FORMAT_SPEC.captures(spec)?;
    let numeric = value.is_number();
    match captures.name("kind").map(|kind| kind.as_str()) {
        Some("d") if !(value.is_i64() || value.is_u64()) => return None,
        Some("s") if numeric => return None,
        _ => (),
    }

    let width = match captures.name("width") {
        Some(width) => width.as_str().parse::<usize>().ok()?,
        None => 0,
    };
    let length = rendered.chars().count();
    if length >= width {
        return Some(rendered);
    }
    let padding = width - length;

    let zero = captures.name("zero").is_some();
    let align = captures.name("align").map(|align| align.as_str());
    if zero && numeric && align.is_none() {
        // zero padding goes between the sign and the digits
        let (sign, digits) = match rendered.strip_prefix('-') {
            Some(digits) => ("-", digits),
            None => ("", rendered.as_str()),
        };
        return Some(format!("{sign}{}{digits}", "0".repeat(padding)));
    }

    let fill = match captures.name("fill") {
        Some(fill) => fill.as_str(),
        None if zero => "0",
        None => " ",
    };
    let align = align.unwrap_or(if numeric { ">" } else { "<" });
    let (left, right) = match align {
        "<" => (0, padding),
        ">" => (padding, 0),
        _ => (padding / 2, padding - padding / 2),
    };

    Some(format!("{}{rendered}{}", fill.repeat(left), fill.repeat(right)))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();

    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|rest| rest.is_ascii_alphanumeric() || rest == '_')
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|rendered| rendered.trim_end().to_owned())
            .unwrap_or_default(),
    }
}
