//! Tokenising and binding of command arguments.
//!
//! A command line is a sequence of tokens separated by spaces or `&`. Each
//! token is either `name=value` or a bare value bound positionally to the
//! next unbound declared argument. Values are percent-decoded and may be
//! wrapped in double quotes to carry separators.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use netschedule_types::JobRef;
use percent_encoding::percent_decode_str;

use super::CommandError;

/// Value type of a declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Signed decimal integer.
    Int,
    /// Job key or bare job id.
    Id,
    /// Any string.
    Str,
    /// Remainder of the line, verbatim. Only valid as the last argument.
    Ellipsis,
}

/// Whether an argument must be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be supplied.
    Required,
    /// Replaced by the given default when absent.
    Optional(&'static str),
    /// Optional, but once any chained argument is supplied every later
    /// chained argument becomes mandatory.
    Optchain,
}

/// Declaration of one command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentSpec {
    /// Argument name as used in `name=value` tokens.
    pub name: &'static str,
    /// Value type.
    pub kind: ArgKind,
    /// Presence rule.
    pub presence: Presence,
}

impl ArgumentSpec {
    /// Declares a mandatory argument.
    #[must_use]
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            presence: Presence::Required,
        }
    }

    /// Declares an optional argument with a default.
    #[must_use]
    pub const fn optional(name: &'static str, kind: ArgKind, default: &'static str) -> Self {
        Self {
            name,
            kind,
            presence: Presence::Optional(default),
        }
    }

    /// Declares a chained optional argument.
    #[must_use]
    pub const fn optchain(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            presence: Presence::Optchain,
        }
    }

    /// Declares a trailing free-form argument.
    #[must_use]
    pub const fn ellipsis(name: &'static str) -> Self {
        Self {
            name,
            kind: ArgKind::Ellipsis,
            presence: Presence::Optional(""),
        }
    }
}

/// One token of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    /// Field name for `name=value` tokens.
    pub name: Option<&'a str>,
    /// Raw (still encoded) value.
    pub raw_value: &'a str,
    /// Byte offset of the token in the line.
    pub offset: usize,
    /// Byte offset of the value in the line.
    pub value_offset: usize,
}

impl Token<'_> {
    /// 1-based character column of the token within `line`.
    #[must_use]
    pub fn column(&self, line: &str) -> usize {
        column_of(line, self.offset)
    }
}

/// 1-based character column of a byte offset.
#[must_use]
pub fn column_of(line: &str, offset: usize) -> usize {
    line.get(..offset).map_or(offset, |prefix| prefix.chars().count()) + 1
}

/// Splits a line into tokens, honouring double quotes.
#[must_use]
pub fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;
    let mut previous = '\0';

    for (index, character) in line.char_indices() {
        let separator = !in_quotes && (character == ' ' || character == '&');
        if separator {
            if let Some(begin) = start.take() {
                tokens.push(make_token(line, begin, index));
            }
        } else {
            if start.is_none() {
                start = Some(index);
            }
            if character == '"' && previous != '\\' {
                in_quotes = !in_quotes;
            }
        }
        previous = character;
    }
    if let Some(begin) = start {
        tokens.push(make_token(line, begin, line.len()));
    }
    tokens
}

fn make_token(line: &str, begin: usize, end: usize) -> Token<'_> {
    let text = line.get(begin..end).unwrap_or_default();
    if let Some((name, value)) = text.split_once('=')
        && is_identifier(name)
    {
        return Token {
            name: Some(name),
            raw_value: value,
            offset: begin,
            value_offset: begin + name.len() + 1,
        };
    }
    Token {
        name: None,
        raw_value: text,
        offset: begin,
        value_offset: begin,
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|rest| rest.is_ascii_alphanumeric() || rest == '_')
}

/// Removes surrounding quotes and percent-decodes a raw value.
///
/// Returns `None` when the decoded bytes are not UTF-8.
#[must_use]
pub fn decode_value(raw: &str) -> Option<String> {
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map_or(Cow::Borrowed(raw), |inner| Cow::Owned(inner.replace("\\\"", "\"")));
    percent_decode_str(&unquoted)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

/// Arguments bound against a command's declared specs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: HashMap<&'static str, String>,
    supplied: HashSet<&'static str>,
}

impl Params {
    /// Bound value of `name`, or an empty string when undeclared.
    #[must_use]
    pub fn str(&self, name: &str) -> &str {
        self.values.get(name).map_or("", String::as_str)
    }

    /// Returns `true` when the client supplied `name` explicitly.
    #[must_use]
    pub fn supplied(&self, name: &str) -> bool {
        self.supplied.contains(name)
    }

    /// Integer value of `name`; validated integers fall back to `0` only
    /// when the argument is undeclared.
    #[must_use]
    pub fn int(&self, name: &str) -> i64 {
        self.str(name).parse().unwrap_or_default()
    }

    /// Job reference carried by `name`, when non-empty.
    #[must_use]
    pub fn job(&self, name: &str) -> Option<JobRef> {
        let value = self.str(name);
        if value.is_empty() {
            return None;
        }
        value.parse().ok()
    }

    /// Inserts a value, as if supplied by the client.
    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        self.values.insert(name, value.into());
        self.supplied.insert(name);
    }
}

/// Binds `tokens`, taken from `line`, to `specs` in declared order.
///
/// # Errors
///
/// Returns [`CommandError`] with `eProtocolSyntaxError` for unknown or
/// duplicate names, surplus values, type mismatches and missing arguments.
pub fn bind(
    specs: &[ArgumentSpec],
    line: &str,
    tokens: &[Token<'_>],
) -> Result<Params, CommandError> {
    let mut bound: Vec<Option<String>> = vec![None; specs.len()];
    let mut supplied = HashSet::new();

    for token in tokens {
        let named = token
            .name
            .and_then(|name| specs.iter().position(|spec| spec.name == name));
        let next_free = bound.iter().position(Option::is_none);

        if named.is_none()
            && let Some(index) = next_free
            && specs.get(index).is_some_and(|spec| spec.kind == ArgKind::Ellipsis)
        {
            let rest = line.get(token.offset..).unwrap_or_default();
            store(&mut bound, &mut supplied, specs, index, rest.to_owned());
            break;
        }

        let index = match (token.name, named) {
            (_, Some(index)) => index,
            (Some(name), None) => {
                return Err(CommandError::syntax_at(
                    line,
                    token.column(line),
                    format!("unknown field '{name}'"),
                ));
            }
            (None, None) => next_free.ok_or_else(|| {
                CommandError::syntax_at(
                    line,
                    token.column(line),
                    format!("unexpected value '{}'", token.raw_value),
                )
            })?,
        };

        let Some(spec) = specs.get(index) else {
            return Err(CommandError::internal("argument index out of range"));
        };
        if bound.get(index).is_some_and(Option::is_some) {
            return Err(CommandError::syntax_at(
                line,
                token.column(line),
                format!("duplicate field '{}'", spec.name),
            ));
        }
        let value = if spec.kind == ArgKind::Ellipsis {
            line.get(token.value_offset..).unwrap_or_default().to_owned()
        } else {
            convert(spec, token, line)?
        };
        store(&mut bound, &mut supplied, specs, index, value);
        if spec.kind == ArgKind::Ellipsis {
            break;
        }
    }

    apply_presence(specs, line, bound, supplied)
}

fn store(
    bound: &mut [Option<String>],
    supplied: &mut HashSet<&'static str>,
    specs: &[ArgumentSpec],
    index: usize,
    value: String,
) {
    if let (Some(slot), Some(spec)) = (bound.get_mut(index), specs.get(index)) {
        *slot = Some(value);
        supplied.insert(spec.name);
    }
}

fn convert(spec: &ArgumentSpec, token: &Token<'_>, line: &str) -> Result<String, CommandError> {
    let column = column_of(line, token.value_offset);
    let value = decode_value(token.raw_value).ok_or_else(|| {
        CommandError::syntax_at(
            line,
            column,
            format!("field '{}' is not valid UTF-8 once decoded", spec.name),
        )
    })?;
    match spec.kind {
        ArgKind::Int if value.parse::<i64>().is_err() => Err(CommandError::syntax_at(
            line,
            column,
            format!("field '{}' expects an integer, got '{value}'", spec.name),
        )),
        ArgKind::Id if value.parse::<JobRef>().is_err() => Err(CommandError::syntax_at(
            line,
            column,
            format!("field '{}' expects a job key, got '{value}'", spec.name),
        )),
        _ => Ok(value),
    }
}

fn apply_presence(
    specs: &[ArgumentSpec],
    line: &str,
    bound: Vec<Option<String>>,
    supplied: HashSet<&'static str>,
) -> Result<Params, CommandError> {
    let end_column = column_of(line, line.len());
    let mut values = HashMap::with_capacity(specs.len());
    let mut chain_started = false;

    for (spec, value) in specs.iter().zip(bound) {
        let resolved = match (value, spec.presence) {
            (Some(value), presence) => {
                if presence == Presence::Optchain {
                    chain_started = true;
                }
                value
            }
            (None, _) if spec.kind == ArgKind::Ellipsis => String::new(),
            (None, Presence::Required) => {
                return Err(CommandError::syntax_at(
                    line,
                    end_column,
                    format!("missing required field '{}'", spec.name),
                ));
            }
            (None, Presence::Optional(default)) => default.to_owned(),
            (None, Presence::Optchain) if chain_started => {
                return Err(CommandError::syntax_at(
                    line,
                    end_column,
                    format!(
                        "missing field '{}' required by the preceding argument",
                        spec.name
                    ),
                ));
            }
            (None, Presence::Optchain) => String::new(),
        };
        values.insert(spec.name, resolved);
    }

    Ok(Params { values, supplied })
}
