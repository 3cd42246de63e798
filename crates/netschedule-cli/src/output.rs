//! Rendering of reply payloads.

use std::io::Write;

use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use crate::AppError;
use crate::cli::OutputFormat;

/// Successful result of one verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Payload {
    /// Payload of a single `OK:` line.
    Single(String),
    /// Payloads of a listing, terminator excluded.
    Listing(Vec<String>),
}

pub(crate) fn render<W: Write>(
    payload: &Payload,
    format: OutputFormat,
    out: &mut W,
) -> Result<(), AppError> {
    match format {
        OutputFormat::Raw => render_raw(payload, out)?,
        OutputFormat::Json => {
            let value = match payload {
                Payload::Single(line) => decode_payload(line),
                Payload::Listing(lines) => {
                    Value::Array(lines.iter().map(|line| decode_payload(line)).collect())
                }
            };
            serde_json::to_writer_pretty(&mut *out, &value).map_err(AppError::EncodeJson)?;
            writeln!(out).map_err(AppError::WriteOutput)?;
        }
    }
    out.flush().map_err(AppError::WriteOutput)
}

fn render_raw<W: Write>(payload: &Payload, out: &mut W) -> Result<(), AppError> {
    let lines = match payload {
        Payload::Single(line) if line.is_empty() => return Ok(()),
        Payload::Single(line) => std::slice::from_ref(line),
        Payload::Listing(lines) => lines.as_slice(),
    };
    for line in lines {
        writeln!(out, "{line}").map_err(AppError::WriteOutput)?;
    }
    Ok(())
}

/// Turns `a=1&b=x%20y` into `{"a": "1", "b": "x y"}`; anything that is not a
/// field list stays a string.
pub(crate) fn decode_payload(payload: &str) -> Value {
    if payload.is_empty() {
        return Value::String(String::new());
    }
    let mut fields = Map::new();
    for part in payload.split('&') {
        let Some((name, value)) = part.split_once('=') else {
            return Value::String(payload.to_owned());
        };
        let decoded = percent_decode_str(value).decode_utf8_lossy().into_owned();
        fields.insert(name.to_owned(), Value::String(decoded));
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn rendered(payload: &Payload, format: OutputFormat) -> String {
        let mut out = Vec::new();
        render(payload, format, &mut out).expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[rstest]
    #[case::fields("kind=static&description=nightly%20runs", json!({"kind": "static", "description": "nightly runs"}))]
    #[case::plain("batch;nightly", json!("batch;nightly"))]
    #[case::mixed("a=1&loose", json!("a=1&loose"))]
    #[case::empty("", json!(""))]
    fn decodes_field_payloads(#[case] payload: &str, #[case] expected: Value) {
        assert_eq!(decode_payload(payload), expected);
    }

    #[test]
    fn raw_listings_print_one_payload_per_line() {
        let payload = Payload::Listing(vec!["a=1".to_owned(), "b=2".to_owned()]);
        assert_eq!(rendered(&payload, OutputFormat::Raw), "a=1\nb=2\n");
    }

    #[test]
    fn raw_output_skips_empty_acknowledgements() {
        assert_eq!(rendered(&Payload::Single(String::new()), OutputFormat::Raw), "");
    }

    #[test]
    fn json_listings_become_arrays() {
        let payload = Payload::Listing(vec!["status=ok".to_owned()]);
        let value: Value =
            serde_json::from_str(&rendered(&payload, OutputFormat::Json)).expect("json");
        assert_eq!(value, json!([{"status": "ok"}]));
    }
}
