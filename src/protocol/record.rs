//! Decoding of complete protocol lines into sensor records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Deref;
use thiserror::Error;

/// One decoded sensor reading: a JSON object with its field order preserved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Compact single-line JSON rendering
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl Deref for Record {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A line that could not be turned into a [`Record`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    EmptyLine,
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Syntax {
        text: String,
        message: String,
        line: usize,
        column: usize,
    },
    #[error("expected a JSON object, got {kind}")]
    NotAnObject { text: String, kind: &'static str },
}

impl DecodeError {
    /// The offending line, if any
    pub fn text(&self) -> &str {
        match self {
            DecodeError::EmptyLine => "",
            DecodeError::Syntax { text, .. } | DecodeError::NotAnObject { text, .. } => text,
        }
    }
}

/// Stateless line decoder
pub struct RecordDecoder;

impl RecordDecoder {
    /// Parse one complete line (without its terminator) into a record.
    ///
    /// A trailing carriage return is tolerated so CRLF peers work unchanged.
    pub fn decode(line: &str) -> Result<Record, DecodeError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return Err(DecodeError::EmptyLine);
        }

        let value: Value = serde_json::from_str(line).map_err(|e| DecodeError::Syntax {
            text: line.to_string(),
            message: e.to_string(),
            line: e.line(),
            column: e.column(),
        })?;

        match value {
            Value::Object(fields) => Ok(Record(fields)),
            other => Err(DecodeError::NotAnObject {
                text: line.to_string(),
                kind: json_kind(&other),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let record = RecordDecoder::decode(r#"{"a":1}"#).unwrap();
        assert_eq!(record.get("a"), Some(&json!(1)));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_decode_preserves_field_order() {
        let record =
            RecordDecoder::decode(r#"{"user":"example_user","cook_time":360,"thickness":1.5}"#)
                .unwrap();
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["user", "cook_time", "thickness"]);
    }

    #[test]
    fn test_decode_nested_values() {
        let record =
            RecordDecoder::decode(r#"{"probe":{"id":3,"ok":true},"samples":[1.5,null,"x"]}"#)
                .unwrap();
        assert_eq!(record["probe"]["id"], json!(3));
        assert_eq!(record["samples"], json!([1.5, null, "x"]));
    }

    #[test]
    fn test_decode_tolerates_carriage_return() {
        let record = RecordDecoder::decode("{\"b\":2}\r").unwrap();
        assert_eq!(record.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_syntax_error_carries_text_and_position() {
        let err = RecordDecoder::decode(r#"{"a":}"#).unwrap_err();
        match &err {
            DecodeError::Syntax {
                text, line, column, ..
            } => {
                assert_eq!(text, r#"{"a":}"#);
                assert_eq!(*line, 1);
                assert!(*column > 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.text(), r#"{"a":}"#);
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_truncated_object_is_rejected() {
        assert!(matches!(
            RecordDecoder::decode(r#"{"b""#),
            Err(DecodeError::Syntax { .. })
        ));
    }

    #[test]
    fn test_non_object_values_are_rejected() {
        for (line, kind) in [("[1,2]", "array"), ("3", "number"), ("null", "null"), ("\"x\"", "string")] {
            match RecordDecoder::decode(line) {
                Err(DecodeError::NotAnObject { kind: k, text }) => {
                    assert_eq!(k, kind);
                    assert_eq!(text, line);
                }
                other => panic!("{line}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_blank_lines() {
        assert_eq!(RecordDecoder::decode(""), Err(DecodeError::EmptyLine));
        assert_eq!(RecordDecoder::decode("   \r"), Err(DecodeError::EmptyLine));
    }

    #[test]
    fn test_bad_line_does_not_affect_next_line() {
        assert!(RecordDecoder::decode("not json").is_err());
        let record = RecordDecoder::decode(r#"{"ok":true}"#).unwrap();
        assert_eq!(record.get("ok"), Some(&json!(true)));
    }

    #[test]
    fn test_record_serializes_transparently() {
        let record = RecordDecoder::decode(r#"{"a":1,"b":"two"}"#).unwrap();
        assert_eq!(record.to_json_string(), r#"{"a":1,"b":"two"}"#);
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"a": 1, "b": "two"}));
    }
}
