use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const SCREENWRITER_INSTRUCTION: &str = "You are a screenwriter. Given the details of a movie and the content of the preceding scene, write the next scene for the script.";

/// One JSON-lines training example. Unknown fields are kept in `extra`
/// and written back in their original order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub instruction: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub input: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub output: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Null => String::new(),
        other => value_text(&other),
    })
}

// Outer `None` is an absent key, `Some(None)` an explicit null.
fn lenient_opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Option<String>>, D::Error> {
    Ok(Some(match Value::deserialize(de)? {
        Value::Null => None,
        other => Some(value_text(&other)),
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Object(Map<String, Value>),
    NotObject,
    Invalid,
}

impl Payload {
    pub fn parse(input: &str) -> Self {
        match serde_json::from_str::<Value>(input) {
            Ok(Value::Object(map)) => Payload::Object(map),
            Ok(_) => Payload::NotObject,
            Err(_) => Payload::Invalid,
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl Example {
    pub fn new(instruction: impl Into<String>, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            instruction: Some(Some(instruction.into())),
            input: input.into(),
            output: output.into(),
            extra: Map::new(),
        }
    }

    pub fn payload(&self) -> Payload {
        Payload::parse(&self.input)
    }

    pub fn combined_text(&self) -> String {
        format!("{}\n{}", self.input, self.output)
    }

    pub fn movie_hint(&self) -> Option<String> {
        let payload = self.payload();
        let details = payload.as_object().and_then(movie_details)?;
        first_truthy(details, &["title", "movie", "genre"])
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn movie_details(payload: &Map<String, Value>) -> Option<&Map<String, Value>> {
    payload.get("movie_details").and_then(Value::as_object)
}

/// Python-style truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn first_truthy(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| truthy(v))
        .map(value_text)
}

pub fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

pub fn preview(s: &str, n: usize) -> String {
    prefix_chars(s, n).replace('\n', "\\n")
}

pub fn signature(input: &str, output: &str, prefix: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix_chars(input, prefix).as_bytes());
    hasher.update(b"||");
    hasher.update(prefix_chars(output, prefix).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_null_and_missing_fields_as_empty() {
        let ex: Example = serde_json::from_str(r#"{"input": null, "source_file": "a.txt"}"#).unwrap();
        assert_eq!(ex.instruction, None);
        assert_eq!(ex.input, "");
        assert_eq!(ex.output, "");
        assert_eq!(ex.extra.get("source_file"), Some(&json!("a.txt")));
    }

    #[test]
    fn keeps_extra_fields_on_write() {
        let line = r#"{"instruction":"i","input":"x","output":"y","source_file":"f.txt","n":3}"#;
        let ex: Example = serde_json::from_str(line).unwrap();
        assert_eq!(ex.to_line().unwrap(), line);
    }

    #[test]
    fn explicit_null_instruction_survives_rewrite() {
        let line = r#"{"instruction":null,"input":"x","output":"y"}"#;
        let ex: Example = serde_json::from_str(line).unwrap();
        assert_eq!(ex.instruction, Some(None));
        assert_eq!(ex.to_line().unwrap(), line);

        let missing: Example = serde_json::from_str(r#"{"input":"x","output":"y"}"#).unwrap();
        assert_eq!(missing.to_line().unwrap(), r#"{"input":"x","output":"y"}"#);
    }

    #[test]
    fn payload_kinds() {
        assert!(matches!(Payload::parse(r#"{"a":1}"#), Payload::Object(_)));
        assert_eq!(Payload::parse("[1,2]"), Payload::NotObject);
        assert_eq!(Payload::parse("INT. HOUSE"), Payload::Invalid);
        assert_eq!(Payload::parse(""), Payload::Invalid);
    }

    #[test]
    fn movie_hint_prefers_title_then_genre() {
        let mut ex = Example::new("i", r#"{"movie_details":{"genre":"Horror","title":""}}"#, "o");
        assert_eq!(ex.movie_hint().as_deref(), Some("Horror"));
        ex.input = r#"{"movie_details":{"genre":"Horror","title":"Alien"}}"#.to_string();
        assert_eq!(ex.movie_hint().as_deref(), Some("Alien"));
        ex.input = "plain text".to_string();
        assert_eq!(ex.movie_hint(), None);
    }

    #[test]
    fn prefix_counts_characters_not_bytes() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("ab", 10), "ab");
        assert_eq!(preview("a\nb\nc", 3), "a\\nb");
    }

    #[test]
    fn signature_ignores_text_past_prefix() {
        let a = signature("same start AAA", "out", 10);
        let b = signature("same start BBB", "out", 10);
        let c = signature("same start AAA", "other", 10);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn truthiness_matches_python() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1.5)));
    }
}
