use crate::encoding::decode_embedding;
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::DateTime;
use recall_types::{ObservationType, ParsedObservation, TITLE_MAX_CHARS, util};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Schema adapter: declarative mapping from a foreign record shape to the
// internal observation shape. Field paths use dot notation into nested
// objects; value formats are translated per the configured transforms.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    #[default]
    EpochMs,
    EpochS,
    Iso8601,
}

impl TimestampFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "epoch_ms" => Some(TimestampFormat::EpochMs),
            "epoch_s" => Some(TimestampFormat::EpochS),
            "iso8601" => Some(TimestampFormat::Iso8601),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFormat {
    #[default]
    Array,
    Base64,
    JsonArray,
    /// Raw little-endian f32 bytes; in JSON transport they arrive base64-coded.
    Binary,
}

impl EmbeddingFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "array" => Some(EmbeddingFormat::Array),
            "base64" => Some(EmbeddingFormat::Base64),
            "json_array" => Some(EmbeddingFormat::JsonArray),
            "binary" => Some(EmbeddingFormat::Binary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactsFormat {
    #[default]
    Array,
    Json,
    Csv,
}

impl FactsFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "array" => Some(FactsFormat::Array),
            "json" => Some(FactsFormat::Json),
            "csv" => Some(FactsFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transforms {
    #[serde(default)]
    pub timestamp: TimestampFormat,
    #[serde(default)]
    pub embedding: EmbeddingFormat,
    #[serde(default)]
    pub facts: FactsFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaAdapter {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub transforms: Transforms,
}

/// A foreign record normalized into the internal shape, ready for import.
#[derive(Debug, Clone)]
pub struct ExternalObservation {
    pub external_id: Option<String>,
    pub observation: ParsedObservation,
    pub project: String,
    pub created_at_epoch: i64,
    pub embedding: Option<Vec<f32>>,
}

impl SchemaAdapter {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            url: None,
            fields: FieldMap::default(),
            transforms: Transforms::default(),
        }
    }

    /// Bind one field path by name; used by the CLI's `--field KEY=PATH`.
    pub fn set_field(&mut self, key: &str, path: &str) -> Result<()> {
        let slot = match key {
            "id" => &mut self.fields.id,
            "title" => &mut self.fields.title,
            "subtitle" => &mut self.fields.subtitle,
            "narrative" => &mut self.fields.narrative,
            "facts" => &mut self.fields.facts,
            "type" => &mut self.fields.kind,
            "project" => &mut self.fields.project,
            "timestamp" => &mut self.fields.timestamp,
            "embedding" => &mut self.fields.embedding,
            _ => {
                return Err(Error::Config(format!("unknown adapter field '{}'", key)));
            }
        };
        *slot = Some(path.to_string());
        Ok(())
    }

    /// Normalize one foreign record. Missing paths yield the documented
    /// defaults; a malformed value in a declared path is an error.
    pub fn transform(&self, external: &Value) -> Result<ExternalObservation> {
        let text_at = |path: &Option<String>| -> Option<String> {
            path.as_deref()
                .and_then(|p| lookup(external, p))
                .and_then(value_to_text)
        };

        let title = text_at(&self.fields.title)
            .map(|t| clamp_title(&t))
            .unwrap_or_else(|| "Untitled".to_string());
        let kind = text_at(&self.fields.kind)
            .map(|k| ObservationType::parse_lenient(&k))
            .unwrap_or_default();
        let project = text_at(&self.fields.project).unwrap_or_else(|| "unknown".to_string());

        let created_at_epoch = match self
            .fields
            .timestamp
            .as_deref()
            .and_then(|p| lookup(external, p))
        {
            None => util::now_epoch_ms(),
            Some(value) => decode_timestamp(value, self.transforms.timestamp)?,
        };

        let facts = match self.fields.facts.as_deref().and_then(|p| lookup(external, p)) {
            None => Vec::new(),
            Some(value) => decode_facts(value, self.transforms.facts)?,
        };

        let embedding = match self
            .fields
            .embedding
            .as_deref()
            .and_then(|p| lookup(external, p))
        {
            None => None,
            Some(value) => Some(decode_foreign_embedding(value, self.transforms.embedding)?),
        };

        Ok(ExternalObservation {
            external_id: text_at(&self.fields.id),
            observation: ParsedObservation {
                kind,
                title,
                subtitle: text_at(&self.fields.subtitle),
                narrative: text_at(&self.fields.narrative),
                facts,
                ..Default::default()
            },
            project,
            created_at_epoch,
            embedding,
        })
    }
}

/// Dot-notation lookup into nested objects, e.g. `metadata.timestamps.created`.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn clamp_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(TITLE_MAX_CHARS).collect()
    }
}

fn decode_timestamp(value: &Value, format: TimestampFormat) -> Result<i64> {
    match format {
        TimestampFormat::EpochMs => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| Error::Encoding(format!("not an epoch_ms timestamp: {}", value))),
        TimestampFormat::EpochS => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(|s| s * 1_000)
            .ok_or_else(|| Error::Encoding(format!("not an epoch_s timestamp: {}", value))),
        TimestampFormat::Iso8601 => {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::Encoding(format!("not an iso8601 timestamp: {}", value)))?;
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.timestamp_millis())
                .map_err(|err| Error::Encoding(format!("bad iso8601 timestamp '{}': {}", raw, err)))
        }
    }
}

fn decode_facts(value: &Value, format: FactsFormat) -> Result<Vec<String>> {
    let from_array = |items: &Vec<Value>| {
        items
            .iter()
            .filter_map(value_to_text)
            .filter(|f| !f.trim().is_empty())
            .collect::<Vec<_>>()
    };

    match format {
        FactsFormat::Array => match value {
            Value::Array(items) => Ok(from_array(items)),
            _ => Err(Error::Encoding(format!("facts is not an array: {}", value))),
        },
        FactsFormat::Json => {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::Encoding("json facts must be a string".to_string()))?;
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|err| Error::Encoding(format!("bad json facts: {}", err)))?;
            match parsed {
                Value::Array(items) => Ok(from_array(&items)),
                _ => Err(Error::Encoding("json facts did not decode to an array".to_string())),
            }
        }
        FactsFormat::Csv => {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::Encoding("csv facts must be a string".to_string()))?;
            Ok(raw
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect())
        }
    }
}

fn decode_foreign_embedding(value: &Value, format: EmbeddingFormat) -> Result<Vec<f32>> {
    let from_numbers = |items: &Vec<Value>| -> Result<Vec<f32>> {
        items
            .iter()
            .map(|item| {
                item.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::Encoding(format!("non-numeric embedding entry: {}", item)))
            })
            .collect()
    };

    match format {
        EmbeddingFormat::Array => match value {
            Value::Array(items) => from_numbers(items),
            _ => Err(Error::Encoding("embedding is not an array".to_string())),
        },
        EmbeddingFormat::JsonArray => {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::Encoding("json_array embedding must be a string".to_string()))?;
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|err| Error::Encoding(format!("bad json_array embedding: {}", err)))?;
            match parsed {
                Value::Array(items) => from_numbers(&items),
                _ => Err(Error::Encoding(
                    "json_array embedding did not decode to an array".to_string(),
                )),
            }
        }
        EmbeddingFormat::Base64 | EmbeddingFormat::Binary => {
            let raw = value
                .as_str()
                .ok_or_else(|| Error::Encoding("base64 embedding must be a string".to_string()))?;
            let bytes = BASE64
                .decode(raw)
                .map_err(|err| Error::Encoding(format!("bad base64 embedding: {}", err)))?;
            decode_embedding(&bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_embedding;
    use serde_json::json;

    fn adapter() -> SchemaAdapter {
        let mut adapter = SchemaAdapter::new("legacy", "Legacy memory export");
        adapter.set_field("id", "uid").unwrap();
        adapter.set_field("title", "heading").unwrap();
        adapter.set_field("narrative", "body.prose").unwrap();
        adapter.set_field("facts", "body.points").unwrap();
        adapter.set_field("type", "category").unwrap();
        adapter.set_field("project", "meta.repo").unwrap();
        adapter.set_field("timestamp", "meta.timestamps.created").unwrap();
        adapter
    }

    #[test]
    fn test_round_trip_with_declared_paths() {
        let external = json!({
            "uid": "r-42",
            "heading": "Found the dedup key",
            "category": "decision",
            "body": { "prose": "three columns form the key", "points": ["title", "epoch"] },
            "meta": { "repo": "legacy-repo", "timestamps": { "created": 1700000000123i64 } },
        });

        let result = adapter().transform(&external).unwrap();
        assert_eq!(result.external_id.as_deref(), Some("r-42"));
        assert_eq!(result.observation.title, "Found the dedup key");
        assert_eq!(result.observation.kind, ObservationType::Decision);
        assert_eq!(
            result.observation.narrative.as_deref(),
            Some("three columns form the key")
        );
        assert_eq!(result.observation.facts, vec!["title", "epoch"]);
        assert_eq!(result.project, "legacy-repo");
        assert_eq!(result.created_at_epoch, 1_700_000_000_123);
    }

    #[test]
    fn test_missing_paths_yield_defaults() {
        let result = adapter().transform(&json!({})).unwrap();
        assert_eq!(result.observation.title, "Untitled");
        assert_eq!(result.observation.kind, ObservationType::Discovery);
        assert_eq!(result.project, "unknown");
        assert!(result.created_at_epoch > 0);
        assert!(result.embedding.is_none());
        assert!(result.observation.facts.is_empty());
    }

    #[test]
    fn test_timestamp_formats() {
        let mut seconds = adapter();
        seconds.transforms.timestamp = TimestampFormat::EpochS;
        let result = seconds
            .transform(&json!({"meta": {"timestamps": {"created": 1700000000}}}))
            .unwrap();
        assert_eq!(result.created_at_epoch, 1_700_000_000_000);

        let mut iso = adapter();
        iso.transforms.timestamp = TimestampFormat::Iso8601;
        let result = iso
            .transform(&json!({"meta": {"timestamps": {"created": "1970-01-01T00:00:01Z"}}}))
            .unwrap();
        assert_eq!(result.created_at_epoch, 1_000);

        assert!(
            iso.transform(&json!({"meta": {"timestamps": {"created": "yesterday"}}}))
                .is_err()
        );
    }

    #[test]
    fn test_facts_formats() {
        let mut csv = adapter();
        csv.transforms.facts = FactsFormat::Csv;
        let result = csv
            .transform(&json!({"body": {"points": "one, two , three"}}))
            .unwrap();
        assert_eq!(result.observation.facts, vec!["one", "two", "three"]);

        let mut json_facts = adapter();
        json_facts.transforms.facts = FactsFormat::Json;
        let result = json_facts
            .transform(&json!({"body": {"points": "[\"a\",\"b\"]"}}))
            .unwrap();
        assert_eq!(result.observation.facts, vec!["a", "b"]);
    }

    #[test]
    fn test_base64_embedding_decodes_as_le_f32() {
        let vector = vec![0.25f32, -1.5, 3.75];
        let encoded = BASE64.encode(encode_embedding(&vector));

        let mut b64 = adapter();
        b64.set_field("embedding", "vec").unwrap();
        b64.transforms.embedding = EmbeddingFormat::Base64;

        let result = b64.transform(&json!({"vec": encoded})).unwrap();
        let embedding = result.embedding.unwrap();
        assert_eq!(embedding.len(), 3);
        for (a, b) in vector.iter().zip(&embedding) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_native_and_json_array_embeddings() {
        let mut native = adapter();
        native.set_field("embedding", "vec").unwrap();
        let result = native.transform(&json!({"vec": [0.5, 1.0]})).unwrap();
        assert_eq!(result.embedding.unwrap(), vec![0.5, 1.0]);

        let mut json_array = adapter();
        json_array.set_field("embedding", "vec").unwrap();
        json_array.transforms.embedding = EmbeddingFormat::JsonArray;
        let result = json_array.transform(&json!({"vec": "[0.5, 1.0]"})).unwrap();
        assert_eq!(result.embedding.unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_unknown_field_key_rejected() {
        let mut adapter = SchemaAdapter::new("x", "x");
        assert!(adapter.set_field("color", "a.b").is_err());
    }

    #[test]
    fn test_title_clamped_to_limit() {
        let mut adapter = SchemaAdapter::new("x", "x");
        adapter.set_field("title", "t").unwrap();
        let long = "y".repeat(200);
        let result = adapter.transform(&json!({ "t": long })).unwrap();
        assert_eq!(result.observation.title.chars().count(), TITLE_MAX_CHARS);
    }
}
