//! Output shaping: field projection and text truncation.
//!
//! Shaping trades completeness for payload size without touching the
//! underlying query. It only removes keys or shortens designated string
//! values, and applying it twice gives the same output as applying it once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::error::DaemonError;
use crate::protocol::Params;

/// Appended to truncated text.
pub const TRUNCATION_MARKER: &str = "...";

/// Keys whose string values count as "long text".
pub const DEFAULT_TRUNCATE_KEYS: &[&str] = &[
    "text",
    "match_snippet",
    "last_message",
    "message_preview",
    "conversation_text",
];

/// Truncation length implied by `compact`.
pub const COMPACT_MAX_TEXT_CHARS: usize = 200;

/// Truncation length implied by `minimal`.
pub const MINIMAL_MAX_TEXT_CHARS: usize = 120;

/// Field set implied by `minimal`.
pub const MINIMAL_FIELDS: &[&str] = &["date", "phone", "is_from_me", "text"];

/// Extra field kept by `minimal` for search-shaped results.
pub const SNIPPET_FIELD: &str = "match_snippet";

/// Reserved request params that carry output control.
pub const CONTROL_PARAMS: &[&str] = &["fields", "max_text_chars", "compact", "minimal"];

/// Per-request output options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputControl {
    /// Explicit field allowlist
    pub fields: Option<Vec<String>>,
    /// Explicit truncation length
    pub max_text_chars: Option<usize>,
    /// Moderate preset
    pub compact: bool,
    /// Strict preset
    pub minimal: bool,
}

/// How a method's result is shaped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeProfile {
    shaped: bool,
    result_keys: Vec<String>,
    default_fields: Vec<String>,
    search: bool,
}

/// Effective shaping for one result, after presets are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shaper {
    fields: Option<Vec<String>>,
    max_text_chars: Option<usize>,
    truncate_keys: Vec<String>,
}

impl OutputControl {
    /// Parse the reserved control params.
    ///
    /// `null` means absent. `fields` accepts a list of strings or a
    /// comma-separated string.
    pub fn from_params(params: &Params) -> Result<Self, DaemonError> {
        let fields = match params.get("fields") {
            None | Some(Value::Null) => None,
            Some(value) => parse_fields(value)?,
        };

        let max_text_chars = match params.get("max_text_chars") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        DaemonError::validation(
                            "max_text_chars",
                            "max_text_chars must be a non-negative integer",
                        )
                    })?,
            ),
        };

        Ok(Self {
            fields,
            max_text_chars,
            compact: flag(params, "compact")?,
            minimal: flag(params, "minimal")?,
        })
    }

    /// Write the non-default options into request params.
    pub fn write_params(&self, params: &mut Params) {
        if let Some(fields) = &self.fields {
            params.insert("fields".into(), Value::from(fields.clone()));
        }
        if let Some(max) = self.max_text_chars {
            params.insert("max_text_chars".into(), Value::from(max));
        }
        if self.compact {
            params.insert("compact".into(), Value::Bool(true));
        }
        if self.minimal {
            params.insert("minimal".into(), Value::Bool(true));
        }
    }

    /// True when no option is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Resolve presets against a method's profile.
    ///
    /// Explicit `fields` and `max_text_chars` always win over preset
    /// defaults.
    pub fn shaper(&self, profile: &ShapeProfile) -> Shaper {
        let max_text_chars = self.max_text_chars.or(if self.minimal {
            Some(MINIMAL_MAX_TEXT_CHARS)
        } else if self.compact {
            Some(COMPACT_MAX_TEXT_CHARS)
        } else {
            None
        });

        let fields = match &self.fields {
            Some(fields) => Some(fields.clone()),
            None if self.minimal => {
                let mut fields: Vec<String> = MINIMAL_FIELDS.iter().map(|s| s.to_string()).collect();
                if profile.search {
                    fields.push(SNIPPET_FIELD.to_string());
                }
                Some(fields)
            }
            None if self.compact && !profile.default_fields.is_empty() => {
                Some(profile.default_fields.clone())
            }
            None => None,
        };

        Shaper {
            fields,
            max_text_chars,
            truncate_keys: DEFAULT_TRUNCATE_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ShapeProfile {
    /// Results pass through untouched (health, counts).
    pub fn unshaped() -> Self {
        Self::default()
    }

    /// Shape the whole result (an object or a list of objects).
    pub fn whole() -> Self {
        Self {
            shaped: true,
            ..Self::default()
        }
    }

    /// Shape the values under `keys` of an object result.
    pub fn keys(keys: &[&str]) -> Self {
        Self {
            shaped: true,
            result_keys: keys.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Field set used by `compact` when the caller gave none.
    pub fn default_fields(mut self, fields: &[&str]) -> Self {
        self.default_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Mark results as search hits (`minimal` keeps the match snippet).
    pub fn search(mut self) -> Self {
        self.search = true;
        self
    }

    pub fn is_shaped(&self) -> bool {
        self.shaped
    }

    pub fn is_search(&self) -> bool {
        self.search
    }

    /// Apply `control` to a method result according to this profile.
    pub fn apply(&self, result: Value, control: &OutputControl) -> Value {
        if !self.shaped || control.is_empty() {
            return result;
        }
        let shaper = control.shaper(self);

        if self.result_keys.is_empty() {
            return shaper.apply(result);
        }

        match result {
            Value::Object(mut map) => {
                for key in &self.result_keys {
                    if let Some(value) = map.remove(key) {
                        map.insert(key.clone(), shaper.apply(value));
                    }
                }
                Value::Object(map)
            }
            other => other,
        }
    }
}

impl Shaper {
    /// Explicit shaper, bypassing presets.
    pub fn new(fields: Option<Vec<String>>, max_text_chars: Option<usize>) -> Self {
        Self {
            fields,
            max_text_chars,
            truncate_keys: DEFAULT_TRUNCATE_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn max_text_chars(&self) -> Option<usize> {
        self.max_text_chars
    }

    /// Shape one object, or every object inside a list. Anything else is
    /// returned unchanged.
    pub fn apply(&self, value: Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(record) => Value::Object(self.shape_record(record)),
                        other => other,
                    })
                    .collect(),
            ),
            Value::Object(record) => Value::Object(self.shape_record(record)),
            other => other,
        }
    }

    fn shape_record(&self, record: Map<String, Value>) -> Map<String, Value> {
        let mut out = match &self.fields {
            Some(fields) => {
                let mut record = record;
                let mut projected = Map::new();
                for field in fields {
                    if let Some(value) = record.remove(field) {
                        projected.insert(field.clone(), value);
                    }
                }
                projected
            }
            None => record,
        };

        if let Some(max) = self.max_text_chars {
            for key in &self.truncate_keys {
                if let Some(Value::String(text)) = out.get_mut(key) {
                    if let Cow::Owned(short) = truncate_text(text, max) {
                        *text = short;
                    }
                }
            }
        }
        out
    }
}

/// Truncate to `max_chars` characters plus [`TRUNCATION_MARKER`].
///
/// Counts Unicode scalar values. Text already produced by this function
/// is returned unchanged.
pub fn truncate_text(value: &str, max_chars: usize) -> Cow<'_, str> {
    let count = value.chars().count();
    if count <= max_chars {
        return Cow::Borrowed(value);
    }
    if max_chars == 0 {
        return Cow::Owned(String::new());
    }
    if value.ends_with(TRUNCATION_MARKER) && count <= max_chars + TRUNCATION_MARKER.len() {
        return Cow::Borrowed(value);
    }

    let cut = value
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(value.len());
    Cow::Owned(format!("{}{}", value[..cut].trim_end(), TRUNCATION_MARKER))
}

/// Parse a field allowlist from a list of strings or a comma-separated
/// string. Blank entries are dropped; an empty result means "all fields".
pub fn parse_fields(value: &Value) -> Result<Option<Vec<String>>, DaemonError> {
    let items: Vec<String> = match value {
        Value::String(s) => s.split(',').map(|part| part.trim().to_string()).collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    DaemonError::validation("fields", "fields must contain only strings")
                })
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(DaemonError::validation(
                "fields",
                "fields must be a list or a comma-separated string",
            ))
        }
    };
    let items: Vec<String> = items.into_iter().filter(|s| !s.is_empty()).collect();
    Ok((!items.is_empty()).then_some(items))
}

fn flag(params: &Params, key: &str) -> Result<bool, DaemonError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(DaemonError::validation(key, format!("{key} must be a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn messages() -> Value {
        json!([
            {"date": "2026-01-02", "phone": "+15550001", "is_from_me": false,
             "text": "see you at the station at noon", "group_id": null, "rowid": 7},
            {"date": "2026-01-03", "phone": "+15550002", "is_from_me": true,
             "text": "ok", "match_snippet": "the station", "rowid": 8},
        ])
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_fields_projection_is_subset() {
        let shaped = Shaper::new(Some(vec!["date".into(), "text".into()]), None).apply(messages());
        for record in shaped.as_array().unwrap() {
            for key in record.as_object().unwrap().keys() {
                assert!(key == "date" || key == "text", "unexpected key {key}");
            }
        }
    }

    #[test]
    fn test_truncation_bound_and_noop() {
        let long = "a".repeat(50);
        let cut = truncate_text(&long, 10);
        assert_eq!(cut, format!("{}...", "a".repeat(10)));
        assert!(cut.chars().count() <= 10 + TRUNCATION_MARKER.len());

        assert!(matches!(truncate_text("short", 10), Cow::Borrowed("short")));
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let text = "héllo wörld ñandú";
        let cut = truncate_text(text, 5);
        assert_eq!(cut, "héllo...");
    }

    #[test]
    fn test_truncation_trims_trailing_space() {
        assert_eq!(truncate_text("hello world", 6), "hello...");
    }

    #[test]
    fn test_zero_max_chars_empties() {
        assert_eq!(truncate_text("anything", 0), "");
    }

    #[test]
    fn test_shaping_is_idempotent() {
        let control = OutputControl {
            minimal: true,
            max_text_chars: Some(8),
            ..Default::default()
        };
        let profile = ShapeProfile::whole().search();
        let once = profile.apply(messages(), &control);
        let twice = profile.apply(once.clone(), &control);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_truncation_skips_non_designated_and_non_strings() {
        let record = json!({"text": 12345, "title": "x".repeat(40)});
        let shaped = Shaper::new(None, Some(3)).apply(record.clone());
        assert_eq!(shaped, record);
    }

    #[test]
    fn test_minimal_defaults() {
        let control = OutputControl {
            minimal: true,
            ..Default::default()
        };
        let plain = control.shaper(&ShapeProfile::whole());
        assert_eq!(plain.fields().unwrap(), MINIMAL_FIELDS);
        assert_eq!(plain.max_text_chars(), Some(MINIMAL_MAX_TEXT_CHARS));

        let search = control.shaper(&ShapeProfile::whole().search());
        assert!(search.fields().unwrap().iter().any(|f| f == SNIPPET_FIELD));
    }

    #[test]
    fn test_explicit_options_override_presets() {
        let control = OutputControl {
            fields: Some(vec!["text".into()]),
            max_text_chars: Some(500),
            compact: true,
            minimal: true,
        };
        let shaper = control.shaper(&ShapeProfile::whole().default_fields(&["date"]));
        assert_eq!(shaper.fields().unwrap(), ["text".to_string()]);
        assert_eq!(shaper.max_text_chars(), Some(500));
    }

    #[test]
    fn test_compact_uses_profile_defaults() {
        let control = OutputControl {
            compact: true,
            ..Default::default()
        };
        let profile = ShapeProfile::keys(&["messages"]).default_fields(&["date", "text"]);
        let shaped = profile.apply(json!({"messages": messages(), "count": 2}), &control);
        assert_eq!(shaped["count"], 2);
        let first = shaped["messages"][0].as_object().unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.contains_key("date") && first.contains_key("text"));
    }

    #[test]
    fn test_unshaped_profile_passes_through() {
        let control = OutputControl {
            minimal: true,
            ..Default::default()
        };
        let health = json!({"pid": 1, "text": "x".repeat(500)});
        assert_eq!(ShapeProfile::unshaped().apply(health.clone(), &control), health);
    }

    #[test]
    fn test_scalar_results_pass_through() {
        let shaper = Shaper::new(Some(vec!["a".into()]), Some(1));
        assert_eq!(shaper.apply(json!(42)), json!(42));
        assert_eq!(shaper.apply(json!(["plain", 1])), json!(["plain", 1]));
    }

    #[test]
    fn test_from_params_parses_both_field_forms() {
        let control = OutputControl::from_params(&params(json!({"fields": "date, text,"}))).unwrap();
        assert_eq!(control.fields, Some(vec!["date".to_string(), "text".to_string()]));

        let control =
            OutputControl::from_params(&params(json!({"fields": ["date"], "minimal": true})))
                .unwrap();
        assert_eq!(control.fields, Some(vec!["date".to_string()]));
        assert!(control.minimal);
    }

    #[test]
    fn test_from_params_treats_null_as_absent() {
        let control = OutputControl::from_params(&params(json!({
            "fields": null, "max_text_chars": null, "compact": null
        })))
        .unwrap();
        assert!(control.is_empty());
    }

    #[test]
    fn test_from_params_rejects_bad_types() {
        let err = OutputControl::from_params(&params(json!({"max_text_chars": "lots"}))).unwrap_err();
        assert!(err.to_string().contains("max_text_chars"));

        let err = OutputControl::from_params(&params(json!({"compact": "yes"}))).unwrap_err();
        assert!(err.to_string().contains("compact"));
    }

    #[test]
    fn test_write_params_round_trips() {
        let control = OutputControl {
            fields: Some(vec!["date".into()]),
            max_text_chars: Some(40),
            compact: false,
            minimal: true,
        };
        let mut params = Params::new();
        control.write_params(&mut params);
        assert!(!params.contains_key("compact"));
        assert_eq!(OutputControl::from_params(&params).unwrap(), control);
    }
}
