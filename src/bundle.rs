//! Bundles: several registered methods answered in one round trip.
//!
//! A [`BundleManifest`] lists named sections. Each section names the method
//! it runs, how to derive that method's params from the bundle's params, and
//! where its result lands in the combined result. Sections go through the
//! same validation and output shaping as standalone calls.
//!
//! A section left out of `include` is never run and leaves no trace in the
//! result. A section whose params cannot be built (its precondition is
//! unmet, e.g. a search without a query) is omitted from the result and
//! listed under `meta.skipped`.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::error::DaemonError;
use crate::protocol::Params;
use crate::registry::CallContext;
use crate::service::Service;

/// Builds a section's method params from the bundle params, or `None` when
/// the section cannot run.
pub type SectionParams = fn(&Params) -> Option<Params>;

/// One named part of a bundle.
#[derive(Clone)]
pub struct Section {
    name: String,
    method: String,
    placement: Vec<String>,
    pick: Option<String>,
    params: SectionParams,
    requires: Option<String>,
}

impl Section {
    /// A section running `method`, placed under its own name, with no params.
    pub fn new(name: impl Into<String>, method: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            placement: vec![name.clone()],
            name,
            method: method.into(),
            pick: None,
            params: |_| Some(Params::new()),
            requires: None,
        }
    }

    /// Where the section's value lands, as a path of object keys.
    pub fn at(mut self, path: &[&str]) -> Self {
        self.placement = path.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Take only this key of the method's result.
    pub fn pick(mut self, key: &str) -> Self {
        self.pick = Some(key.to_string());
        self
    }

    /// How to build the method params.
    pub fn params(mut self, build: SectionParams) -> Self {
        self.params = build;
        self
    }

    /// Human-readable precondition, reported when the section is skipped.
    pub fn requires(mut self, what: &str) -> Self {
        self.requires = Some(what.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("placement", &self.placement)
            .field("pick", &self.pick)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}

/// Ordered set of sections.
#[derive(Debug, Clone, Default)]
pub struct BundleManifest {
    sections: Vec<Section>,
}

impl BundleManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Parse an `include` value: a list of names or a comma-separated string.
    ///
    /// `None`, `null` and an empty list all mean "every section". `meta` is
    /// always accepted; any other unknown name is a validation error.
    pub fn parse_include(&self, value: Option<&Value>) -> Result<Option<BTreeSet<String>>, DaemonError> {
        let names: Vec<String> = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                        DaemonError::validation("include", "include must contain only strings")
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(DaemonError::validation(
                    "include",
                    "include must be a list or a comma-separated string",
                ))
            }
        };

        let names: BTreeSet<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
        if names.is_empty() {
            return Ok(None);
        }

        for name in &names {
            if name != "meta" && !self.sections.iter().any(|s| &s.name == name) {
                let known: Vec<&str> = self.sections.iter().map(|s| s.name.as_str()).collect();
                return Err(DaemonError::validation(
                    "include",
                    format!(
                        "unknown bundle section '{name}' (expected one of: {})",
                        known.join(", ")
                    ),
                ));
            }
        }
        Ok(Some(names))
    }

    /// Run the included sections and assemble `{meta, <sections>...}`.
    ///
    /// The first failing section fails the bundle; its error keeps its own
    /// code and gains `details.section`.
    pub fn execute<S: Service>(
        &self,
        ctx: &CallContext<'_, S>,
        inputs: &Params,
        include: Option<&BTreeSet<String>>,
        mut meta: Map<String, Value>,
    ) -> Result<Value, DaemonError> {
        let mut result = Map::new();
        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        for section in &self.sections {
            if include.is_some_and(|names| !names.contains(&section.name)) {
                continue;
            }

            let Some(params) = (section.params)(inputs) else {
                debug!(section = %section.name, "Bundle section skipped");
                skipped.push(json!({
                    "section": section.name,
                    "reason": section
                        .requires
                        .as_ref()
                        .map(|what| format!("requires {what}"))
                        .unwrap_or_else(|| "precondition not met".to_string()),
                }));
                continue;
            };

            let value = ctx
                .invoke(&section.method, params)
                .map_err(|source| DaemonError::Section {
                    section: section.name.clone(),
                    source: Box::new(source),
                })?;

            let value = match &section.pick {
                Some(key) => match value {
                    Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
                    other => other,
                },
                None => value,
            };

            insert_at(&mut result, &section.placement, value);
            executed.push(section.name.clone());
        }

        meta.insert("sections".into(), json!(executed));
        if !skipped.is_empty() {
            meta.insert("skipped".into(), Value::Array(skipped));
        }
        result.insert("meta".into(), Value::Object(meta));
        Ok(Value::Object(result))
    }
}

/// Insert `value` at a nested key path, creating objects on the way.
fn insert_at(target: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = target;
    for key in parents {
        let entry = node
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        node = map;
    }
    node.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> BundleManifest {
        BundleManifest::new()
            .section(Section::new("unread_count", "unread_count").at(&["unread", "count"]).pick("count"))
            .section(Section::new("recent", "recent").pick("messages"))
            .section(
                Section::new("search", "text_search")
                    .requires("query")
                    .params(|p| p.get("query").cloned().map(|q| {
                        let mut params = Params::new();
                        params.insert("query".into(), q);
                        params
                    })),
            )
    }

    #[test]
    fn test_parse_include_forms() {
        let m = manifest();
        assert_eq!(m.parse_include(None).unwrap(), None);
        assert_eq!(m.parse_include(Some(&json!(""))).unwrap(), None);

        let names = m.parse_include(Some(&json!("recent, search"))).unwrap().unwrap();
        assert!(names.contains("recent") && names.contains("search"));

        let names = m.parse_include(Some(&json!(["unread_count", "meta"]))).unwrap().unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_parse_include_rejects_unknown() {
        let err = manifest().parse_include(Some(&json!(["weather"]))).unwrap_err();
        assert!(err.to_string().contains("weather"));
        assert_eq!(err.details().unwrap()["field"], "include");
    }

    #[test]
    fn test_insert_at_nested() {
        let mut map = Map::new();
        insert_at(&mut map, &["unread".to_string(), "count".to_string()], json!(2));
        insert_at(&mut map, &["unread".to_string(), "messages".to_string()], json!([]));
        assert_eq!(Value::Object(map), json!({"unread": {"count": 2, "messages": []}}));
    }

    #[test]
    fn test_insert_at_replaces_scalar_parent() {
        let mut map = Map::new();
        map.insert("unread".into(), json!(5));
        insert_at(&mut map, &["unread".to_string(), "count".to_string()], json!(2));
        assert_eq!(map["unread"]["count"], 2);
    }
}
