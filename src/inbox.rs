//! The standard inbox core.
//!
//! Every daemon of the family answers the same version-stable method set:
//! `health`, `unread_count`, `unread_messages`, `recent`, `text_search`,
//! `messages_by_phone` and `bundle`. The data comes from an [`InboxService`];
//! this module only declares the contracts, output profiles and the bundle
//! manifest on top of it.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::bundle::{BundleManifest, Section};
use crate::error::DaemonError;
use crate::protocol::Params;
use crate::registry::MethodTable;
use crate::service::{MethodInfo, ParamType, Service};
use crate::shaping::ShapeProfile;

pub const DEFAULT_UNREAD_LIMIT: u64 = 20;
pub const DEFAULT_RECENT_LIMIT: u64 = 10;
pub const DEFAULT_SEARCH_LIMIT: u64 = 20;
pub const DEFAULT_MESSAGES_LIMIT: u64 = 20;

const UNREAD_FIELDS: &[&str] = &["date", "phone", "text", "days_old", "group_id", "group_name"];
const RECENT_FIELDS: &[&str] = &["date", "is_from_me", "phone", "text", "group_id"];
const SEARCH_FIELDS: &[&str] = &["date", "is_from_me", "phone", "text", "match_snippet", "group_id"];
const BY_PHONE_FIELDS: &[&str] = &["date", "is_from_me", "text", "group_id"];

/// A contact resolved from a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
}

/// Data source behind the inbox core.
///
/// Messages are plain JSON objects; the usual keys are `date`, `phone`,
/// `text`, `is_from_me`, `group_id`, and `match_snippet` for search hits.
pub trait InboxService: Service {
    fn unread_count(&self) -> Result<u64>;

    fn unread_messages(&self, limit: u64) -> Result<Vec<Value>>;

    /// Most recent messages across all conversations.
    fn recent(&self, limit: u64) -> Result<Vec<Value>>;

    fn text_search(&self, query: &str, limit: u64, since: Option<NaiveDateTime>) -> Result<Vec<Value>>;

    fn messages_by_phone(&self, phone: &str, limit: u64) -> Result<Vec<Value>>;

    /// Look up a contact by name. Services without an address book keep
    /// the default.
    fn resolve_contact(&self, _name: &str) -> Result<Option<Contact>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    limit: Option<u64>,
    since: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneParams {
    phone: String,
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BundleParams {
    include: Option<Value>,
    unread_limit: Option<u64>,
    recent_limit: Option<u64>,
    search_limit: Option<u64>,
    messages_limit: Option<u64>,
    query: Option<String>,
    phone: Option<String>,
    contact: Option<String>,
}

/// Parse a `since` bound: RFC 3339, a naive ISO date-time, or a bare date
/// (midnight).
pub fn parse_since(raw: &str) -> Result<NaiveDateTime, DaemonError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }
    if let Some(dt) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(dt);
    }
    Err(DaemonError::validation(
        "since",
        format!("since must be an ISO 8601 date or date-time, got '{raw}'"),
    ))
}

/// Method table with the whole inbox core registered.
pub fn inbox_table<S: InboxService>() -> MethodTable<S> {
    let manifest = inbox_manifest();
    let limit = |default: u64| Some(json!(default));

    MethodTable::<S>::new()
        .with(
            MethodInfo::new("unread_count", "Number of unread messages"),
            ShapeProfile::unshaped(),
            |ctx, _: Params| Ok(json!({ "count": ctx.service().unread_count()? })),
        )
        .with(
            MethodInfo::new("unread_messages", "Unread messages, newest first")
                .optional("limit", ParamType::Integer, limit(DEFAULT_UNREAD_LIMIT)),
            ShapeProfile::keys(&["messages"]).default_fields(UNREAD_FIELDS),
            |ctx, p: LimitParams| {
                let messages = ctx
                    .service()
                    .unread_messages(p.limit.unwrap_or(DEFAULT_UNREAD_LIMIT))?;
                Ok(json!({ "messages": messages }))
            },
        )
        .with(
            MethodInfo::new("recent", "Recent messages across conversations")
                .optional("limit", ParamType::Integer, limit(DEFAULT_RECENT_LIMIT)),
            ShapeProfile::keys(&["messages"]).default_fields(RECENT_FIELDS),
            |ctx, p: LimitParams| {
                let messages = ctx.service().recent(p.limit.unwrap_or(DEFAULT_RECENT_LIMIT))?;
                Ok(json!({ "messages": messages }))
            },
        )
        .with(
            MethodInfo::new("text_search", "Keyword search over message text")
                .required("query", ParamType::String)
                .optional("limit", ParamType::Integer, limit(DEFAULT_SEARCH_LIMIT))
                .optional("since", ParamType::String, None),
            ShapeProfile::keys(&["results"])
                .default_fields(SEARCH_FIELDS)
                .search(),
            |ctx, p: SearchParams| {
                let since = p.since.as_deref().map(parse_since).transpose()?;
                let results = ctx.service().text_search(
                    &p.query,
                    p.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                    since,
                )?;
                Ok(json!({ "results": results }))
            },
        )
        .with(
            MethodInfo::new("messages_by_phone", "Conversation with one phone number")
                .required("phone", ParamType::String)
                .optional("limit", ParamType::Integer, limit(DEFAULT_MESSAGES_LIMIT)),
            ShapeProfile::keys(&["messages"]).default_fields(BY_PHONE_FIELDS),
            |ctx, p: PhoneParams| {
                let messages = ctx
                    .service()
                    .messages_by_phone(&p.phone, p.limit.unwrap_or(DEFAULT_MESSAGES_LIMIT))?;
                Ok(json!({ "messages": messages }))
            },
        )
        .with(
            MethodInfo::new("bundle", "Several inbox views in one round trip")
                .optional("include", ParamType::StringList, None)
                .optional("unread_limit", ParamType::Integer, limit(DEFAULT_UNREAD_LIMIT))
                .optional("recent_limit", ParamType::Integer, limit(DEFAULT_RECENT_LIMIT))
                .optional("search_limit", ParamType::Integer, limit(DEFAULT_SEARCH_LIMIT))
                .optional("messages_limit", ParamType::Integer, limit(DEFAULT_MESSAGES_LIMIT))
                .optional("query", ParamType::String, None)
                .optional("phone", ParamType::String, None)
                .optional("contact", ParamType::String, None),
            ShapeProfile::unshaped(),
            move |ctx, p: BundleParams| {
                let include = manifest.parse_include(p.include.as_ref())?;

                let query = non_blank(p.query);
                let contact = non_blank(p.contact);
                let mut phone = non_blank(p.phone);
                let mut resolved = None;
                if phone.is_none() {
                    if let Some(name) = &contact {
                        if let Some(found) = ctx.service().resolve_contact(name)? {
                            phone = Some(found.phone.clone());
                            resolved = Some(found);
                        }
                    }
                }

                let limits = json!({
                    "unread_limit": p.unread_limit.unwrap_or(DEFAULT_UNREAD_LIMIT),
                    "recent_limit": p.recent_limit.unwrap_or(DEFAULT_RECENT_LIMIT),
                    "search_limit": p.search_limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
                    "messages_limit": p.messages_limit.unwrap_or(DEFAULT_MESSAGES_LIMIT),
                });

                let mut inputs = match &limits {
                    Value::Object(map) => map.clone(),
                    _ => Params::new(),
                };
                if let Some(query) = &query {
                    inputs.insert("query".into(), json!(query));
                }
                if let Some(phone) = &phone {
                    inputs.insert("phone".into(), json!(phone));
                }

                let mut meta = Map::new();
                meta.insert("generated_at".into(), json!(chrono::Utc::now().to_rfc3339()));
                meta.insert("query".into(), json!(query));
                meta.insert("phone".into(), json!(phone));
                meta.insert("limits".into(), limits);
                if let Some(name) = contact {
                    meta.insert("contact".into(), json!(name));
                    meta.insert("resolved".into(), json!(resolved));
                }

                Ok(manifest.execute(ctx, &inputs, include.as_ref(), meta)?)
            },
        )
}

/// Sections of the inbox `bundle`, in result order.
pub fn inbox_manifest() -> BundleManifest {
    BundleManifest::new()
        .section(
            Section::new("unread_count", "unread_count")
                .at(&["unread", "count"])
                .pick("count"),
        )
        .section(
            Section::new("unread_messages", "unread_messages")
                .at(&["unread", "messages"])
                .pick("messages")
                .params(|p| Some(limit_param(p, "unread_limit"))),
        )
        .section(
            Section::new("recent", "recent")
                .pick("messages")
                .params(|p| Some(limit_param(p, "recent_limit"))),
        )
        .section(
            Section::new("search", "text_search")
                .at(&["search", "results"])
                .pick("results")
                .requires("query")
                .params(|p| {
                    let query = p.get("query")?.clone();
                    let mut params = limit_param(p, "search_limit");
                    params.insert("query".into(), query);
                    Some(params)
                }),
        )
        .section(
            Section::new("contact_messages", "messages_by_phone")
                .at(&["contact_messages", "messages"])
                .pick("messages")
                .requires("phone or a resolvable contact")
                .params(|p| {
                    let phone = p.get("phone")?.clone();
                    let params = limit_param(p, "messages_limit");
                    if params.get("limit").and_then(Value::as_u64) == Some(0) {
                        return None;
                    }
                    let mut params = params;
                    params.insert("phone".into(), phone);
                    Some(params)
                }),
        )
}

fn limit_param(inputs: &Params, key: &str) -> Params {
    let mut params = Params::new();
    if let Some(limit) = inputs.get(key) {
        params.insert("limit".into(), limit.clone());
    }
    params
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
