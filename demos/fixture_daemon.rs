//! Example: inbox daemon over an in-memory fixture.
//!
//! # Run the daemon
//! ```bash
//! cargo run --example fixture_daemon -- start --foreground
//! ```
//!
//! # Talk to it
//! ```bash
//! cargo run --bin warmctl -- --service fixture unread-count
//! cargo run --bin warmctl -- --service fixture --minimal text-search lunch
//! cargo run --bin warmctl -- --service fixture bundle --include unread_count,recent
//! echo '{"id":"1","v":1,"method":"recent","params":{"limit":2}}' | nc -U ~/.warm/fixture/daemon.sock
//! ```

use anyhow::Result;
use chrono::NaiveDateTime;
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use warm_daemon::cli::DaemonCli;
use warm_daemon::inbox::{inbox_table, Contact, InboxService};
use warm_daemon::{MethodInfo, ParamType, Service, ShapeProfile};

const SERVICE_NAME: &str = "fixture";

#[derive(Debug, Clone)]
struct Message {
    date: NaiveDateTime,
    phone: &'static str,
    text: &'static str,
    is_from_me: bool,
    read: bool,
}

impl Message {
    fn to_json(&self) -> Value {
        json!({
            "date": self.date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "phone": self.phone,
            "text": self.text,
            "is_from_me": self.is_from_me,
            "group_id": Value::Null,
        })
    }
}

/// Messages held in memory, newest last.
struct FixtureInbox {
    messages: Mutex<Vec<Message>>,
}

impl FixtureInbox {
    fn new() -> Result<Self> {
        let rows = [
            ("2024-05-01T08:15:00", "+15550001", "Morning! Lunch at noon?", false, true),
            ("2024-05-01T08:20:00", "+15550001", "Sounds good, see you there", true, true),
            ("2024-05-02T18:45:00", "+15550002", "Can you send the slides from today's review?", false, false),
            ("2024-05-03T09:00:00", "+15550001", "Running ten minutes late for lunch", false, false),
        ];
        let messages = rows
            .into_iter()
            .map(|(date, phone, text, is_from_me, read)| -> Result<Message> {
                Ok(Message {
                    date: NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S")?,
                    phone,
                    text,
                    is_from_me,
                    read,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            messages: Mutex::new(messages),
        })
    }

    fn select(&self, limit: u64, keep: impl Fn(&Message) -> bool) -> Result<Vec<Value>> {
        let messages = self
            .messages
            .lock()
            .map_err(|_| anyhow::anyhow!("fixture lock poisoned"))?;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| keep(m))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(Message::to_json)
            .collect())
    }
}

impl Service for FixtureInbox {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn health(&self) -> Result<Value> {
        Ok(json!({
            "ok": true,
            "service": SERVICE_NAME,
            "pid": std::process::id(),
            "messages": self.select(u64::MAX, |_| true)?.len(),
        }))
    }
}

impl InboxService for FixtureInbox {
    fn unread_count(&self) -> Result<u64> {
        Ok(self.select(u64::MAX, |m| !m.read)?.len() as u64)
    }

    fn unread_messages(&self, limit: u64) -> Result<Vec<Value>> {
        self.select(limit, |m| !m.read)
    }

    fn recent(&self, limit: u64) -> Result<Vec<Value>> {
        self.select(limit, |_| true)
    }

    fn text_search(&self, query: &str, limit: u64, since: Option<NaiveDateTime>) -> Result<Vec<Value>> {
        let needle = query.to_lowercase();
        let hits = self.select(limit, |m| {
            m.text.to_lowercase().contains(&needle) && since.map_or(true, |since| m.date >= since)
        })?;
        Ok(hits
            .into_iter()
            .map(|mut hit| {
                hit["match_snippet"] = hit["text"].clone();
                hit
            })
            .collect())
    }

    fn messages_by_phone(&self, phone: &str, limit: u64) -> Result<Vec<Value>> {
        self.select(limit, |m| m.phone == phone)
    }

    fn resolve_contact(&self, name: &str) -> Result<Option<Contact>> {
        Ok(name.eq_ignore_ascii_case("sam").then(|| Contact {
            name: "Sam".into(),
            phone: "+15550001".into(),
        }))
    }
}

#[derive(Deserialize)]
struct MarkRead {
    phone: String,
}

fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let code = cli.run(SERVICE_NAME, || {
        let table = inbox_table::<FixtureInbox>().with(
            MethodInfo::new("mark_read", "Mark a conversation as read")
                .required("phone", ParamType::String),
            ShapeProfile::unshaped(),
            |ctx, p: MarkRead| {
                let mut messages = ctx
                    .service()
                    .messages
                    .lock()
                    .map_err(|_| anyhow::anyhow!("fixture lock poisoned"))?;
                let mut marked = 0;
                for message in messages.iter_mut().filter(|m| m.phone == p.phone && !m.read) {
                    message.read = true;
                    marked += 1;
                }
                Ok(json!({ "marked": marked }))
            },
        );
        Ok((Arc::new(FixtureInbox::new()?), table))
    })?;
    std::process::exit(code);
}
