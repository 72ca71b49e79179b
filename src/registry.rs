//! Method table and dispatch.
//!
//! The table maps a method name to its contract and a handler. It is built
//! once when the daemon is constructed and handed to a [`Dispatcher`]; there
//! is no global registry, so independent daemons can live in one process.
//!
//! Parameter contracts are enforced here, before any handler runs:
//! output-control params, required params, declared types, and finally the
//! decode into the handler's own params type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::DaemonError;
use crate::protocol::{self, Params, Request, Response};
use crate::schema;
use crate::service::{MethodInfo, Service};
use crate::shaping::{OutputControl, ShapeProfile};

type Handler<S> =
    Box<dyn Fn(&CallContext<'_, S>, Params) -> Result<Value, DaemonError> + Send + Sync>;

/// One registered method.
pub struct MethodEntry<S> {
    info: MethodInfo,
    profile: ShapeProfile,
    handler: Handler<S>,
}

impl<S> MethodEntry<S> {
    pub fn info(&self) -> &MethodInfo {
        &self.info
    }

    pub fn profile(&self) -> &ShapeProfile {
        &self.profile
    }
}

/// Name → contract → handler.
pub struct MethodTable<S> {
    entries: BTreeMap<String, MethodEntry<S>>,
}

impl<S: Service> Default for MethodTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Service> MethodTable<S> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a method whose params decode into `P`.
    ///
    /// Registering a name twice replaces the earlier entry.
    ///
    /// ```rust
    /// use serde::Deserialize;
    /// use serde_json::json;
    /// use warm_daemon::{MethodInfo, MethodTable, ParamType, Service, ShapeProfile};
    ///
    /// struct Notes;
    /// impl Service for Notes {
    ///     fn name(&self) -> &str { "notes" }
    ///     fn version(&self) -> &str { "1.0.0" }
    /// }
    ///
    /// #[derive(Deserialize)]
    /// struct Find { query: String }
    ///
    /// let mut table = MethodTable::<Notes>::new();
    /// table.register(
    ///     MethodInfo::new("notes.find", "Find notes").required("query", ParamType::String),
    ///     ShapeProfile::keys(&["notes"]),
    ///     |_ctx, params: Find| Ok(json!({"notes": [], "query": params.query})),
    /// );
    /// assert!(table.contains("notes.find"));
    /// ```
    pub fn register<P, R, F>(&mut self, info: MethodInfo, profile: ShapeProfile, handler: F) -> &mut Self
    where
        P: DeserializeOwned + 'static,
        R: Serialize + Debug + 'static,
        F: Fn(&CallContext<'_, S>, P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name = info.name.clone();
        let handler: Handler<S> = Box::new(move |ctx: &CallContext<'_, S>, params: Params| {
            let typed: P = serde_json::from_value(Value::Object(params)).map_err(|e| {
                DaemonError::Validation {
                    field: None,
                    message: format!("invalid params for {}: {e}", ctx.method()),
                }
            })?;
            let result = handler(ctx, typed).map_err(DaemonError::from_handler)?;
            Ok(protocol::to_wire_value(&result))
        });
        self.entries.insert(
            name,
            MethodEntry {
                info,
                profile,
                handler,
            },
        );
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<P, R, F>(mut self, info: MethodInfo, profile: ShapeProfile, handler: F) -> Self
    where
        P: DeserializeOwned + 'static,
        R: Serialize + Debug + 'static,
        F: Fn(&CallContext<'_, S>, P) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.register(info, profile, handler);
        self
    }

    /// Add `health` and `methods` unless the table already has them.
    pub fn install_builtins(&mut self) -> &mut Self {
        if !self.contains("health") {
            self.register(
                MethodInfo::new("health", "Service health payload"),
                ShapeProfile::unshaped(),
                |ctx, _: Params| ctx.service().health(),
            );
        }
        if !self.contains("methods") {
            self.register(
                MethodInfo::new("methods", "List registered methods and their parameters"),
                ShapeProfile::unshaped(),
                |ctx, _: Params| {
                    let methods: Vec<Value> = ctx
                        .table()
                        .infos()
                        .map(|info| {
                            json!({
                                "name": info.name,
                                "description": info.description,
                                "params": info.params,
                                "schema": schema::params_schema(&info.params),
                            })
                        })
                        .collect();
                    Ok(json!({ "methods": methods }))
                },
            );
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry<S>> {
        self.entries.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn infos(&self) -> impl Iterator<Item = &MethodInfo> {
        self.entries.values().map(|entry| &entry.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate, run and shape one method call.
    pub fn invoke(
        &self,
        service: &S,
        method: &str,
        params: Params,
        output: &OutputControl,
    ) -> Result<Value, DaemonError> {
        let entry = self
            .get(method)
            .ok_or_else(|| DaemonError::UnknownMethod(method.to_string()))?;

        let params = validate(&entry.info, params)?;

        let ctx = CallContext {
            service,
            table: self,
            output,
            method,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(&ctx, params)))
            .unwrap_or_else(|payload| Err(DaemonError::from_panic(payload)))?;

        Ok(entry.profile.apply(result, output))
    }
}

/// Check `params` against a method contract.
///
/// Returns the params with `null` optional values removed, so handler
/// params types can rely on `#[serde(default)]`.
pub fn validate(info: &MethodInfo, mut params: Params) -> Result<Params, DaemonError> {
    for param in &info.params {
        let value = params.get(&param.name).filter(|value| !value.is_null());
        let Some(value) = value else {
            if param.required {
                return Err(DaemonError::required(&param.name));
            }
            params.remove(&param.name);
            continue;
        };

        if param.required && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            return Err(DaemonError::required(&param.name));
        }
        if !param.param_type.accepts(value) {
            return Err(DaemonError::validation(
                &param.name,
                format!("{} must be {}", param.name, param.param_type.describe()),
            ));
        }
    }
    Ok(params)
}

/// What a handler sees besides its params.
pub struct CallContext<'a, S> {
    service: &'a S,
    table: &'a MethodTable<S>,
    output: &'a OutputControl,
    method: &'a str,
}

impl<'a, S: Service> CallContext<'a, S> {
    pub fn service(&self) -> &'a S {
        self.service
    }

    pub fn table(&self) -> &'a MethodTable<S> {
        self.table
    }

    /// Output options of the current request.
    pub fn output(&self) -> &'a OutputControl {
        self.output
    }

    /// Name of the method being handled.
    pub fn method(&self) -> &'a str {
        self.method
    }

    /// Call another registered method with the same output options.
    pub fn invoke(&self, method: &str, params: Params) -> Result<Value, DaemonError> {
        self.table.invoke(self.service, method, params, self.output)
    }
}

/// Turns request lines into responses.
pub struct Dispatcher<S> {
    service: Arc<S>,
    table: MethodTable<S>,
}

impl<S: Service> Dispatcher<S> {
    /// Create a dispatcher; `health` and `methods` are added if missing.
    pub fn new(service: Arc<S>, mut table: MethodTable<S>) -> Self {
        table.install_builtins();
        Self { service, table }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn table(&self) -> &MethodTable<S> {
        &self.table
    }

    /// Handle one request line (newline stripped).
    pub fn handle_line(&self, line: &[u8]) -> Response {
        let start = Instant::now();
        match Request::parse(line) {
            Ok(request) => self.handle_request(request, start),
            Err(rejected) => {
                warn!(error = %rejected.error, "Rejected request");
                Response::from_error(rejected.id, &rejected.error, elapsed_ms(start))
            }
        }
    }

    /// Handle one parsed request. `start` is when handling began.
    pub fn handle_request(&self, request: Request, start: Instant) -> Response {
        debug!(method = %request.method, id = %request.id, "Handling request");

        let response = match self.dispatch(&request.method, request.params) {
            Ok(result) => Response::success(request.id.clone(), result, elapsed_ms(start)),
            Err(error) => {
                debug!(method = %request.method, id = %request.id, code = %error.code(), error = %error, "Request failed");
                Response::from_error(request.id.clone(), &error, elapsed_ms(start))
            }
        };

        debug!(
            method = %request.method,
            id = %request.id,
            server_ms = response.meta.server_ms,
            "Request complete"
        );
        response
    }

    /// Look up, validate and run `method`.
    pub fn dispatch(&self, method: &str, params: Params) -> Result<Value, DaemonError> {
        if !self.table.contains(method) {
            return Err(DaemonError::UnknownMethod(method.to_string()));
        }
        let output = OutputControl::from_params(&params)?;
        self.table.invoke(&self.service, method, params, &output)
    }
}

/// Milliseconds since `start`.
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
