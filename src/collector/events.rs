//! Lifecycle notifications from the host.
//!
//! Hosts either publish typed [`LifecycleEvent`]s directly or hand over a
//! channel name plus a JSON payload, which [`decode_notification`] turns into
//! a typed event. Payload problems never fail: each missing or mistyped
//! field gets its default and is reported back as defaulted.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel names understood by the collector
pub mod channel {
    pub const BOOTING: &str = "lifecycle.booting";
    pub const BOOTED: &str = "lifecycle.booted";
    pub const TERMINATED: &str = "lifecycle.terminated";
    pub const ROUTE_MATCHED: &str = "route.matched";
    pub const MIDDLEWARE_PROCESSED: &str = "middleware.processed";
    pub const ROUTE_DISPATCHED: &str = "route.dispatched";
    pub const QUERY_EXECUTED: &str = "db.queryExecuted";
    pub const VIEW_RENDERED: &str = "view.rendered";
    pub const LANGUAGE_FILE_LOADED: &str = "i18n.fileLoaded";

    pub const ALL: &[&str] = &[
        BOOTING,
        BOOTED,
        TERMINATED,
        ROUTE_MATCHED,
        MIDDLEWARE_PROCESSED,
        ROUTE_DISPATCHED,
        QUERY_EXECUTED,
        VIEW_RENDERED,
        LANGUAGE_FILE_LOADED,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub query: String,
    pub bindings: Vec<Value>,
    /// Milliseconds
    pub time: f64,
    pub memory_before: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPayload {
    pub path: String,
    /// Milliseconds
    pub time: f64,
    pub memory_before: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageFilePayload {
    pub file: String,
    /// Milliseconds
    pub load_time: f64,
    pub memory_before: Option<u64>,
}

/// One lifecycle point with its fixed payload shape
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Booting,
    Booted,
    Terminated,
    RouteMatched(Map<String, Value>),
    MiddlewareProcessed(Vec<String>),
    RouteDispatched,
    QueryExecuted(QueryPayload),
    ViewRendered(ViewPayload),
    LanguageFileLoaded(LanguageFilePayload),
}

impl LifecycleEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            LifecycleEvent::Booting => channel::BOOTING,
            LifecycleEvent::Booted => channel::BOOTED,
            LifecycleEvent::Terminated => channel::TERMINATED,
            LifecycleEvent::RouteMatched(_) => channel::ROUTE_MATCHED,
            LifecycleEvent::MiddlewareProcessed(_) => channel::MIDDLEWARE_PROCESSED,
            LifecycleEvent::RouteDispatched => channel::ROUTE_DISPATCHED,
            LifecycleEvent::QueryExecuted(_) => channel::QUERY_EXECUTED,
            LifecycleEvent::ViewRendered(_) => channel::VIEW_RENDERED,
            LifecycleEvent::LanguageFileLoaded(_) => channel::LANGUAGE_FILE_LOADED,
        }
    }
}

/// A decoded notification plus the payload fields that had to be defaulted
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: LifecycleEvent,
    pub defaulted: Vec<&'static str>,
}

struct PayloadReader<'a> {
    payload: &'a Value,
    defaulted: Vec<&'static str>,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a Value) -> Self {
        Self {
            payload,
            defaulted: Vec::new(),
        }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.payload.get(field).filter(|v| !v.is_null())
    }

    fn string(&mut self, field: &'static str) -> String {
        match self.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                self.defaulted.push(field);
                String::new()
            }
        }
    }

    /// Numbers and numeric strings are both accepted
    fn number(&mut self, field: &'static str) -> f64 {
        let parsed = match self.get(field) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed.filter(|v| v.is_finite()) {
            Some(v) => v,
            None => {
                self.defaulted.push(field);
                0.0
            }
        }
    }

    /// Optional by contract, so absence is not a defaulted field
    fn optional_bytes(&mut self, field: &'static str) -> Option<u64> {
        let value = self.get(field)?;
        match value.as_u64().or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)) {
            Some(bytes) => Some(bytes),
            None => {
                self.defaulted.push(field);
                None
            }
        }
    }

    fn list(&mut self, field: &'static str) -> Vec<Value> {
        match self.get(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                self.defaulted.push(field);
                Vec::new()
            }
        }
    }
}

fn middleware_ids(payload: &Value) -> (Vec<String>, Vec<&'static str>) {
    let id = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match payload {
        Value::Array(items) => (items.iter().map(id).collect(), Vec::new()),
        Value::Object(map) => match map.get("middlewares") {
            Some(Value::Array(items)) => (items.iter().map(id).collect(), Vec::new()),
            _ => (map.values().map(id).collect(), Vec::new()),
        },
        Value::Null => (Vec::new(), Vec::new()),
        Value::String(s) => (vec![s.clone()], Vec::new()),
        _ => (Vec::new(), vec!["middlewares"]),
    }
}

/// Turn a named notification into a typed event
///
/// Returns `None` for channels the collector does not handle.
pub fn decode_notification(name: &str, payload: &Value) -> Option<DecodedEvent> {
    let mut reader = PayloadReader::new(payload);

    let event = match name {
        channel::BOOTING => LifecycleEvent::Booting,
        channel::BOOTED => LifecycleEvent::Booted,
        channel::TERMINATED => LifecycleEvent::Terminated,
        channel::ROUTE_DISPATCHED => LifecycleEvent::RouteDispatched,
        channel::ROUTE_MATCHED => match payload {
            Value::Object(map) => LifecycleEvent::RouteMatched(map.clone()),
            Value::Null => LifecycleEvent::RouteMatched(Map::new()),
            _ => {
                reader.defaulted.push("route");
                LifecycleEvent::RouteMatched(Map::new())
            }
        },
        channel::MIDDLEWARE_PROCESSED => {
            let (ids, defaulted) = middleware_ids(payload);
            reader.defaulted.extend(defaulted);
            LifecycleEvent::MiddlewareProcessed(ids)
        }
        channel::QUERY_EXECUTED => LifecycleEvent::QueryExecuted(QueryPayload {
            query: reader.string("query"),
            bindings: reader.list("bindings"),
            time: reader.number("time"),
            memory_before: reader.optional_bytes("memory_before"),
        }),
        channel::VIEW_RENDERED => LifecycleEvent::ViewRendered(ViewPayload {
            path: reader.string("path"),
            time: reader.number("time"),
            memory_before: reader.optional_bytes("memory_before"),
        }),
        channel::LANGUAGE_FILE_LOADED => LifecycleEvent::LanguageFileLoaded(LanguageFilePayload {
            file: reader.string("file"),
            load_time: reader.number("load_time"),
            memory_before: reader.optional_bytes("memory_before"),
        }),
        other => {
            debug!("Ignoring unknown notification '{}'", other);
            return None;
        }
    };

    if !reader.defaulted.is_empty() {
        warn!(
            "Notification '{}' missing or invalid fields: {}",
            name,
            reader.defaulted.join(", ")
        );
    }

    Some(DecodedEvent {
        event,
        defaulted: reader.defaulted,
    })
}

/// Receiver of lifecycle notifications
pub trait LifecycleObserver {
    fn on_event(&mut self, event: &LifecycleEvent);

    /// Untyped entry point; decodes then forwards to [`Self::on_event`]
    fn on_notification(&mut self, name: &str, payload: &Value) {
        if let Some(decoded) = decode_notification(name, payload) {
            self.on_event(&decoded.event);
        }
    }
}

/// Synchronous fan-out to registered observers, in subscription order
#[derive(Default)]
pub struct EventBus<'a> {
    observers: Vec<&'a mut dyn LifecycleObserver>,
}

impl<'a> EventBus<'a> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: &'a mut dyn LifecycleObserver) {
        self.observers.push(observer);
    }

    pub fn publish(&mut self, event: &LifecycleEvent) {
        for observer in self.observers.iter_mut() {
            observer.on_event(event);
        }
    }

    pub fn publish_named(&mut self, name: &str, payload: &Value) {
        for observer in self.observers.iter_mut() {
            observer.on_notification(name, payload);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
