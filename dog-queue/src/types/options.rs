use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connection used when options name none.
pub const DEFAULT_CONNECTION: &str = "memory://default";

/// Key prefix used when options name none.
pub const DEFAULT_PREFIX: &str = "dog";

/// Upper bound of [`QueueOptions::concurrency`].
pub const MAX_CONCURRENCY: usize = 1 << 20;

/// Open bag of queue / worker / event-stream options.
///
/// Options are merged shallowly: for a key present on both sides the right
/// hand side wins and nested objects are replaced, not combined. A few keys
/// have typed readers:
///
/// | key           | reader               | default               |
/// |---------------|----------------------|-----------------------|
/// | `connection`  | [`connection_key`]   | `memory://default`    |
/// | `prefix`      | [`prefix`]           | `dog`                 |
/// | `concurrency` | [`concurrency`]      | `1`                   |
/// | `autorun`     | [`autorun`]          | `true`                |
///
/// [`connection_key`]: QueueOptions::connection_key
/// [`prefix`]: QueueOptions::prefix
/// [`concurrency`]: QueueOptions::concurrency
/// [`autorun`]: QueueOptions::autorun
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueOptions(Map<String, Value>);

/// Worker tuning uses the same shape as queue options.
pub type WorkerOptions = QueueOptions;

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// `self` overlaid with `other`; `other` wins per key.
    pub fn merge(&self, other: &QueueOptions) -> QueueOptions {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        QueueOptions(merged)
    }

    /// Optional queue name carried inside the options.
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Identity of the backing connection.
    ///
    /// `connection` may be a string, `{ "url": .. }` or `{ "host": .., "port": .. }`.
    pub fn connection_key(&self) -> String {
        match self.0.get("connection") {
            Some(Value::String(url)) => url.clone(),
            Some(Value::Object(conn)) => {
                if let Some(url) = conn.get("url").and_then(Value::as_str) {
                    return url.to_string();
                }
                let host = conn.get("host").and_then(Value::as_str).unwrap_or("localhost");
                match conn.get("port") {
                    Some(port) => format!("{host}:{}", port_string(port)),
                    None => host.to_string(),
                }
            }
            _ => DEFAULT_CONNECTION.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        self.0.get("prefix").and_then(Value::as_str).unwrap_or(DEFAULT_PREFIX)
    }

    /// Parallel jobs per worker, between one and [`MAX_CONCURRENCY`].
    pub fn concurrency(&self) -> usize {
        self.0
            .get("concurrency")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, MAX_CONCURRENCY as u64) as usize)
            .unwrap_or(1)
    }

    /// Whether a worker starts consuming as soon as it is constructed.
    pub fn autorun(&self) -> bool {
        self.0.get("autorun").and_then(Value::as_bool).unwrap_or(true)
    }
}

fn port_string(port: &Value) -> String {
    match port {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Map<String, Value>> for QueueOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for QueueOptions {
    type Error = crate::QueueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(crate::QueueError::SerializationError(format!(
                "queue options must be an object, got {other}"
            ))),
        }
    }
}
