//! # Configuration
//!
//! A flat string key/value store set on the application before `init()`.
//! Keys are dotted (`queue.manual_registration`); integrations read them
//! through a [`DogConfigSnapshot`] taken when their providers are built.
//!
//! ```rust
//! use dog_core::DogApp;
//! let app = DogApp::new();
//!
//! app.set("queue.manual_registration", "true");
//! assert_eq!(app.config_snapshot().get_bool("queue.manual_registration"), Some(true));
//! ```
//!
//! ## Environment overrides
//! [`DogConfig::load_env`] maps `PREFIX__QUEUE__MANUAL_REGISTRATION=true` to
//! `queue.manual_registration = "true"`.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct DogConfig {
    values: HashMap<String, String>,
}

impl DogConfig {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Load every `{prefix}__A__B` variable of the process as `a.b`.
    ///
    /// Returns the number of keys loaded.
    pub fn load_env(&mut self, prefix: &str) -> usize {
        self.load_vars(prefix, std::env::vars())
    }

    pub(crate) fn load_vars(&mut self, prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> usize {
        let marker = format!("{prefix}__");
        let mut loaded = 0;
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(&marker) {
                if stripped.is_empty() {
                    continue;
                }
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.values.insert(normalized, value);
                loaded += 1;
            }
        }
        loaded
    }

    pub fn snapshot(&self) -> DogConfigSnapshot {
        DogConfigSnapshot::new(self.values.clone())
    }
}

/// Immutable copy of the configuration at one point in time.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DogConfigSnapshot {
    map: HashMap<String, String>,
}

impl DogConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    /// `true`/`false` (any case), `1`/`0`, `yes`/`no`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        }
    }
}
