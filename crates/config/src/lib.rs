//! String-keyed configuration store with dotted sections.
//!
//! Files are INI-style: `[section]` headers prefix the keys that follow, so
//!
//! ```text
//! [exchange]
//! fill_latency_ms = 10
//! slippage_bps = 5.0   # basis points
//! ```
//!
//! yields `exchange.fill_latency_ms` and `exchange.slippage_bps`. Both `=`
//! and `:` delimit key and value; `#` and `//` start comments; quotes around
//! values are stripped.
//!
//! The store is an explicit value passed to component constructors, which
//! read it once at construction time. Typed getters fall back to a default
//! on missing keys and on unparseable values.

use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Read-only after load, string-keyed configuration values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file; IO failures surface to the caller.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse config text. Lines that are not `key = value` pairs, comments
    /// or section headers are ignored.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        let mut section = String::new();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            let Some(delim) = line.find(['=', ':']) else {
                continue;
            };
            let key = line[..delim].trim();
            if key.is_empty() {
                continue;
            }
            let mut value = line[delim + 1..].trim();
            if let Some(comment) = value.find('#').or_else(|| value.find("//")) {
                value = value[..comment].trim();
            }
            let value = strip_quotes(value);

            let full_key = if section.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", section, key)
            };
            values.insert(full_key, value.to_string());
        }

        Self { values }
    }

    /// Set a value programmatically.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// True for `true`/`1`/`yes`/`on` (case-insensitive), false for their
    /// negations; anything else falls back to `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            None => default,
        }
    }
}

fn strip_quotes(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 {
        let bytes = v.as_bytes();
        if (bytes[0] == b'"' && bytes[v.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[v.len() - 1] == b'\'')
        {
            return &v[1..v.len() - 1];
        }
    }
    v
}
