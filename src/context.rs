//! Shared context for passing data between pipeline stages.
//!
//! Each stage writes its typed output under a well-known key so later agents
//! can have it injected into their prompts:
//!
//! ```ignore
//! use prime_brief::{Agent, AgentConfig, Context};
//!
//! let ctx = Context::new();
//! ctx.set(keys::REQUEST, &request);
//!
//! let mut summarizer = Agent::new(config, llm.clone())
//!     .from_context(&ctx, keys::REQUEST)
//!     .from_context(&ctx, keys::FINDINGS)
//!     .to_context(&ctx, keys::SECTIONS);
//! ```

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keys the pipeline stages agree on.
pub mod keys {
    pub const REQUEST: &str = "request";
    pub const FINDINGS: &str = "findings";
    pub const SECTIONS: &str = "sections";
    pub const REPORT: &str = "report";
}

/// Thread-safe key-value store shared by the agents of one run.
///
/// Cloning is cheap and every clone sees the same data. Values are stored as
/// JSON so any serializable type can go in.
#[derive(Clone, Default)]
pub struct Context {
    data: Arc<Mutex<HashMap<String, Value>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a half-inserted JSON value behind
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a value. Values that fail to serialize are stored as `null`.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let json = serde_json::to_value(value).unwrap_or(Value::Null);
        self.lock().insert(key.to_string(), json);
    }

    /// Returns `None` if the key doesn't exist or doesn't deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lock()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Raw JSON value for a key, as injected into prompts.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
