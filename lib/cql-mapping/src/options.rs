//! Per-operation write options, synchronization policy and session configuration.

use std::any::TypeId;
use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::{Entity, MappingError};

/// Consistency level requested for a statement. Each backend maps it to its driver's levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

/// Driver retry behavior for a statement. This layer never retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum RetryPolicy {
    #[default]
    Default,
    Fallthrough,
    DowngradingConsistency,
}

/// Per-operation overrides applied on top of the record type's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Seconds until the written cells expire. `Some(0)` disables a type's default TTL.
    pub ttl: Option<u32>,
    /// Write timestamp in microseconds since the epoch.
    pub timestamp: Option<i64>,
    pub consistency: Option<Consistency>,
    pub retry_policy: Option<RetryPolicy>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub fn timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Policy toggles for a synchronization pass. All default to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncFlags {
    /// Skip synchronization entirely; statements run against whatever schema exists.
    pub do_not_sync: bool,
    pub do_not_add_columns: bool,
    pub do_not_drop_columns: bool,
    /// Keep live indexes the record type does not declare.
    pub do_not_drop_custom_index: bool,
}

impl SyncFlags {
    pub fn union(self, other: SyncFlags) -> SyncFlags {
        SyncFlags {
            do_not_sync: self.do_not_sync || other.do_not_sync,
            do_not_add_columns: self.do_not_add_columns || other.do_not_add_columns,
            do_not_drop_columns: self.do_not_drop_columns || other.do_not_drop_columns,
            do_not_drop_custom_index: self.do_not_drop_custom_index
                || other.do_not_drop_custom_index,
        }
    }
}

/// Global synchronization flags plus per-type overrides.
///
/// The flags in effect for a type are the union of the global flags and the
/// flags registered for that type.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    global: SyncFlags,
    per_type: HashMap<TypeId, SyncFlags>,
}

impl SyncOptions {
    pub fn new(global: SyncFlags) -> Self {
        Self {
            global,
            per_type: HashMap::new(),
        }
    }

    pub fn with_type<T: Entity>(mut self, flags: SyncFlags) -> Self {
        self.per_type.insert(TypeId::of::<T>(), flags);
        self
    }

    pub fn global(&self) -> SyncFlags {
        self.global
    }

    pub fn flags_for(&self, type_id: TypeId) -> SyncFlags {
        match self.per_type.get(&type_id) {
            Some(flags) => self.global.union(*flags),
            None => self.global,
        }
    }
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_idle_secs() -> u64 {
    3600
}

/// Session settings loadable from JSON.
///
/// ```text
/// { "keyspace": "ledger", "sync": { "do_not_drop_columns": true }, "cache_capacity": 500 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub keyspace: String,
    #[serde(default)]
    pub sync: SyncFlags,
    /// Prepared statements kept in the cache. `0` disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Seconds an unused prepared statement stays cached.
    #[serde(default = "default_cache_idle_secs")]
    pub cache_idle_secs: u64,
}

impl SessionConfig {
    pub fn new(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            sync: SyncFlags::default(),
            cache_capacity: default_cache_capacity(),
            cache_idle_secs: default_cache_idle_secs(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn cache_idle(&self) -> Duration {
        Duration::from_secs(self.cache_idle_secs)
    }
}
