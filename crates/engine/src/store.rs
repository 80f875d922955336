//! Rule storage
//!
//! Maps a device identity (vendor:product pair) to an ordered list of
//! actions and persists the mapping as a JSON document:
//!
//! ```json
//! {
//!   "1234:5678": [
//!     { "action_script": "/usr/local/bin/mount.sh",
//!       "action_args": ["--ro"],
//!       "auth_required": false,
//!       "delay_sec": 2 }
//!   ]
//! }
//! ```
//!
//! A load failure is recoverable: callers get an error (or an empty table
//! via [`RuleStore::load_or_empty`]) and a log line, never a crash.

use crate::error::ConfigError;
use crate::sink::LogSink;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// One operator-defined action bound to a device identity.
///
/// `auth_required` is recorded for front ends that gate execution behind an
/// operator confirmation; the engine itself does not enforce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRule {
    #[serde(rename = "action_script")]
    pub script: PathBuf,

    #[serde(rename = "action_args", default)]
    pub args: Vec<String>,

    #[serde(rename = "auth_required", default)]
    pub auth_required: bool,

    #[serde(rename = "delay_sec", default)]
    pub delay_sec: u64,
}

impl ActionRule {
    /// Minimal shape check; executability is re-checked at dispatch time.
    pub fn validate(&self, identity: &DeviceIdentity) -> Result<(), ConfigError> {
        if self.script.as_os_str().is_empty() {
            return Err(ConfigError::EmptyScript {
                identity: identity.clone(),
            });
        }
        Ok(())
    }
}

/// Vendor:product pair in canonical `vvvv:pppp` form.
///
/// The bus reports hex ids in varying case; identities are normalized to
/// lowercase at every boundary so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn from_ids(vendor_id: u16, product_id: u16) -> Self {
        Self(format!("{vendor_id:04x}:{product_id:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

// Hand-written serde impls: the derive would bypass normalization when keys
// come straight out of a config file.
impl Serialize for DeviceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}

/// Ordered mapping of device identity to its dispatch-ordered rule list.
///
/// The `BTreeMap` keeps serialization deterministic; each `Vec` preserves
/// insertion order, which is the dispatch order. All matching rules are
/// dispatched, never just the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable(BTreeMap<DeviceIdentity, Vec<ActionRule>>);

impl RuleTable {
    /// Rules for an identity, or an empty slice. Never mutates the table.
    pub fn lookup(&self, identity: &DeviceIdentity) -> &[ActionRule] {
        self.0.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a rule to an identity's list, creating the list if absent.
    pub fn add(&mut self, identity: DeviceIdentity, rule: ActionRule) {
        self.0.entry(identity).or_default().push(rule);
    }

    /// Drop an identity's entire list. Returns whether anything was removed.
    pub fn remove(&mut self, identity: &DeviceIdentity) -> bool {
        self.0.remove(identity).is_some()
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceIdentity, &[ActionRule])> {
        self.0.iter().map(|(id, rules)| (id, rules.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An identity with an empty rule list is equivalent to absence.
    fn prune(&mut self) {
        self.0.retain(|_, rules| !rules.is_empty());
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (identity, rules) in &self.0 {
            for rule in rules {
                rule.validate(identity)?;
            }
        }
        Ok(())
    }
}

/// Loads and saves a [`RuleTable`] at a fixed path.
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the rule file. Missing, unreadable or malformed files yield a
    /// [`ConfigError`]; the caller decides whether that clears its table.
    pub fn load(&self) -> Result<RuleTable, ConfigError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut table: RuleTable =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;

        table.validate()?;
        table.prune();
        Ok(table)
    }

    /// Load, reporting any failure through the log sink and falling back to
    /// an empty table. The monitor uses this on every event so that each
    /// dispatch sees the latest on-disk rules.
    pub fn load_or_empty(&self, log: &LogSink) -> RuleTable {
        match self.load() {
            Ok(table) => table,
            Err(e) => {
                log.emit(format!("{e}"));
                RuleTable::default()
            }
        }
    }

    /// Serialize the table deterministically (identities sorted, rules in
    /// dispatch order) and replace the file via temp-file + rename so a
    /// crash mid-write cannot leave a truncated document behind.
    pub fn save(&self, table: &RuleTable) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        // to_string_pretty on a BTreeMap-backed table cannot fail.
        let content = serde_json::to_string_pretty(table).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        tracing::info!("saved rule table to {}", self.path.display());
        Ok(())
    }
}
