//! Integration tests for rule file load/save
//!
//! Covers round-tripping, field defaults, failure policy for missing and
//! malformed files, and the append-only authoring flow.

use engine::{ActionRule, ConfigError, DeviceIdentity, RuleStore, RuleTable, sink};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn rule(script: &str, args: &[&str], delay_sec: u64) -> ActionRule {
    ActionRule {
        script: PathBuf::from(script),
        args: args.iter().map(|a| a.to_string()).collect(),
        auth_required: false,
        delay_sec,
    }
}

fn drain(rx: &async_channel::Receiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

#[test]
fn save_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = RuleStore::new(dir.path().join("triggers.json"));

    let mut table = RuleTable::default();
    table.add("1234:5678".into(), rule("/bin/true", &["--flag", "x"], 2));
    table.add("04f9:10ab".into(), rule("/usr/local/bin/mount.sh", &[], 0));

    store.save(&table).unwrap();
    assert_eq!(store.load().unwrap(), table);
}

#[test]
fn missing_optional_fields_default_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("triggers.json");
    fs::write(&path, r#"{"1234:5678":[{"action_script":"/bin/true"}]}"#).unwrap();

    let table = RuleStore::new(&path).load().unwrap();
    let rules = table.lookup(&"1234:5678".into());
    assert_eq!(rules, [rule("/bin/true", &[], 0)]);
    assert!(!rules[0].auth_required);
}

#[test]
fn missing_file_reports_read_error() {
    let dir = TempDir::new().unwrap();
    let store = RuleStore::new(dir.path().join("absent.json"));
    assert!(matches!(store.load(), Err(ConfigError::Read { .. })));
}

#[test]
fn malformed_file_reports_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("triggers.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        RuleStore::new(&path).load(),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn load_or_empty_logs_and_yields_empty_table() {
    let dir = TempDir::new().unwrap();
    let (log, rx) = sink::channel();

    let table = RuleStore::new(dir.path().join("absent.json")).load_or_empty(&log);
    assert!(table.is_empty());

    let lines = drain(&rx);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("cannot read rule file"));
}

#[test]
fn incremental_authoring_appends_per_identity() {
    let dir = TempDir::new().unwrap();
    let store = RuleStore::new(dir.path().join("triggers.json"));
    let identity: DeviceIdentity = "1234:5678".into();

    // First rule authored and saved on its own.
    let mut table = RuleTable::default();
    table.add(identity.clone(), rule("/bin/first", &[], 0));
    store.save(&table).unwrap();

    // Second rule appended to the reloaded table, then saved again.
    let mut table = store.load().unwrap();
    table.add(identity.clone(), rule("/bin/second", &[], 0));
    store.save(&table).unwrap();

    let reloaded = store.load().unwrap();
    let rules = reloaded.lookup(&identity);
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].script, PathBuf::from("/bin/first"));
    assert_eq!(rules[1].script, PathBuf::from("/bin/second"));
}

#[test]
fn empty_rule_lists_are_equivalent_to_absence() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("triggers.json");
    fs::write(&path, r#"{"1234:5678":[]}"#).unwrap();

    let table = RuleStore::new(&path).load().unwrap();
    assert!(table.is_empty());
    assert!(table.lookup(&"1234:5678".into()).is_empty());
}

#[test]
fn empty_script_in_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("triggers.json");
    fs::write(&path, r#"{"1234:5678":[{"action_script":""}]}"#).unwrap();
    assert!(matches!(
        RuleStore::new(&path).load(),
        Err(ConfigError::EmptyScript { .. })
    ));
}

#[test]
fn save_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let store = RuleStore::new(dir.path().join("nested").join("triggers.json"));

    let mut table = RuleTable::default();
    table.add("1234:5678".into(), rule("/bin/true", &[], 0));

    store.save(&table).unwrap();
    assert_eq!(store.load().unwrap(), table);
}
