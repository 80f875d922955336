//! Engine facade
//!
//! Glues store, monitor and executor into the operations front ends call,
//! and enforces the concurrency contract: a single active monitor, clean
//! stop-before-restart, and table mutation serialized behind one mutex.

use crate::error::{BusError, ConfigError};
use crate::monitor::{self, MonitorHandle, MonitorState};
use crate::sink::{self, LogSink};
use crate::store::{ActionRule, DeviceIdentity, RuleStore, RuleTable};
use std::path::PathBuf;
use tokio::sync::{Mutex, watch};

pub struct Engine {
    store: RuleStore,
    table: Mutex<RuleTable>,
    monitor: Mutex<Option<MonitorHandle>>,
    state: watch::Sender<MonitorState>,
    log: LogSink,
}

impl Engine {
    /// Create an engine bound to a rule file, together with the log
    /// receiver the front end renders.
    pub fn new(config_path: impl Into<PathBuf>) -> (Self, async_channel::Receiver<String>) {
        let (log, rx) = sink::channel();
        (Self::with_sink(config_path, log), rx)
    }

    /// Create an engine that appends to an existing sink.
    pub fn with_sink(config_path: impl Into<PathBuf>, log: LogSink) -> Self {
        let (state, _) = watch::channel(MonitorState::Stopped);
        Self {
            store: RuleStore::new(config_path),
            table: Mutex::new(RuleTable::default()),
            monitor: Mutex::new(None),
            state,
            log,
        }
    }

    /// Replace the in-memory table with the on-disk one. On failure the
    /// table is cleared and the error is reported; the caller may ignore it.
    pub async fn load_config(&self) -> Result<(), ConfigError> {
        let mut table = self.table.lock().await;
        match self.store.load() {
            Ok(loaded) => {
                self.log.emit(format!(
                    "loaded {} device identit{} from {}",
                    loaded.len(),
                    if loaded.len() == 1 { "y" } else { "ies" },
                    self.store.path().display()
                ));
                *table = loaded;
                Ok(())
            }
            Err(e) => {
                self.log.emit(format!("{e}"));
                *table = RuleTable::default();
                Err(e)
            }
        }
    }

    /// Persist the in-memory table.
    pub async fn save_config(&self) -> Result<(), ConfigError> {
        let table = self.table.lock().await;
        match self.store.save(&table) {
            Ok(()) => {
                self.log
                    .emit(format!("saved rules to {}", self.store.path().display()));
                Ok(())
            }
            Err(e) => {
                self.log.emit(format!("{e}"));
                Err(e)
            }
        }
    }

    /// Append a rule to an identity's dispatch list.
    pub async fn add_rule(
        &self,
        identity: DeviceIdentity,
        rule: ActionRule,
    ) -> Result<(), ConfigError> {
        rule.validate(&identity)?;
        let mut table = self.table.lock().await;
        self.log.emit(format!(
            "added action '{}' for {identity}",
            rule.script.display()
        ));
        table.add(identity, rule);
        Ok(())
    }

    /// Delete an identity's entire rule list.
    pub async fn remove_rules(&self, identity: &DeviceIdentity) -> bool {
        let removed = self.table.lock().await.remove(identity);
        if removed {
            self.log.emit(format!("removed all actions for {identity}"));
        } else {
            self.log.emit(format!("no actions found for {identity}"));
        }
        removed
    }

    /// Snapshot of the current table, for front-end display.
    pub async fn rules(&self) -> RuleTable {
        self.table.lock().await.clone()
    }

    /// Start the hotplug monitor. A second call while running is a reported
    /// no-op; a worker that died on its own is reaped first.
    pub async fn start_monitor(&self) -> Result<(), BusError> {
        let mut slot = self.monitor.lock().await;

        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            self.log.emit("monitoring is already running");
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            stale.stop().await;
        }

        self.state.send_replace(MonitorState::Starting);
        match monitor::start(self.store.path().to_path_buf(), self.log.clone()).await {
            Ok(handle) => {
                *slot = Some(handle);
                self.state.send_replace(MonitorState::Running);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(MonitorState::Stopped);
                self.log.emit(format!("cannot start monitoring: {e}"));
                Err(e)
            }
        }
    }

    /// Stop the monitor and wait for the worker to fully terminate, so a
    /// following `start_monitor` is always safe.
    pub async fn stop_monitor(&self) {
        let mut slot = self.monitor.lock().await;
        match slot.take() {
            Some(handle) => {
                self.state.send_replace(MonitorState::Stopping);
                handle.stop().await;
                self.state.send_replace(MonitorState::Stopped);
            }
            None => self.log.emit("monitoring is not active"),
        }
    }

    /// Run the existing-device scan through the live dispatch pipeline.
    /// Usable whether or not the monitor is running.
    pub async fn scan_existing_devices(&self) -> Result<(), BusError> {
        let path = self.store.path().to_path_buf();
        let log = self.log.clone();

        let result = tokio::task::spawn_blocking(move || {
            monitor::scan_existing_devices(&path, &log)
        })
        .await
        .map_err(|e| BusError::Worker(e.to_string()))?;

        if let Err(ref e) = result {
            self.log.emit(format!("scan failed: {e}"));
        }
        result
    }

    /// Current lifecycle state. A worker that died on its own is detected
    /// here: the stale handle is reaped and `Stopped` is published, so the
    /// reported state never lags a dead monitor.
    pub async fn monitor_state(&self) -> MonitorState {
        let mut slot = self.monitor.lock().await;
        if slot.as_ref().is_some_and(|handle| handle.is_finished()) {
            if let Some(stale) = slot.take() {
                stale.stop().await;
            }
            self.state.send_replace(MonitorState::Stopped);
        }
        *self.state.borrow()
    }

    /// Lifecycle notifications for front ends.
    pub fn subscribe_state(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }
}
