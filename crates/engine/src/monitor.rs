//! Hotplug monitor
//!
//! Owns the monitoring lifecycle in a hybrid shape: a dedicated OS thread
//! drives the libusb event loop with a short poll timeout so a stop request
//! is observed promptly, while a tokio task receives decoded arrivals and
//! fans matching rules out to the executor.
//!
//! The libusb hotplug callback itself does no device I/O; it only queues the
//! arrived `Device` for the loop body, which resolves identity and display
//! name outside the callback and forwards them over the async channel.

use crate::error::BusError;
use crate::executor::{self, ExecutionOutcome};
use crate::sink::LogSink;
use crate::store::{DeviceIdentity, RuleStore};
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long one poll iteration may block waiting for bus events. A stop
/// request is observed within this interval.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of the monitoring worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A decoded "device added" event.
#[derive(Debug, Clone)]
pub struct DeviceArrival {
    pub identity: DeviceIdentity,
    pub name: String,
}

/// Handle to a running monitor. Dropping it without calling
/// [`MonitorHandle::stop`] leaves the worker running detached; the engine
/// facade keeps the handle and always stops through it.
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl MonitorHandle {
    /// Whether the worker thread has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Signal the worker and wait for both the poll loop and the dispatcher
    /// to fully terminate. In-flight child processes are not killed; only
    /// event intake halts.
    pub async fn stop(self) {
        let Self {
            stop,
            worker,
            dispatcher,
        } = self;

        stop.store(true, Ordering::Relaxed);
        match tokio::task::spawn_blocking(move || worker.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("monitor thread panicked"),
            Err(e) => warn!("failed to join monitor thread: {e}"),
        }
        // The worker dropped its event sender; the dispatcher drains the
        // channel, emits the terminal log line and exits.
        if let Err(e) = dispatcher.await {
            warn!("monitor dispatcher task failed: {e}");
        }
    }
}

/// Start the hotplug worker and its dispatcher task.
///
/// Returns once the bus subscription is confirmed, so a `BusError` from
/// context creation or callback registration surfaces to this caller rather
/// than dying inside the thread.
pub async fn start(config_path: PathBuf, log: LogSink) -> Result<MonitorHandle, BusError> {
    if !rusb::has_hotplug() {
        return Err(BusError::HotplugUnsupported);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = async_channel::unbounded();
    let (ready_tx, ready_rx) = oneshot::channel();

    let stop_flag = stop.clone();
    let worker = thread::Builder::new()
        .name("usb-monitor".to_string())
        .spawn(move || run_worker(stop_flag, event_tx, ready_tx))
        .map_err(|e| BusError::Worker(e.to_string()))?;

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = worker.join();
            return Err(e);
        }
        Err(_) => {
            let _ = worker.join();
            return Err(BusError::Worker(
                "monitor thread exited before subscribing".to_string(),
            ));
        }
    }

    log.emit("USB event monitoring started");
    let dispatcher = tokio::spawn(dispatch_loop(event_rx, config_path, log));

    Ok(MonitorHandle {
        stop,
        worker,
        dispatcher,
    })
}

/// Poll loop running on the dedicated thread.
fn run_worker(
    stop: Arc<AtomicBool>,
    events: async_channel::Sender<DeviceArrival>,
    ready: oneshot::Sender<Result<(), BusError>>,
) {
    let context = match Context::new() {
        Ok(context) => context,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let (arrived_tx, arrived_rx) = mpsc::channel();
    let callback = ArrivalCallback { arrived: arrived_tx };

    let registration = match HotplugBuilder::new()
        .enumerate(false)
        .register(&context, Box::new(callback))
    {
        Ok(registration) => registration,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let _ = ready.send(Ok(()));
    debug!("hotplug subscription registered");

    while !stop.load(Ordering::Relaxed) {
        match context.handle_events(Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("error handling USB events: {e}");
                thread::sleep(POLL_TIMEOUT);
            }
        }

        // Resolve queued arrivals outside the libusb callback, where device
        // I/O (string descriptor reads) is safe.
        while let Ok(device) = arrived_rx.try_recv() {
            match describe_device(&device) {
                Some(arrival) => {
                    let _ = events.send_blocking(arrival);
                }
                None => debug!(
                    "ignoring device without descriptor (bus={}, addr={})",
                    device.bus_number(),
                    device.address()
                ),
            }
        }
    }

    drop(registration);
    debug!("usb-monitor thread exited");
}

/// Receives decoded arrivals until the worker drops its sender.
async fn dispatch_loop(
    events: async_channel::Receiver<DeviceArrival>,
    config_path: PathBuf,
    log: LogSink,
) {
    while let Ok(arrival) = events.recv().await {
        dispatch_device(&arrival, &config_path, &log);
    }
    log.emit("USB event monitoring stopped");
}

/// The dispatch pipeline applied to every qualifying event, live or scanned:
/// re-load the rule file (every event sees the latest on-disk rules), look
/// up the identity, fan matching rules out to the executor as independent
/// tasks. Returns the spawned dispatch tasks.
pub fn dispatch_device(
    arrival: &DeviceArrival,
    config_path: &Path,
    log: &LogSink,
) -> Vec<JoinHandle<ExecutionOutcome>> {
    log.emit(format!("detected {} ({})", arrival.name, arrival.identity));

    let table = RuleStore::new(config_path).load_or_empty(log);
    let rules = table.lookup(&arrival.identity);
    if rules.is_empty() {
        log.emit(format!("no actions configured for {}", arrival.identity));
        return Vec::new();
    }

    log.emit(format!(
        "{} action(s) configured for {}",
        rules.len(),
        arrival.identity
    ));

    rules
        .iter()
        .cloned()
        .map(|rule| {
            let log = log.clone();
            tokio::spawn(async move { executor::dispatch(&rule, &log).await })
        })
        .collect()
}

/// Enumerate currently attached devices and run each through the identical
/// dispatch pipeline as a live "add" event. Deliberately re-triggers actions
/// for devices present before the process started.
pub fn scan_existing_devices(config_path: &Path, log: &LogSink) -> Result<(), BusError> {
    log.emit("scanning devices already attached");

    let context = Context::new()?;
    let devices = context.devices()?;

    for device in devices.iter() {
        if let Some(arrival) = describe_device(&device) {
            dispatch_device(&arrival, config_path, log);
        }
    }

    log.emit("finished scanning attached devices");
    Ok(())
}

/// Resolve identity and display name. The name falls back to a generic
/// label unless both manufacturer and product strings are readable.
fn describe_device<T: UsbContext>(device: &Device<T>) -> Option<DeviceArrival> {
    let descriptor = device.device_descriptor().ok()?;
    let identity = DeviceIdentity::from_ids(descriptor.vendor_id(), descriptor.product_id());

    let name = device
        .open()
        .ok()
        .and_then(|handle| {
            let manufacturer = handle.read_manufacturer_string_ascii(&descriptor).ok()?;
            let product = handle.read_product_string_ascii(&descriptor).ok()?;
            Some(format!("{manufacturer} {product}"))
        })
        .unwrap_or_else(|| "unknown device".to_string());

    Some(DeviceArrival { identity, name })
}

/// Forwards arrived devices to the poll loop. Removal events are ignored;
/// only "add" events drive the rule pipeline.
struct ArrivalCallback {
    arrived: mpsc::Sender<Device<Context>>,
}

impl Hotplug<Context> for ArrivalCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "hotplug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.arrived.send(device);
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "hotplug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
    }
}
