// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Discovery controller.
//!
//! Owns the scan result set and the single session slot. Scanning and a
//! running session are mutually exclusive: connecting stops the scan, and a
//! scan cannot start again until the session has been torn down.

use anyhow::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::Device;
use super::session::{SessionError, SessionManager, SessionOptions, SessionResult, SessionSlot};
use super::transport::{DiscoveryStream, Transport};
use crate::events::{DiscoveryEvent, SessionEvent};

/// Default length of one discovery window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(12);

/// How long a cancelled scan task gets to wind down before it is aborted.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// A running scan.
struct ScanTask {
    cancel_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ScanTask {
    /// Cancel the task and wait a bounded time for it to finish.
    async fn stop(self) {
        let ScanTask {
            cancel_tx,
            mut handle,
        } = self;
        let _ = cancel_tx.send(());

        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Discovery task ended abnormally: {}", e),
            Err(_) => {
                warn!("Discovery task did not stop in time, aborting it");
                handle.abort();
            }
        }
    }
}

/// Handle to a session running on its own task.
pub struct SessionHandle {
    device: Device,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<SessionResult>,
}

impl SessionHandle {
    /// Device the session is talking to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Next progress event, `None` once the session has finished.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Wait for the session to finish. Undelivered events are dropped.
    pub async fn outcome(self) -> SessionResult {
        drop(self.events);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Aborted(e.to_string())),
        }
    }
}

/// Scans for nearby devices and hands a selected one to a session.
pub struct DiscoveryController {
    transport: Arc<dyn Transport>,
    event_tx: mpsc::Sender<DiscoveryEvent>,
    found: Arc<Mutex<Vec<Device>>>,
    scan: tokio::sync::Mutex<Option<ScanTask>>,
    scanning: Arc<AtomicBool>,
    session_busy: Arc<AtomicBool>,
    released: AtomicBool,
    scan_window: Duration,
    session_options: SessionOptions,
    default_device: Option<String>,
}

impl DiscoveryController {
    /// Create a new discovery controller reporting to `event_tx`.
    pub fn new(transport: Arc<dyn Transport>, event_tx: mpsc::Sender<DiscoveryEvent>) -> Self {
        Self {
            transport,
            event_tx,
            found: Arc::new(Mutex::new(Vec::new())),
            scan: tokio::sync::Mutex::new(None),
            scanning: Arc::new(AtomicBool::new(false)),
            session_busy: Arc::new(AtomicBool::new(false)),
            released: AtomicBool::new(false),
            scan_window: DEFAULT_SCAN_WINDOW,
            session_options: SessionOptions::default(),
            default_device: None,
        }
    }

    /// Remember a user-chosen default device address.
    pub fn with_default_device(mut self, address: Option<String>) -> Self {
        self.default_device = address.filter(|a| !a.trim().is_empty());
        self
    }

    /// Length of one discovery window.
    pub fn with_scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    /// Options passed to every session.
    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    pub fn supports_transport(&self) -> bool {
        self.transport.is_supported()
    }

    pub async fn is_enabled(&self) -> bool {
        self.transport.is_supported() && self.transport.is_enabled().await
    }

    /// Ask the host to power the transport on, if it exists and is off.
    pub async fn request_enable(&self) -> Result<bool> {
        if !self.supports_transport() {
            warn!("Bluetooth hardware not available, cannot enable it");
            return Ok(false);
        }
        if self.transport.is_enabled().await {
            return Ok(true);
        }
        info!("Requesting bluetooth to be enabled");
        self.transport.request_enable().await
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn is_session_active(&self) -> bool {
        self.session_busy.load(Ordering::SeqCst)
    }

    /// Start a new scan. Returns whether discovery was actually initiated.
    pub async fn start_scan(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            warn!("Discovery controller released, returning false for start_scan()");
            return false;
        }
        if self.is_session_active() {
            warn!("A session is running, returning false for start_scan()");
            return false;
        }
        if !self.is_enabled().await {
            warn!("Bluetooth is not enabled or not supported, returning false for start_scan()");
            return false;
        }

        // Held until the new task is stored so concurrent starts cannot
        // orphan a scan.
        let mut slot = self.scan.lock().await;

        // Restarting replaces any scan still in flight.
        if let Some(task) = slot.take() {
            task.stop().await;
        }
        self.found.lock().clear();

        let stream = match self.transport.discover().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Unable to start discovery: {}", e);
                return false;
            }
        };

        self.scanning.store(true, Ordering::SeqCst);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(drain_discovery(
            stream,
            self.found.clone(),
            self.event_tx.clone(),
            self.scanning.clone(),
            cancel_rx,
            self.scan_window,
        ));
        *slot = Some(ScanTask { cancel_tx, handle });

        info!("Bluetooth discovery started");
        true
    }

    /// Cancel any scan in progress. Safe to call at any time and never
    /// waits on the event receiver.
    pub async fn stop_scan(&self) {
        let task = self.scan.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
            self.scanning.store(false, Ordering::SeqCst);
        }
    }

    /// Devices found by the current or last scan, copied out.
    pub fn available_devices(&self) -> Vec<Device> {
        self.found.lock().clone()
    }

    /// Devices already bonded with this host.
    pub async fn list_paired_devices(&self) -> Result<Vec<Device>> {
        self.transport.bonded_devices().await
    }

    /// Whether `device` is in the bonded set. False when the transport is off.
    pub async fn is_paired(&self, device: &Device) -> bool {
        if !self.is_enabled().await {
            warn!("Bluetooth is not enabled, returning false for is_paired()");
            return false;
        }

        match self.transport.bonded_devices().await {
            Ok(bonded) => {
                let paired = bonded.iter().any(|d| d.has_address(&device.address));
                if paired {
                    debug!("{} has already been paired", device);
                }
                paired
            }
            Err(e) => {
                warn!("Unable to list bonded devices: {}", e);
                false
            }
        }
    }

    /// Configured default device address, if any.
    pub fn default_device_address(&self) -> Option<&str> {
        self.default_device.as_deref()
    }

    /// Configured default device, provided it is still bonded.
    pub async fn default_device(&self) -> Option<Device> {
        let address = self.default_device.as_deref()?;
        match self.list_paired_devices().await {
            Ok(bonded) => {
                let device = bonded.into_iter().find(|d| d.has_address(address));
                if device.is_none() {
                    warn!("Default device {} is no longer paired", address);
                }
                device
            }
            Err(e) => {
                warn!("Unable to resolve default device {}: {}", address, e);
                None
            }
        }
    }

    /// Start a session with `device` on its own task.
    ///
    /// Unpaired devices are rejected before the transport is touched.
    pub async fn connect(&self, device: &Device) -> Result<SessionHandle, SessionError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SessionError::Released);
        }
        if !self.is_paired(device).await {
            warn!("{} is not paired, refusing to connect", device);
            return Err(SessionError::NotPaired(device.address.clone()));
        }
        if self
            .session_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("A session is already running, refusing to connect to {}", device);
            return Err(SessionError::Busy);
        }

        let slot = SessionSlot::new(self.session_busy.clone());
        self.stop_scan().await;

        let manager = SessionManager::new(self.transport.clone(), self.session_options.clone())
            .with_slot(slot);
        let (event_tx, events) = mpsc::channel(32);
        let session_device = device.clone();
        let task = tokio::spawn(async move { manager.run(session_device, event_tx).await });

        Ok(SessionHandle {
            device: device.clone(),
            events,
            task,
        })
    }

    /// Tear down discovery subscriptions. Idempotent.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!("Discovery controller was already released");
            return;
        }
        self.stop_scan().await;
        info!("Discovery controller released");
    }
}

/// Forward discovered devices until cancelled, the window elapses, or the
/// transport ends discovery. Emits `SearchStarted` first and exactly one
/// `SearchStopped` last, unless cancelled before anything could be announced.
///
/// Every await races the cancel signal, so a full event channel never keeps
/// the task alive after a stop request.
async fn drain_discovery(
    mut stream: DiscoveryStream,
    found: Arc<Mutex<Vec<Device>>>,
    event_tx: mpsc::Sender<DiscoveryEvent>,
    scanning: Arc<AtomicBool>,
    mut cancel_rx: oneshot::Receiver<()>,
    window: Duration,
) {
    // Started comes first, so a receiver never sees a device before it.
    tokio::select! {
        biased;
        _ = event_tx.send(DiscoveryEvent::SearchStarted) => {}
        _ = &mut cancel_rx => {
            debug!("Discovery cancelled before it was announced");
            scanning.store(false, Ordering::SeqCst);
            return;
        }
    }

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        let device = tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                debug!("Discovery cancelled");
                break;
            }
            _ = &mut deadline => {
                debug!("Discovery window elapsed");
                break;
            }
            next = stream.next() => {
                match next {
                    Some(device) => device,
                    None => {
                        debug!("Transport finished discovery");
                        break;
                    }
                }
            }
        };

        debug!("Discovered {}", device);
        found.lock().push(device.clone());
        let address = device.address.clone();

        tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                debug!("Discovery cancelled while delivering {}", address);
                break;
            }
            _ = event_tx.send(DiscoveryEvent::DeviceFound(device)) => {}
        }
    }

    drop(stream);
    scanning.store(false, Ordering::SeqCst);
    announce_stop(&event_tx);
}

/// Queue `SearchStopped` without blocking. When the receiver is behind, the
/// event is handed to a detached sender so it still arrives after everything
/// already queued.
fn announce_stop(event_tx: &mpsc::Sender<DiscoveryEvent>) {
    match event_tx.try_send(DiscoveryEvent::SearchStopped) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            debug!("Event channel full, delivering SearchStopped in the background");
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let _ = event_tx.send(event).await;
            });
        }
    }
}
