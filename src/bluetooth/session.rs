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

//! Session manager: connect to one device and extract one confirmed line.
//!
//! Some readers (observed on the Allflex RS320-3-60 stick reader) replay a
//! cached tag before the current one. A reading is therefore only accepted
//! once two consecutive lines are identical.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::device::Device;
use super::transport::{ByteStream, Transport};
use crate::events::SessionEvent;

/// Why a session did not produce a reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("device {0} is not paired with this host")]
    NotPaired(String),
    #[error("another session is already running")]
    Busy,
    #[error("discovery controller has been released")]
    Released,
    #[error("device {0} advertises no services")]
    NoService(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("stream closed before a reading was confirmed")]
    Closed,
    #[error("device confirmed an empty reading")]
    Empty,
    #[error("no two consecutive readings matched after {0} attempts")]
    Unconfirmed(u32),
    #[error("session task aborted: {0}")]
    Aborted(String),
}

/// Result of one session: the confirmed line or the reason there is none.
pub type SessionResult = std::result::Result<String, SessionError>;

/// Tunables for the confirmation-read loop.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Upper bound on candidate/confirmation pairs. `None` keeps reading
    /// until the device sends a matching pair or closes the stream.
    pub max_read_pairs: Option<u32>,
}

/// Occupancy of the controller's single session slot. The slot is freed
/// when this is dropped.
pub(crate) struct SessionSlot(Arc<AtomicBool>);

impl SessionSlot {
    pub(crate) fn new(busy: Arc<AtomicBool>) -> Self {
        Self(busy)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives a single device from "selected" to "one confirmed line".
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    slot: Mutex<Option<SessionSlot>>,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(transport: Arc<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            transport,
            options,
            slot: Mutex::new(None),
        }
    }

    /// Hold `slot` until the session's terminal event is about to be sent.
    pub(crate) fn with_slot(self, slot: SessionSlot) -> Self {
        *self.slot.lock() = Some(slot);
        self
    }

    /// Listeners reacting to the terminal event must find the slot free.
    fn free_slot(&self) {
        self.slot.lock().take();
    }

    /// Run the whole session. The stream is always closed before returning.
    ///
    /// Callers are expected to have checked pairing and stopped discovery.
    pub async fn run(&self, device: Device, event_tx: mpsc::Sender<SessionEvent>) -> SessionResult {
        info!("Starting session with {}", device);

        let stream = match self.connect(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Unable to connect to {}: {}", device, e);
                self.free_slot();
                let _ = event_tx
                    .send(SessionEvent::Failed {
                        device,
                        error: e.clone(),
                    })
                    .await;
                return Err(e);
            }
        };

        let _ = event_tx.send(SessionEvent::Connected(device.clone())).await;
        let _ = event_tx.send(SessionEvent::SocketOpened(device.clone())).await;

        let mut reader = BufReader::new(stream);
        let result = read_confirmed(
            &mut reader,
            self.options.max_read_pairs,
            &device,
            &event_tx,
        )
        .await;

        match &result {
            Ok(payload) => {
                info!("Confirmed reading from {}: {}", device, payload);
                let _ = event_tx
                    .send(SessionEvent::ActualMessageGotten {
                        device: device.clone(),
                        payload: Some(payload.clone()),
                    })
                    .await;
            }
            Err(e) => {
                warn!("No reading from {}: {}", device, e);
                let _ = event_tx
                    .send(SessionEvent::Failed {
                        device: device.clone(),
                        error: e.clone(),
                    })
                    .await;
                let _ = event_tx
                    .send(SessionEvent::ActualMessageGotten {
                        device: device.clone(),
                        payload: None,
                    })
                    .await;
            }
        }

        close_stream(reader.into_inner(), &device).await;
        self.free_slot();
        let _ = event_tx.send(SessionEvent::SocketClosed(device)).await;

        result
    }

    /// Resolve the service and open the stream.
    async fn connect(&self, device: &Device) -> Result<Box<dyn ByteStream>, SessionError> {
        let services = self
            .transport
            .service_uuids(device)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let service = *services
            .first()
            .ok_or_else(|| SessionError::NoService(device.address.clone()))?;
        debug!("Using service {} for {}", service, device);

        self.transport
            .open_stream(device, service)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))
    }
}

/// Read lines until two consecutive ones match.
///
/// A mismatched confirmation becomes the next candidate, so a single stale
/// line costs one extra read. I/O errors and end of stream are terminal;
/// only a mismatch retries.
pub async fn read_confirmed<R>(
    reader: &mut R,
    max_read_pairs: Option<u32>,
    device: &Device,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> SessionResult
where
    R: AsyncBufRead + Unpin,
{
    let mut attempts = 0u32;
    let mut lines = LineReader::new(reader);
    let mut candidate = lines.next_line().await?;

    loop {
        if let Some(max) = max_read_pairs {
            if attempts >= max {
                return Err(SessionError::Unconfirmed(attempts));
            }
        }
        attempts += 1;

        debug!("Candidate line: {}", candidate);
        let _ = event_tx
            .send(SessionEvent::FirstMessageGotten(device.clone()))
            .await;

        let confirmation = lines.next_line().await?;
        debug!("Confirmation line: {}", confirmation);

        if candidate == confirmation {
            if confirmation.trim().is_empty() {
                return Err(SessionError::Empty);
            }
            return Ok(confirmation);
        }

        debug!("Lines differ, reading another pair (attempt {})", attempts);
        candidate = confirmation;
    }
}

/// Splits a byte stream into lines ended by `\n`, `\r` or `\r\n`.
///
/// Readers that end each tag with a bare carriage return are common, so a
/// `\r` ends the line at once and a `\n` directly after it is skipped on the
/// next read rather than waited for.
struct LineReader<'a, R> {
    reader: &'a mut R,
    skip_lf: bool,
}

impl<'a, R> LineReader<'a, R>
where
    R: AsyncBufRead + Unpin,
{
    fn new(reader: &'a mut R) -> Self {
        Self {
            reader,
            skip_lf: false,
        }
    }

    /// Next line without its terminator. A final unterminated line is still
    /// returned; end of stream with nothing buffered is `Closed`.
    async fn next_line(&mut self) -> SessionResult {
        let mut line = Vec::new();

        loop {
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| SessionError::Read(e.to_string()))?;

            if buf.is_empty() {
                if line.is_empty() {
                    return Err(SessionError::Closed);
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let mut start = 0;
            if self.skip_lf {
                self.skip_lf = false;
                if buf[0] == b'\n' {
                    start = 1;
                }
            }

            match buf[start..].iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    let end = start + pos;
                    line.extend_from_slice(&buf[start..end]);
                    self.skip_lf = buf[end] == b'\r';
                    self.reader.consume(end + 1);
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                None => {
                    line.extend_from_slice(&buf[start..]);
                    let used = buf.len();
                    self.reader.consume(used);
                }
            }
        }
    }
}

async fn close_stream(mut stream: Box<dyn ByteStream>, device: &Device) {
    match stream.shutdown().await {
        Ok(()) => info!("Socket with {} closed", device),
        Err(e) => warn!("Failed to close socket with {}: {}", device, e),
    }
}
