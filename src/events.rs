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

//! Listener contracts and event processing.
//!
//! Discovery and session progress are delivered as messages over
//! `tokio::sync::mpsc` channels. Events may be produced on any runtime
//! thread; consumers that own thread-bound state must marshal them themselves.

use std::sync::Arc;
use tracing::{info, warn};

use crate::bluetooth::{Device, SessionError};
use crate::normalize::Normalizer;
use crate::request::{CallerRequest, CallerResult, CancelReason};
use crate::state::{AppState, SessionStatus};

/// Events emitted by the discovery controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A new scan started. The result set is empty at this point.
    SearchStarted,
    /// A device was reported. It has already been appended to the result set.
    DeviceFound(Device),
    /// The scan ended, either on request or because the window elapsed.
    SearchStopped,
}

/// Events emitted while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established.
    Connected(Device),
    /// Byte stream ready for reading.
    SocketOpened(Device),
    /// A candidate line was read; the reader should scan again to confirm it.
    FirstMessageGotten(Device),
    /// Confirmation finished. `payload` is `None` if no usable text was read.
    ActualMessageGotten {
        device: Device,
        payload: Option<String>,
    },
    /// Socket closed.
    SocketClosed(Device),
    /// Connect or read failure.
    Failed { device: Device, error: SessionError },
}

/// Turns controller events into status updates and a caller result.
pub struct EventProcessor {
    request: CallerRequest,
    normalizer: Normalizer,
    state: Arc<AppState>,
    result: Option<CallerResult>,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(request: CallerRequest, normalizer: Normalizer, state: Arc<AppState>) -> Self {
        Self {
            request,
            normalizer,
            state,
            result: None,
        }
    }

    /// Process a discovery event.
    pub fn process_discovery_event(&mut self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::SearchStarted => {
                info!("Search for bluetooth devices started");
                self.state.set_status(SessionStatus::Scanning);
            }
            DiscoveryEvent::DeviceFound(device) => {
                info!("Device found: {}", device);
            }
            DiscoveryEvent::SearchStopped => {
                info!("Search for bluetooth devices stopped");
                if self.state.get_status() == SessionStatus::Scanning {
                    self.state.set_status(SessionStatus::Idle);
                }
            }
        }
    }

    /// Process a session event.
    pub fn process_session_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected(device) => {
                info!("Connected to {}", device.name);
                self.state.set_connected(device.name.clone());
            }
            SessionEvent::SocketOpened(device) => {
                info!("Socket initialised for {}", device.name);
                self.state.set_status(SessionStatus::Reading);
            }
            SessionEvent::FirstMessageGotten(_) => {
                info!("Reading received, scan the tag again to confirm");
                self.state.set_status(SessionStatus::Confirming);
            }
            SessionEvent::ActualMessageGotten { device, payload } => {
                match payload {
                    Some(message) => {
                        info!("Message from {} is {}", device.name, message);
                        self.state.set_last_reading(message.clone());
                    }
                    None => warn!("Message from {} is null", device.name),
                }
                self.result = Some(
                    self.request
                        .resolve(&self.normalizer, payload.as_deref()),
                );
            }
            SessionEvent::SocketClosed(device) => {
                info!("Closed socket with {}", device.name);
                self.state.set_disconnected();
            }
            SessionEvent::Failed { device, error } => {
                warn!("Session with {} failed: {}", device.name, error);
                self.state.set_error();
            }
        }
    }

    /// Result resolved so far, if the session delivered its final message.
    pub fn result(&self) -> Option<&CallerResult> {
        self.result.as_ref()
    }

    /// Final caller result. Cancelled when no message was ever delivered.
    pub fn finish(self) -> CallerResult {
        self.result
            .unwrap_or(CallerResult::Cancelled(CancelReason::NoReading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RfidWindow;

    fn device() -> Device {
        Device::new("00:11:22:33:44:55", Some("RS320".to_string()), true)
    }

    #[test]
    fn test_confirmed_reading_resolves_value() {
        let state = AppState::new();
        let request = CallerRequest::new(Some("bluetooth"), Some("rfid"));
        let mut processor =
            EventProcessor::new(request, Normalizer::new(RfidWindow::First), state.clone());

        processor.process_session_event(&SessionEvent::Connected(device()));
        assert_eq!(state.get_status(), SessionStatus::Connected);
        assert_eq!(state.get_device_name().as_deref(), Some("RS320"));

        processor.process_session_event(&SessionEvent::ActualMessageGotten {
            device: device(),
            payload: Some("12 345 678901234X".to_string()),
        });
        processor.process_session_event(&SessionEvent::SocketClosed(device()));

        assert_eq!(state.get_status(), SessionStatus::Closed);
        assert_eq!(state.get_device_name(), None);
        assert_eq!(state.get_last_reading().as_deref(), Some("12 345 678901234X"));
        assert_eq!(
            processor.finish(),
            CallerResult::Value("12345678901234X".to_string())
        );
    }

    #[test]
    fn test_missing_message_cancels() {
        let state = AppState::new();
        let request = CallerRequest::new(Some("bluetooth"), Some("rfid"));
        let mut processor =
            EventProcessor::new(request, Normalizer::default(), state.clone());

        processor.process_session_event(&SessionEvent::Failed {
            device: device(),
            error: SessionError::Closed,
        });
        assert_eq!(state.get_status(), SessionStatus::Error);
        assert!(processor.result().is_none());
        assert_eq!(
            processor.finish(),
            CallerResult::Cancelled(CancelReason::NoReading)
        );
    }

    #[test]
    fn test_search_events_toggle_scanning() {
        let state = AppState::new();
        let mut processor = EventProcessor::new(
            CallerRequest::default(),
            Normalizer::default(),
            state.clone(),
        );

        processor.process_discovery_event(&DiscoveryEvent::SearchStarted);
        assert_eq!(state.get_status(), SessionStatus::Scanning);
        processor.process_discovery_event(&DiscoveryEvent::SearchStopped);
        assert_eq!(state.get_status(), SessionStatus::Idle);
    }
}
