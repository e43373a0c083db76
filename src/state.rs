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

//! Observable progress of the discovery/session flow.

use parking_lot::RwLock;
use std::sync::Arc;

/// Where the flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Scanning,
    Connected,
    Reading,
    Confirming,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Scanning => "Scanning...",
            SessionStatus::Connected => "Connected",
            SessionStatus::Reading => "Waiting for scan",
            SessionStatus::Confirming => "Scan again to confirm",
            SessionStatus::Closed => "Closed",
            SessionStatus::Error => "Error",
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Current status.
    pub status: RwLock<SessionStatus>,

    /// Name of the device in session.
    pub connected_device: RwLock<Option<String>>,

    /// Last confirmed reading.
    pub last_reading: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            status: RwLock::new(SessionStatus::Idle),
            connected_device: RwLock::new(None),
            last_reading: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub fn set_connected(&self, device_name: String) {
        *self.status.write() = SessionStatus::Connected;
        *self.connected_device.write() = Some(device_name);
    }

    pub fn set_disconnected(&self) {
        let mut status = self.status.write();
        if *status != SessionStatus::Error {
            *status = SessionStatus::Closed;
        }
        *self.connected_device.write() = None;
    }

    pub fn set_error(&self) {
        *self.status.write() = SessionStatus::Error;
    }

    pub fn get_status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn set_last_reading(&self, reading: String) {
        *self.last_reading.write() = Some(reading);
    }

    pub fn get_last_reading(&self) -> Option<String> {
        self.last_reading.read().clone()
    }
}
