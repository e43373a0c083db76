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

//! Remote device descriptor.

use serde::Serialize;
use std::fmt;

/// A remote Bluetooth device as seen by the transport.
///
/// The core only holds these for the lifetime of a scan or a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Hardware address, e.g. `00:11:22:33:44:55`.
    pub address: String,
    /// Human readable name. Falls back to the address when the device has none.
    pub name: String,
    /// Whether the device is bonded with this host.
    pub paired: bool,
}

impl Device {
    pub fn new(address: impl Into<String>, name: Option<String>, paired: bool) -> Self {
        let address = address.into();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address.clone());
        Self {
            address,
            name,
            paired,
        }
    }

    /// Compare addresses case-insensitively.
    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address.trim())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_falls_back_to_address() {
        let device = Device::new("00:11:22:33:44:55", None, false);
        assert_eq!(device.name, "00:11:22:33:44:55");

        let device = Device::new("00:11:22:33:44:55", Some("  ".to_string()), false);
        assert_eq!(device.name, "00:11:22:33:44:55");
    }

    #[test]
    fn test_address_match_ignores_case() {
        let device = Device::new("AA:BB:CC:DD:EE:FF", Some("RS320".to_string()), true);
        assert!(device.has_address("aa:bb:cc:dd:ee:ff"));
        assert!(!device.has_address("aa:bb:cc:dd:ee:00"));
        assert_eq!(device.to_string(), "RS320 [AA:BB:CC:DD:EE:FF]");
    }
}
