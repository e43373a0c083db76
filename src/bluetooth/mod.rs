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

//! Bluetooth sensor-session core.
//!
//! Discovers nearby readers, connects to a selected one over RFCOMM and
//! extracts a single confirmed line of text.

pub mod bluez;
mod device;
mod discovery;
mod session;
mod transport;

pub use bluez::BluezTransport;
pub use device::Device;
pub use discovery::{DiscoveryController, SessionHandle, DEFAULT_SCAN_WINDOW};
pub use session::{read_confirmed, SessionError, SessionManager, SessionOptions, SessionResult};
pub use transport::{ByteStream, DiscoveryStream, Transport, SPP_UUID};
