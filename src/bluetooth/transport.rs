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

//! Transport capability consumed by the discovery controller and the session manager.
//!
//! The production implementation lives in [`super::bluez`]. Tests inject an
//! in-memory double.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::device::Device;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Bidirectional byte stream to a remote device.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Devices reported by one discovery run. The stream ends when the transport
/// stops discovering on its own; dropping it cancels discovery.
pub type DiscoveryStream = BoxStream<'static, Device>;

/// Connect-and-stream primitives provided by the host platform.
///
/// Pairing and bonding are assumed to be handled outside of this crate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the local hardware exists at all.
    fn is_supported(&self) -> bool;

    /// Whether the radio is currently powered.
    async fn is_enabled(&self) -> bool;

    /// Ask the host to enable the radio. Resolves to the final powered state.
    async fn request_enable(&self) -> Result<bool>;

    /// Begin discovery.
    async fn discover(&self) -> Result<DiscoveryStream>;

    /// Devices already bonded with this host.
    async fn bonded_devices(&self) -> Result<Vec<Device>>;

    /// Service identifiers advertised by the device, preferred first.
    async fn service_uuids(&self, device: &Device) -> Result<Vec<Uuid>>;

    /// Open a connection-oriented stream. Blocks until connected or failed.
    async fn open_stream(&self, device: &Device, service: Uuid) -> Result<Box<dyn ByteStream>>;
}
