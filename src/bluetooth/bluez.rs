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

//! BlueZ-backed transport.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Profile, ReqError, Role};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::Device;
use super::transport::{ByteStream, DiscoveryStream, Transport, SPP_UUID};

/// Transport talking to the default BlueZ adapter over D-Bus.
pub struct BluezTransport {
    session: Session,
    adapter: Option<Adapter>,
    connect_timeout: Duration,
}

impl BluezTransport {
    /// Connect to BlueZ. A missing adapter is not an error; the transport
    /// then reports itself as unsupported.
    pub async fn new(connect_timeout: Duration) -> Result<Self> {
        info!("Initializing Bluetooth transport...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = match session.default_adapter().await {
            Ok(adapter) => {
                info!("Using Bluetooth adapter: {}", adapter.name());
                Some(adapter)
            }
            Err(e) => {
                warn!("No Bluetooth adapter available: {}", e);
                None
            }
        };

        Ok(Self {
            session,
            adapter,
            connect_timeout,
        })
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .as_ref()
            .ok_or_else(|| anyhow!("No Bluetooth adapter available"))
    }

    fn parse_address(device: &Device) -> Result<Address> {
        device
            .address
            .parse()
            .with_context(|| format!("Invalid Bluetooth address '{}'", device.address))
    }

    async fn describe(adapter: &Adapter, address: Address) -> Result<Device> {
        let device = adapter.device(address)?;
        let name = device.alias().await.ok();
        let paired = device.is_paired().await.unwrap_or(false);
        Ok(Device::new(address.to_string(), name, paired))
    }

    async fn accept_stream(&self, address: Address, service: Uuid) -> Result<bluer::rfcomm::Stream> {
        let adapter = self.adapter()?;

        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await?;
        debug!("Registered client profile {}", service);

        let device = adapter.device(address)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }

        let connect = device.connect_profile(&service);
        tokio::pin!(connect);
        let mut connect_done = false;

        loop {
            tokio::select! {
                res = &mut connect, if !connect_done => {
                    connect_done = true;
                    res.with_context(|| format!("Unable to connect profile {}", service))?;
                }
                req = handle.next() => {
                    let req = req.ok_or_else(|| anyhow!("Profile closed without a connect request"))?;
                    if req.device() != address {
                        debug!("Ignoring connect request from {}", req.device());
                        req.reject(ReqError::Rejected);
                        continue;
                    }
                    return Ok(req.accept()?);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for BluezTransport {
    fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    async fn is_enabled(&self) -> bool {
        match &self.adapter {
            Some(adapter) => adapter.is_powered().await.unwrap_or(false),
            None => false,
        }
    }

    async fn request_enable(&self) -> Result<bool> {
        let adapter = self.adapter()?;
        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }
        Ok(adapter.is_powered().await?)
    }

    async fn discover(&self) -> Result<DiscoveryStream> {
        let adapter = self.adapter()?.clone();
        let events = adapter.discover_devices().await?;

        let devices = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    AdapterEvent::DeviceAdded(address) => match Self::describe(&adapter, address).await {
                        Ok(device) => Some(device),
                        Err(e) => {
                            warn!("Unable to read properties of {}: {}", address, e);
                            None
                        }
                    },
                    _ => None,
                }
            }
        });

        Ok(devices.boxed())
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>> {
        let adapter = self.adapter()?;
        let mut devices = Vec::new();

        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.ok();
                devices.push(Device::new(addr.to_string(), name, true));
            }
        }

        Ok(devices)
    }

    async fn service_uuids(&self, device: &Device) -> Result<Vec<Uuid>> {
        let adapter = self.adapter()?;
        let remote = adapter.device(Self::parse_address(device)?)?;

        let mut uuids: Vec<Uuid> = remote.uuids().await?.unwrap_or_default().into_iter().collect();
        uuids.sort();
        if let Some(pos) = uuids.iter().position(|u| *u == SPP_UUID) {
            let spp = uuids.remove(pos);
            uuids.insert(0, spp);
        }

        debug!("{} advertises {} services", device, uuids.len());
        Ok(uuids)
    }

    async fn open_stream(&self, device: &Device, service: Uuid) -> Result<Box<dyn ByteStream>> {
        let address = Self::parse_address(device)?;
        info!("Connecting to {} on service {}", device, service);

        let stream = tokio::time::timeout(self.connect_timeout, self.accept_stream(address, service))
            .await
            .map_err(|_| anyhow!("Timed out connecting to {}", device))??;

        Ok(Box::new(stream))
    }
}
