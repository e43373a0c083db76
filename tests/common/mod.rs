//! In-memory transport double for driving the core without a radio.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use uuid::Uuid;

use odk_sensors::bluetooth::{ByteStream, Device, DiscoveryStream, Transport, SPP_UUID};

/// What the next opened stream does.
pub enum Feed {
    /// Yield these bytes, then end of stream.
    Script(String),
    /// Fail on the first read.
    ReadError,
    /// Yield these bytes, then fail to shut down.
    CloseError(String),
    /// Stay open until `MockTransport::hang_up` is called.
    Hold,
}

/// Scripted stream backing `Feed`.
pub struct ScriptedStream {
    data: io::Cursor<Vec<u8>>,
    read_error: bool,
    shutdown_error: bool,
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_error {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by reader",
            )));
        }
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.shutdown_error {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "socket already gone")))
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

/// Transport double. Every field can be adjusted before or during a test.
pub struct MockTransport {
    pub supported: bool,
    pub enabled: AtomicBool,
    pub bonded: Mutex<Vec<Device>>,
    /// Devices reported by the next `discover` call.
    pub discovery: Mutex<Vec<Device>>,
    /// Keep the discovery stream open after the scripted devices.
    pub hold_discovery: AtomicBool,
    pub services: Mutex<Vec<Uuid>>,
    pub feeds: Mutex<VecDeque<Feed>>,
    pub fail_connect: AtomicBool,
    pub discover_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    held: Mutex<Vec<DuplexStream>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            supported: true,
            enabled: AtomicBool::new(true),
            bonded: Mutex::new(Vec::new()),
            discovery: Mutex::new(Vec::new()),
            hold_discovery: AtomicBool::new(false),
            services: Mutex::new(vec![SPP_UUID]),
            feeds: Mutex::new(VecDeque::new()),
            fail_connect: AtomicBool::new(false),
            discover_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn with_bonded(self, devices: Vec<Device>) -> Self {
        *self.bonded.lock() = devices;
        self
    }

    pub fn push_feed(&self, feed: Feed) {
        self.feeds.lock().push_back(feed);
    }

    pub fn set_discovery(&self, devices: Vec<Device>, hold_open: bool) {
        *self.discovery.lock() = devices;
        self.hold_discovery.store(hold_open, Ordering::SeqCst);
    }

    /// Close every held stream, which ends the sessions reading them.
    pub fn hang_up(&self) {
        self.held.lock().clear();
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> Result<bool> {
        self.enabled.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn discover(&self) -> Result<DiscoveryStream> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let devices = self.discovery.lock().clone();
        let found = futures::stream::iter(devices);
        if self.hold_discovery.load(Ordering::SeqCst) {
            Ok(found.chain(futures::stream::pending()).boxed())
        } else {
            Ok(found.boxed())
        }
    }

    async fn bonded_devices(&self) -> Result<Vec<Device>> {
        Ok(self.bonded.lock().clone())
    }

    async fn service_uuids(&self, _device: &Device) -> Result<Vec<Uuid>> {
        Ok(self.services.lock().clone())
    }

    async fn open_stream(&self, device: &Device, _service: Uuid) -> Result<Box<dyn ByteStream>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("Connection refused by {}", device.address));
        }

        let feed = self
            .feeds
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("No feed scripted for {}", device.address))?;

        let stream: Box<dyn ByteStream> = match feed {
            Feed::Script(script) => Box::new(ScriptedStream {
                data: io::Cursor::new(script.into_bytes()),
                read_error: false,
                shutdown_error: false,
            }),
            Feed::ReadError => Box::new(ScriptedStream {
                data: io::Cursor::new(Vec::new()),
                read_error: true,
                shutdown_error: false,
            }),
            Feed::CloseError(script) => Box::new(ScriptedStream {
                data: io::Cursor::new(script.into_bytes()),
                read_error: false,
                shutdown_error: true,
            }),
            Feed::Hold => {
                let (client, server) = tokio::io::duplex(1024);
                self.held.lock().push(server);
                Box::new(client)
            }
        };
        Ok(stream)
    }
}

pub fn reader(address: &str, paired: bool) -> Device {
    Device::new(address, Some(format!("Reader {}", address)), paired)
}

/// Receive the next event or fail the test after a second.
pub async fn next<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Drain everything currently buffered.
pub fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
