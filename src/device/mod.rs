//! Sensor device and stream ownership.
//!
//! The vendor driver sits behind [`DeviceProvider`], [`SensorDevice`] and
//! [`SensorStream`]. [`DeviceSession`] owns one opened device and its two
//! started streams, and releases them in reverse acquisition order (color
//! stream, depth stream, device) whenever it goes out of scope.

pub mod replay;
pub mod synthetic;

use crossbeam_channel::Receiver;

use crate::config::GrabberConfig;
use crate::error::{GrabberError, Result};
use crate::types::{Frame, PixelFormat, Size, StreamKind, VideoMode};

pub use replay::ReplayProvider;
pub use synthetic::{SyntheticConfig, SyntheticProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub product_id: u16,
    pub vendor_id: u16,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

pub trait DeviceProvider {
    fn enumerate(&self) -> Vec<DeviceInfo>;
    fn open(&self, uri: &str) -> Result<Box<dyn SensorDevice>>;
}

pub trait SensorDevice: Send {
    fn info(&self) -> &DeviceInfo;
    fn state(&self) -> ConnectionState;
    /// `Ok(None)` when the device has no sensor of this kind.
    fn create_stream(&mut self, kind: StreamKind) -> Result<Option<Box<dyn SensorStream>>>;
    fn close(&mut self);
}

pub trait SensorStream: Send {
    fn kind(&self) -> StreamKind;
    fn supported_modes(&self) -> Vec<VideoMode>;
    fn mode(&self) -> Option<VideoMode>;
    fn set_mode(&mut self, mode: VideoMode) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_started(&self) -> bool;
    /// Returns the most recent frame.
    fn read_frame(&mut self) -> Result<Frame>;
    /// Yields a token whenever a new frame can be read. Holds at most one token.
    fn ready(&self) -> &Receiver<()>;
}

/// The depth and color streams of one device.
pub struct StreamPair {
    depth: Box<dyn SensorStream>,
    color: Box<dyn SensorStream>,
}

impl StreamPair {
    pub fn new(depth: Box<dyn SensorStream>, color: Box<dyn SensorStream>) -> StreamPair {
        StreamPair { depth, color }
    }

    pub fn stream(&self, kind: StreamKind) -> &dyn SensorStream {
        match kind {
            StreamKind::Depth => self.depth.as_ref(),
            StreamKind::Color => self.color.as_ref(),
        }
    }

    pub fn stream_mut(&mut self, kind: StreamKind) -> &mut dyn SensorStream {
        match kind {
            StreamKind::Depth => self.depth.as_mut(),
            StreamKind::Color => self.color.as_mut(),
        }
    }

    /// Stops the color stream, then the depth stream. Idempotent.
    pub fn stop(&mut self) {
        for stream in [&mut self.color, &mut self.depth] {
            if stream.is_started() {
                stream.stop();
                log::info!("{} stream stopped", stream.kind());
            }
        }
    }
}

impl Drop for StreamPair {
    fn drop(&mut self) {
        self.stop();
    }
}

/// An opened device with both streams started.
pub struct DeviceSession {
    streams: StreamPair,
    device: Box<dyn SensorDevice>,
}

impl DeviceSession {
    /// Enumerates devices, opens the one matching `config.device_uri`, then
    /// creates, configures and starts the depth and color streams.
    pub fn open(provider: &dyn DeviceProvider, config: &GrabberConfig) -> Result<DeviceSession> {
        let devices = provider.enumerate();
        log::info!("There are {} devices on this system.", devices.len());
        for (i, d) in devices.iter().enumerate() {
            log::info!(
                "Device {i}: {} by {}, PID: {}, VID: {}, URI: {}",
                d.name,
                d.vendor,
                d.product_id,
                d.vendor_id,
                d.uri
            );
        }
        let info = devices
            .iter()
            .find(|d| {
                config
                    .device_uri
                    .as_deref()
                    .is_none_or(|filter| d.uri.contains(filter))
            })
            .ok_or_else(|| {
                GrabberError::Device(match &config.device_uri {
                    Some(filter) => format!("no device matching {filter}"),
                    None => "no device found".to_string(),
                })
            })?;

        let mut device = provider.open(&info.uri)?;
        log::info!("opened {}", info.uri);
        let streams = match Self::open_streams(device.as_mut(), config) {
            Ok(streams) => streams,
            Err(e) => {
                device.close();
                return Err(e);
            }
        };
        Ok(DeviceSession { streams, device })
    }

    fn open_streams(device: &mut dyn SensorDevice, config: &GrabberConfig) -> Result<StreamPair> {
        let depth = open_stream(device, StreamKind::Depth, |m| {
            m.pixel_format == PixelFormat::Depth1Mm && m.size() == config.depth_size
        })?;
        let color = match open_stream(device, StreamKind::Color, |m| {
            m.size() == config.color_size
        }) {
            Ok(color) => color,
            Err(e) => {
                let mut depth = depth;
                depth.stop();
                return Err(e);
            }
        };
        Ok(StreamPair::new(depth, color))
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn streams(&self) -> &StreamPair {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut StreamPair {
        &mut self.streams
    }

    /// Releases streams, then the device. Also runs on drop.
    pub fn close(&mut self) {
        self.streams.stop();
        if self.device.state() == ConnectionState::Open {
            self.device.close();
            log::info!("device {} closed", self.device.info().uri);
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_stream(
    device: &mut dyn SensorDevice,
    kind: StreamKind,
    wanted: impl Fn(&VideoMode) -> bool,
) -> Result<Box<dyn SensorStream>> {
    let mut stream = device
        .create_stream(kind)?
        .ok_or(GrabberError::StreamUnavailable(kind))?;

    let modes = stream.supported_modes();
    for (i, m) in modes.iter().enumerate() {
        log::info!("{kind} mode {i}: {m}");
    }
    match modes.iter().find(|m| wanted(m)) {
        Some(mode) => stream.set_mode(*mode)?,
        None => log::warn!(
            "no matching {kind} mode, keeping {:?}",
            stream.mode().map(|m| m.to_string())
        ),
    }

    stream.start()?;
    log::info!("{kind} stream started");
    Ok(stream)
}

/// Selects the `wanted` size among `modes`, falling back to the first one.
pub(crate) fn default_mode(modes: &[VideoMode], wanted: Size) -> Option<VideoMode> {
    modes
        .iter()
        .find(|m| m.size() == wanted)
        .or_else(|| modes.first())
        .copied()
}
