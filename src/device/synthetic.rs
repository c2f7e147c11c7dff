//! A device that needs no hardware: constant depth and color frames paced
//! by producer threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use super::{ConnectionState, DeviceInfo, DeviceProvider, SensorDevice, SensorStream, default_mode};
use crate::error::{GrabberError, Result};
use crate::types::{Frame, PixelFormat, Size, StreamKind, VideoMode};

pub const SYNTHETIC_URI: &str = "synthetic://0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub depth_size: Size,
    pub color_size: Size,
    pub depth_fps: u32,
    pub color_fps: u32,
    /// Millimetres.
    pub depth_value: u16,
    pub color_value: [u8; 3],
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            depth_size: Size::new(512, 424),
            color_size: Size::new(1920, 1080),
            depth_fps: 30,
            color_fps: 30,
            depth_value: 1000,
            color_value: [255, 255, 255],
        }
    }
}

pub struct SyntheticProvider {
    config: SyntheticConfig,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> SyntheticProvider {
        SyntheticProvider { config }
    }
}

impl DeviceProvider for SyntheticProvider {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            name: "Synthetic RGB-D".to_string(),
            vendor: "rgbd-grabber".to_string(),
            product_id: 0,
            vendor_id: 0,
            uri: SYNTHETIC_URI.to_string(),
        }]
    }

    fn open(&self, uri: &str) -> Result<Box<dyn SensorDevice>> {
        let info = self
            .enumerate()
            .into_iter()
            .find(|d| d.uri == uri)
            .ok_or_else(|| GrabberError::Device(format!("unknown uri {uri}")))?;
        Ok(Box::new(SyntheticDevice {
            info,
            state: ConnectionState::Open,
            config: self.config.clone(),
        }))
    }
}

struct SyntheticDevice {
    info: DeviceInfo,
    state: ConnectionState,
    config: SyntheticConfig,
}

impl SensorDevice for SyntheticDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn create_stream(&mut self, kind: StreamKind) -> Result<Option<Box<dyn SensorStream>>> {
        if self.state != ConnectionState::Open {
            return Err(GrabberError::Device("device is closed".to_string()));
        }
        let c = &self.config;
        let modes = match kind {
            StreamKind::Depth => vec![
                VideoMode {
                    resolution_x: 640,
                    resolution_y: 480,
                    fps: c.depth_fps,
                    pixel_format: PixelFormat::Depth100Um,
                },
                VideoMode {
                    resolution_x: c.depth_size.width,
                    resolution_y: c.depth_size.height,
                    fps: c.depth_fps,
                    pixel_format: PixelFormat::Depth1Mm,
                },
            ],
            StreamKind::Color => vec![VideoMode {
                resolution_x: c.color_size.width,
                resolution_y: c.color_size.height,
                fps: c.color_fps,
                pixel_format: PixelFormat::Rgb888,
            }],
        };
        let wanted = match kind {
            StreamKind::Depth => c.depth_size,
            StreamKind::Color => c.color_size,
        };
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        Ok(Some(Box::new(SyntheticStream {
            kind,
            mode: default_mode(&modes, wanted),
            modes,
            depth_value: c.depth_value,
            color_value: c.color_value,
            seq: 0,
            running: Arc::new(AtomicBool::new(false)),
            producer: None,
            ready_tx,
            ready_rx,
        })))
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

struct SyntheticStream {
    kind: StreamKind,
    modes: Vec<VideoMode>,
    mode: Option<VideoMode>,
    depth_value: u16,
    color_value: [u8; 3],
    seq: u64,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
}

impl SensorStream for SyntheticStream {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn supported_modes(&self) -> Vec<VideoMode> {
        self.modes.clone()
    }

    fn mode(&self) -> Option<VideoMode> {
        self.mode
    }

    fn set_mode(&mut self, mode: VideoMode) -> Result<()> {
        if self.is_started() {
            return Err(GrabberError::stream(self.kind, "can't change mode while started"));
        }
        if !self.modes.contains(&mode) {
            return Err(GrabberError::stream(self.kind, format!("unsupported mode {mode}")));
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        let mode = self
            .mode
            .ok_or_else(|| GrabberError::stream(self.kind, "no video mode"))?;
        let period = Duration::from_secs_f64(1.0 / mode.fps.max(1) as f64);
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let ready_tx = self.ready_tx.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-producer", self.kind))
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    // a full channel already signals an unread frame
                    let _ = ready_tx.try_send(());
                }
            })?;
        self.producer = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("{} producer panicked", self.kind);
            }
        }
    }

    fn is_started(&self) -> bool {
        self.producer.is_some()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mode = self
            .mode
            .ok_or_else(|| GrabberError::stream(self.kind, "no video mode"))?;
        let (w, h) = (mode.resolution_x, mode.resolution_y);
        let pixels = mode.size().area();
        self.seq += 1;
        match mode.pixel_format {
            PixelFormat::Depth1Mm => Frame::depth(w, h, self.seq, vec![self.depth_value; pixels]),
            PixelFormat::Depth100Um => Frame::new(
                StreamKind::Depth,
                w,
                h,
                PixelFormat::Depth100Um,
                self.seq,
                crate::types::PixelBuffer::Depth(vec![
                    self.depth_value.saturating_mul(10);
                    pixels
                ]),
            ),
            PixelFormat::Rgb888 => {
                let data = self
                    .color_value
                    .iter()
                    .copied()
                    .cycle()
                    .take(pixels * 3)
                    .collect();
                Frame::rgb(w, h, self.seq, data)
            }
        }
    }

    fn ready(&self) -> &Receiver<()> {
        &self.ready_rx
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
