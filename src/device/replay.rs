//! Plays back a recorded session from disk.
//!
//! Layout: `<root>/depth/*.png` (16-bit grayscale, millimetres) and
//! `<root>/color/*.png` (8-bit RGB). Frames are replayed in file name order,
//! every frame is delivered, and a stream's readiness channel disconnects
//! after its last frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError};
use glob::glob;
use indicatif::ProgressBar;

use super::{ConnectionState, DeviceInfo, DeviceProvider, SensorDevice, SensorStream};
use crate::error::{GrabberError, Result};
use crate::types::{Frame, PixelFormat, StreamKind, VideoMode};

pub const REPLAY_SCHEME: &str = "replay://";

pub struct ReplayProvider {
    root: PathBuf,
    fps: u32,
}

impl ReplayProvider {
    pub fn new(root: impl Into<PathBuf>, fps: u32) -> ReplayProvider {
        ReplayProvider {
            root: root.into(),
            fps,
        }
    }

    fn uri(&self) -> String {
        format!("{}{}", REPLAY_SCHEME, self.root.display())
    }
}

impl DeviceProvider for ReplayProvider {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        if !self.root.is_dir() {
            return Vec::new();
        }
        vec![DeviceInfo {
            name: "Recorded RGB-D session".to_string(),
            vendor: "rgbd-grabber".to_string(),
            product_id: 0,
            vendor_id: 0,
            uri: self.uri(),
        }]
    }

    fn open(&self, uri: &str) -> Result<Box<dyn SensorDevice>> {
        if uri != self.uri() || !self.root.is_dir() {
            return Err(GrabberError::Device(format!("unknown uri {uri}")));
        }
        Ok(Box::new(ReplayDevice {
            info: self.enumerate().remove(0),
            root: self.root.clone(),
            fps: self.fps,
            state: ConnectionState::Open,
        }))
    }
}

struct ReplayDevice {
    info: DeviceInfo,
    root: PathBuf,
    fps: u32,
    state: ConnectionState,
}

fn png_filter(rp: glob::GlobResult) -> Option<PathBuf> {
    match rp {
        Ok(p) if p.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")) => Some(p),
        Ok(_) => None,
        Err(e) => {
            log::warn!("{e}");
            None
        }
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", dir.display());
    let mut paths: Vec<PathBuf> = glob(&pattern)?.filter_map(png_filter).collect();
    paths.sort();
    Ok(paths)
}

impl SensorDevice for ReplayDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn create_stream(&mut self, kind: StreamKind) -> Result<Option<Box<dyn SensorStream>>> {
        let paths = list_frames(&self.root.join(kind.to_string()))?;
        let Some(first) = paths.first() else {
            return Ok(None);
        };
        let (w, h) = image::image_dimensions(first)?;
        let mode = VideoMode {
            resolution_x: w,
            resolution_y: h,
            fps: self.fps,
            pixel_format: match kind {
                StreamKind::Depth => PixelFormat::Depth1Mm,
                StreamKind::Color => PixelFormat::Rgb888,
            },
        };
        log::info!("{kind}: {} recorded frames", paths.len());
        let progress = match kind {
            StreamKind::Depth => ProgressBar::new(paths.len() as u64),
            StreamKind::Color => ProgressBar::hidden(),
        };
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        Ok(Some(Box::new(ReplayStream {
            kind,
            mode,
            paths: Arc::new(paths),
            cursor: 0,
            running: Arc::new(AtomicBool::new(false)),
            producer: None,
            ready_tx: Some(ready_tx),
            ready_rx,
            progress,
        })))
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

struct ReplayStream {
    kind: StreamKind,
    mode: VideoMode,
    paths: Arc<Vec<PathBuf>>,
    cursor: usize,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    /// Moved into the producer on start so the channel closes with it.
    ready_tx: Option<crossbeam_channel::Sender<()>>,
    ready_rx: Receiver<()>,
    progress: ProgressBar,
}

impl SensorStream for ReplayStream {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn supported_modes(&self) -> Vec<VideoMode> {
        vec![self.mode]
    }

    fn mode(&self) -> Option<VideoMode> {
        Some(self.mode)
    }

    fn set_mode(&mut self, mode: VideoMode) -> Result<()> {
        if mode != self.mode {
            return Err(GrabberError::stream(self.kind, format!("unsupported mode {mode}")));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let Some(ready_tx) = self.ready_tx.take() else {
            return Ok(());
        };
        let period = Duration::from_secs_f64(1.0 / self.mode.fps.max(1) as f64);
        let count = self.paths.len();
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-replay", self.kind))
            .spawn(move || {
                let mut sent = 0;
                while sent < count && running.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    // wait for the previous frame to be read, but keep watching `running`
                    loop {
                        match ready_tx.send_timeout((), period) {
                            Ok(()) => {
                                sent += 1;
                                break;
                            }
                            Err(SendTimeoutError::Timeout(())) if running.load(Ordering::Acquire) => {}
                            Err(_) => return,
                        }
                    }
                }
            })?;
        self.producer = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                log::error!("{} replay thread panicked", self.kind);
            }
        }
        self.progress.finish_and_clear();
    }

    fn is_started(&self) -> bool {
        self.producer.is_some()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let path = self
            .paths
            .get(self.cursor)
            .ok_or(GrabberError::StreamClosed(self.kind))?;
        self.cursor += 1;
        self.progress.inc(1);
        let img = image::open(path)?;
        let seq = self.cursor as u64;
        match self.kind {
            StreamKind::Depth => {
                let depth = img.to_luma16();
                Frame::depth(depth.width(), depth.height(), seq, depth.into_raw())
            }
            StreamKind::Color => {
                let rgb = img.to_rgb8();
                Frame::rgb(rgb.width(), rgb.height(), seq, rgb.into_raw())
            }
        }
    }

    fn ready(&self) -> &Receiver<()> {
        &self.ready_rx
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.stop();
    }
}
