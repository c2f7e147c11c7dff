#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use rgbd_grabber::device::{
    ConnectionState, DeviceInfo, DeviceProvider, SensorDevice, SensorStream,
};
use rgbd_grabber::error::{GrabberError, Result};
use rgbd_grabber::types::{Frame, PixelFormat, StreamKind, VideoMode};

pub type Events = Arc<Mutex<Vec<String>>>;
type Script = Arc<Mutex<VecDeque<Result<Frame>>>>;

/// Test side of a [`MockStream`]: queue frames, then signal readiness.
#[derive(Clone)]
pub struct MockControl {
    ready: Sender<()>,
    script: Script,
}

impl MockControl {
    pub fn push(&self, frame: Result<Frame>) {
        self.script.lock().unwrap().push_back(frame);
    }

    pub fn signal(&self) {
        let _ = self.ready.try_send(());
    }

    pub fn push_and_signal(&self, frame: Result<Frame>) {
        self.push(frame);
        self.signal();
    }
}

pub struct MockStream {
    kind: StreamKind,
    mode: VideoMode,
    started: bool,
    ready_rx: Receiver<()>,
    script: Script,
    events: Events,
}

pub fn mock_stream(kind: StreamKind, mode: VideoMode, events: Events) -> (MockStream, MockControl) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let script = Script::default();
    (
        MockStream {
            kind,
            mode,
            started: false,
            ready_rx: rx,
            script: script.clone(),
            events,
        },
        MockControl { ready: tx, script },
    )
}

pub fn depth_mode(w: u32, h: u32) -> VideoMode {
    VideoMode {
        resolution_x: w,
        resolution_y: h,
        fps: 30,
        pixel_format: PixelFormat::Depth1Mm,
    }
}

pub fn color_mode(w: u32, h: u32) -> VideoMode {
    VideoMode {
        resolution_x: w,
        resolution_y: h,
        fps: 30,
        pixel_format: PixelFormat::Rgb888,
    }
}

impl SensorStream for MockStream {
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
        self.mode = mode;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        self.events.lock().unwrap().push(format!("start {}", self.kind));
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.events.lock().unwrap().push(format!("stop {}", self.kind));
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn read_frame(&mut self) -> Result<Frame> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GrabberError::stream(self.kind, "nothing queued")))
    }

    fn ready(&self) -> &Receiver<()> {
        &self.ready_rx
    }
}

/// Hands out pre-built mock streams and records device lifecycle events.
pub struct MockProvider {
    streams: Mutex<Option<(MockStream, MockStream)>>,
    events: Events,
    has_color: bool,
}

impl MockProvider {
    pub fn new(depth: MockStream, color: MockStream, events: Events) -> MockProvider {
        MockProvider {
            streams: Mutex::new(Some((depth, color))),
            events,
            has_color: true,
        }
    }

    pub fn without_color(mut self) -> MockProvider {
        self.has_color = false;
        self
    }
}

impl DeviceProvider for MockProvider {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            name: "Mock".to_string(),
            vendor: "test".to_string(),
            product_id: 1,
            vendor_id: 2,
            uri: "mock://0".to_string(),
        }]
    }

    fn open(&self, uri: &str) -> Result<Box<dyn SensorDevice>> {
        self.events.lock().unwrap().push(format!("open {uri}"));
        let (depth, color) = self.streams.lock().unwrap().take().unwrap();
        Ok(Box::new(MockDevice {
            info: self.enumerate().remove(0),
            state: ConnectionState::Open,
            depth: Some(depth),
            color: if self.has_color { Some(color) } else { None },
            events: self.events.clone(),
        }))
    }
}

struct MockDevice {
    info: DeviceInfo,
    state: ConnectionState,
    depth: Option<MockStream>,
    color: Option<MockStream>,
    events: Events,
}

impl SensorDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn create_stream(&mut self, kind: StreamKind) -> Result<Option<Box<dyn SensorStream>>> {
        let stream = match kind {
            StreamKind::Depth => self.depth.take(),
            StreamKind::Color => self.color.take(),
        };
        Ok(stream.map(|s| Box::new(s) as Box<dyn SensorStream>))
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.events.lock().unwrap().push("close device".to_string());
    }
}
