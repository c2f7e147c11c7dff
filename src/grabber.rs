//! The capture loop: synchronize, read, register, combine, publish.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::calibration::CalibrationSet;
use crate::camera_model::{RemapTable, remap};
use crate::combine::combine_in_place;
use crate::config::GrabberConfig;
use crate::device::StreamPair;
use crate::display::{Palette, depth_to_preview};
use crate::error::{GrabberError, Result};
use crate::geometry::{Geometry, GeometryMapper};
use crate::registration::Registrar;
use crate::sink::OutputSinks;
use crate::sync::{FrameSynchronizer, poll_ready};
use crate::types::{AlignedDepthFrame, CombinedFrame, DepthImage, Size, StreamKind};

/// What happened during one [`Grabber::cycle`].
///
/// A side that was not refreshed is reused from an earlier cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// The stream the synchronizer woke up for.
    pub signaled: StreamKind,
    pub refreshed_depth: bool,
    pub refreshed_color: bool,
}

impl CycleReport {
    pub fn refreshed(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Depth => self.refreshed_depth,
            StreamKind::Color => self.refreshed_color,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Screenshot,
    ToggleCombine,
}

impl Command {
    /// `q`, `s` or `c`, surrounding whitespace ignored.
    pub fn parse(line: &str) -> Option<Command> {
        match line.trim() {
            "q" => Some(Command::Quit),
            "s" => Some(Command::Screenshot),
            "c" => Some(Command::ToggleCombine),
            _ => None,
        }
    }
}

/// Mirror and bias applied to raw depth before registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthPreprocessor {
    pub mirror: bool,
    /// Millimetres, added to non-zero samples with saturation.
    pub shift: i32,
}

impl DepthPreprocessor {
    pub fn new(calibration: &CalibrationSet, config: &GrabberConfig) -> DepthPreprocessor {
        DepthPreprocessor {
            mirror: config.mirror,
            shift: calibration.depth_shift.round() as i32,
        }
    }

    pub fn apply(&self, mut depth: DepthImage) -> DepthImage {
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut depth);
        }
        if self.shift != 0 {
            for d in depth.iter_mut().filter(|d| **d != 0) {
                *d = (*d as i32 + self.shift).clamp(0, u16::MAX as i32) as u16;
            }
        }
        depth
    }
}

/// Undistort, downscale to the clipped grid, mirror.
#[derive(Debug, Clone)]
pub struct ColorProcessor {
    undistort: Option<RemapTable>,
    clipped: Size,
    mirror: bool,
}

impl ColorProcessor {
    pub fn new(geometry: &Geometry, config: &GrabberConfig) -> ColorProcessor {
        let undistort = (config.undistort_color && !geometry.color_undistort.is_identity())
            .then(|| geometry.color_undistort.clone());
        ColorProcessor {
            undistort,
            clipped: geometry.clipped_color_size,
            mirror: config.mirror,
        }
    }

    pub fn apply(&self, color: RgbImage) -> RgbImage {
        let color = match &self.undistort {
            Some(table) if table.size() == Size::new(color.width(), color.height()) => {
                remap(&color, table)
            }
            Some(table) => {
                log::debug!(
                    "color frame {}x{} doesn't match undistortion table {}",
                    color.width(),
                    color.height(),
                    table.size()
                );
                color
            }
            None => color,
        };
        let mut out = if color.dimensions() == (self.clipped.width, self.clipped.height) {
            color
        } else {
            imageops::resize(&color, self.clipped.width, self.clipped.height, FilterType::Triangle)
        };
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }
}

/// Processes color frames on a second thread.
///
/// The frame is moved to the worker and moved back; only one frame is in
/// flight at a time.
struct ColorWorker {
    jobs: Option<Sender<RgbImage>>,
    results: Receiver<RgbImage>,
    handle: Option<JoinHandle<()>>,
}

impl ColorWorker {
    fn spawn(processor: Arc<ColorProcessor>) -> Result<ColorWorker> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<RgbImage>(1);
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::Builder::new()
            .name("color-worker".to_string())
            .spawn(move || {
                for color in job_rx {
                    if result_tx.send(processor.apply(color)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(ColorWorker {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    fn submit(&self, color: RgbImage) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or(GrabberError::WorkerGone)?
            .send(color)
            .map_err(|_| GrabberError::WorkerGone)
    }

    fn join(&self) -> Result<RgbImage> {
        self.results.recv().map_err(|_| GrabberError::WorkerGone)
    }
}

impl Drop for ColorWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("color worker panicked");
            }
        }
    }
}

pub struct Grabber {
    config: GrabberConfig,
    registrar: Box<dyn Registrar>,
    sinks: OutputSinks,
    depth_pre: DepthPreprocessor,
    color_proc: Arc<ColorProcessor>,
    worker: Option<ColorWorker>,
    palette: Palette,
    aligned: Option<AlignedDepthFrame>,
    color: Option<RgbImage>,
    combine_enabled: bool,
    published: u64,
    screenshots: u32,
    /// Streams whose producer is gone.
    closed: Vec<StreamKind>,
}

impl Grabber {
    /// Validates `config`, derives the geometry and initializes `registrar`.
    /// Any error is fatal.
    pub fn new(
        config: GrabberConfig,
        calibration: &CalibrationSet,
        mut registrar: Box<dyn Registrar>,
        sinks: OutputSinks,
    ) -> Result<Grabber> {
        config.validate()?;
        let geometry = GeometryMapper::build(calibration, &config);
        GeometryMapper::init_registrar(&geometry, registrar.as_mut())?;
        let color_proc = Arc::new(ColorProcessor::new(&geometry, &config));
        let worker = if config.color_worker {
            Some(ColorWorker::spawn(color_proc.clone())?)
        } else {
            None
        };
        Ok(Grabber {
            depth_pre: DepthPreprocessor::new(calibration, &config),
            combine_enabled: config.combine_enabled,
            config,
            registrar,
            sinks,
            color_proc,
            worker,
            palette: Palette::default(),
            aligned: None,
            color: None,
            published: 0,
            screenshots: 0,
            closed: Vec::new(),
        })
    }

    pub fn latest_aligned_depth(&self) -> Option<&AlignedDepthFrame> {
        self.aligned.as_ref()
    }

    pub fn combine_enabled(&self) -> bool {
        self.combine_enabled
    }

    pub fn frames_published(&self) -> u64 {
        self.published
    }

    /// Registers `depth` and combines it with `color`, bypassing the streams.
    pub fn process_pair(&mut self, depth: DepthImage, color: RgbImage) -> Result<CombinedFrame> {
        self.update(Some(depth), Some(color))?;
        self.combined()
            .ok_or_else(|| GrabberError::Registration("no frame pair".to_string()))
    }

    /// Runs one synchronize, read, register, combine, publish cycle.
    ///
    /// Frames read before a stream turns out to be closed are still
    /// registered and published. Fails with `StreamClosed` once both streams
    /// are closed.
    pub fn cycle(
        &mut self,
        streams: &mut StreamPair,
        sync: &FrameSynchronizer,
    ) -> Result<CycleReport> {
        let signaled = sync.wait(streams, &mut self.closed)?;
        let counterpart = signaled.counterpart();
        let mut depth = None;
        let mut color = None;

        // true when the stream turned out to be closed
        let mut read = |kind: StreamKind, streams: &mut StreamPair| -> bool {
            match read_stream(kind, streams) {
                Ok(Fresh::Depth(d)) => depth = Some(d),
                Ok(Fresh::Color(c)) => color = Some(c),
                Err(GrabberError::StreamClosed(_)) => return true,
                Err(e) => log::warn!("Can't read {kind} frame, keeping the previous one: {e}"),
            }
            false
        };
        if read(signaled, streams) {
            self.mark_closed(signaled);
        }
        if !self.closed.contains(&counterpart) {
            let counterpart_closed = match poll_ready(counterpart, streams.stream(counterpart).ready()) {
                Ok(true) => read(counterpart, streams),
                Ok(false) => false,
                Err(_) => true,
            };
            if counterpart_closed {
                self.mark_closed(counterpart);
            }
        }

        let report = CycleReport {
            signaled,
            refreshed_depth: depth.is_some(),
            refreshed_color: color.is_some(),
        };
        log::trace!("{report:?}");
        self.update(depth, color)?;
        self.publish(&report);
        Ok(report)
    }

    /// Cycles until stopped, both streams closed, `max_frames` cycles ran, or an error.
    ///
    /// Stop and stream end are a normal return; everything else is propagated.
    pub fn run(
        &mut self,
        streams: &mut StreamPair,
        sync: &FrameSynchronizer,
        commands: Option<&Receiver<Command>>,
        max_frames: Option<u64>,
    ) -> Result<u64> {
        let min_period = self
            .config
            .max_rate_hz
            .filter(|hz| *hz > 0.0)
            .map(|hz| Duration::from_secs_f64(1.0 / hz));
        let mut cycles = 0u64;
        let mut last = Instant::now();

        loop {
            if max_frames.is_some_and(|max| cycles >= max) {
                log::info!("frame limit {cycles} reached");
                break;
            }
            if let Some(commands) = commands {
                match self.handle_commands(commands) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => log::warn!("command failed: {e}"),
                }
            }
            match self.cycle(streams, sync) {
                Ok(_) => cycles += 1,
                Err(e) if e.is_graceful_end() => {
                    log::info!("capture ended: {e}");
                    break;
                }
                Err(e) => return Err(e),
            }

            let elapsed = last.elapsed();
            if let Some(period) = min_period {
                if elapsed < period {
                    std::thread::sleep(period - elapsed);
                }
            }
            let dt = last.elapsed().as_secs_f64();
            last = Instant::now();
            if dt > 0.0 {
                log::debug!("{:.1} fps", 1.0 / dt);
            }
        }
        Ok(cycles)
    }

    /// Applies pending commands. `Ok(false)` asks the loop to stop.
    pub fn handle_commands(&mut self, commands: &Receiver<Command>) -> Result<bool> {
        loop {
            match commands.try_recv() {
                Ok(Command::Quit) => {
                    log::info!("quit requested");
                    return Ok(false);
                }
                Ok(Command::Screenshot) => {
                    self.screenshot()?;
                }
                Ok(Command::ToggleCombine) => {
                    self.combine_enabled = !self.combine_enabled;
                    log::info!("combine {}", if self.combine_enabled { "on" } else { "off" });
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(true),
            }
        }
    }

    /// Writes the current output frame to the screenshot directory.
    pub fn screenshot(&mut self) -> Result<Option<PathBuf>> {
        let Some(frame) = self.output_frame() else {
            log::warn!("no frame to save yet");
            return Ok(None);
        };
        std::fs::create_dir_all(&self.config.screenshot_dir)?;
        let path = self
            .config
            .screenshot_dir
            .join(format!("{:04}_{}.png", self.screenshots, timestamp()));
        frame.save(&path)?;
        self.screenshots += 1;
        log::info!("saved {}", path.display());
        Ok(Some(path))
    }

    fn update(&mut self, depth: Option<DepthImage>, color: Option<RgbImage>) -> Result<()> {
        let pending_color = match (&self.worker, color) {
            (Some(worker), Some(color)) => {
                worker.submit(color)?;
                true
            }
            (None, Some(color)) => {
                self.color = Some(self.color_proc.apply(color));
                false
            }
            (_, None) => false,
        };

        let registered = depth.map(|d| self.registrar.register_depth(&self.depth_pre.apply(d)));

        // join before touching the color buffer again
        if pending_color {
            if let Some(worker) = &self.worker {
                self.color = Some(worker.join()?);
            }
        }
        match registered {
            Some(Ok(aligned)) => self.aligned = Some(aligned),
            Some(Err(e)) => log::warn!("registration failed, keeping the previous depth: {e}"),
            None => {}
        }
        Ok(())
    }

    fn mark_closed(&mut self, kind: StreamKind) {
        if !self.closed.contains(&kind) {
            log::info!("{kind} stream ended");
            self.closed.push(kind);
        }
    }

    fn combined(&self) -> Option<CombinedFrame> {
        let (depth, color) = (self.aligned.as_ref()?, self.color.as_ref()?);
        let mut out = color.clone();
        combine_in_place(depth, &mut out, &self.config.combine);
        Some(out)
    }

    /// Combined frame, or plain color while combining is off.
    fn output_frame(&self) -> Option<RgbImage> {
        if self.combine_enabled {
            self.combined()
        } else {
            self.color.clone()
        }
    }

    fn publish(&mut self, report: &CycleReport) {
        let seq = self.published;
        let mut any = false;
        if self.sinks.combined.has_subscribers() {
            if let Some(frame) = self.output_frame() {
                self.sinks.combined.publish(seq, &frame);
                any = true;
            }
        }
        if report.refreshed(StreamKind::Depth) {
            if let Some(aligned) = &self.aligned {
                if self.sinks.depth.has_subscribers() {
                    self.sinks.depth.publish(seq, aligned);
                    any = true;
                }
                if self.sinks.preview.has_subscribers() {
                    let preview = depth_to_preview(aligned, &self.config.display, &self.palette);
                    self.sinks.preview.publish(seq, &preview);
                    any = true;
                }
            }
        }
        if any {
            self.published += 1;
        }
    }
}

enum Fresh {
    Depth(DepthImage),
    Color(RgbImage),
}

fn read_stream(kind: StreamKind, streams: &mut StreamPair) -> Result<Fresh> {
    let frame = streams.stream_mut(kind).read_frame()?;
    if frame.kind() != kind {
        return Err(GrabberError::UnexpectedFormat {
            kind,
            format: frame.pixel_format(),
        });
    }
    match kind {
        StreamKind::Depth => frame.into_depth_image().map(Fresh::Depth),
        StreamKind::Color => frame.into_rgb_image().map(Fresh::Color),
    }
}

fn timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse("q\n"), Some(Command::Quit));
        assert_eq!(Command::parse(" s "), Some(Command::Screenshot));
        assert_eq!(Command::parse("c"), Some(Command::ToggleCombine));
        assert_eq!(Command::parse("x"), None);
    }

    #[test]
    fn depth_shift_keeps_zero_and_saturates() {
        let pre = DepthPreprocessor {
            mirror: false,
            shift: 10,
        };
        let depth = DepthImage::from_raw(3, 1, vec![0, 1000, u16::MAX - 5]).unwrap();
        assert_eq!(pre.apply(depth).as_raw(), &vec![0, 1010, u16::MAX]);

        let pre = DepthPreprocessor {
            mirror: false,
            shift: -2000,
        };
        let depth = DepthImage::from_raw(2, 1, vec![1000, 2500]).unwrap();
        assert_eq!(pre.apply(depth).as_raw(), &vec![0, 500]);
    }

    #[test]
    fn depth_mirror() {
        let pre = DepthPreprocessor {
            mirror: true,
            shift: 0,
        };
        let depth = DepthImage::from_raw(3, 1, vec![1, 2, 3]).unwrap();
        let out = pre.apply(depth);
        assert_eq!(*out.get_pixel(0, 0), Luma([3]));
    }

    #[test]
    fn color_resized_and_mirrored() {
        let processor = ColorProcessor {
            undistort: None,
            clipped: Size::new(2, 1),
            mirror: true,
        };
        let mut color = RgbImage::new(4, 2);
        for y in 0..2 {
            color.put_pixel(0, y, Rgb([255, 0, 0]));
            color.put_pixel(1, y, Rgb([255, 0, 0]));
        }
        let out = processor.apply(color);
        assert_eq!(out.dimensions(), (2, 1));
        // the red half ends up on the right
        assert!(out.get_pixel(1, 0)[0] > out.get_pixel(0, 0)[0]);
    }
}
