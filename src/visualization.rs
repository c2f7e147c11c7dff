use rerun::RecordingStream;

use crate::sink::FrameSink;
use crate::types::DepthImage;

/// Publishes frames to a rerun recording under `entity`, on the `frame` timeline.
pub struct RerunSink {
    recording: RecordingStream,
    entity: String,
}

impl RerunSink {
    pub fn new(recording: RecordingStream, entity: impl Into<String>) -> RerunSink {
        RerunSink {
            recording,
            entity: entity.into(),
        }
    }

    fn log(&self, seq: u64, archetype: &impl rerun::AsComponents) {
        self.recording.set_time_sequence("frame", seq as i64);
        if let Err(e) = self.recording.log(self.entity.as_str(), archetype) {
            log::warn!("rerun {}: {e}", self.entity);
        }
    }
}

impl FrameSink<image::RgbImage> for RerunSink {
    fn has_subscribers(&self) -> bool {
        self.recording.is_enabled()
    }

    fn publish(&mut self, seq: u64, frame: &image::RgbImage) {
        let img = rerun::Image::from_rgb24(frame.as_raw().clone(), [frame.width(), frame.height()]);
        self.log(seq, &img);
    }
}

impl FrameSink<DepthImage> for RerunSink {
    fn has_subscribers(&self) -> bool {
        self.recording.is_enabled()
    }

    fn publish(&mut self, seq: u64, frame: &DepthImage) {
        let bytes: Vec<u8> = frame.as_raw().iter().flat_map(|d| d.to_le_bytes()).collect();
        let format = rerun::datatypes::ImageFormat::depth(
            [frame.width(), frame.height()],
            rerun::datatypes::ChannelDatatype::U16,
        );
        let img = rerun::DepthImage::new(bytes, format).with_meter(1000.0);
        self.log(seq, &img);
    }
}
