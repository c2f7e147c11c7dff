//! Output sinks the capture loop publishes to.
//!
//! Publishing is fire-and-forget. A sink that reports no subscribers is
//! skipped before its frame is even produced.

use crossbeam_channel::{Sender, TrySendError};
use image::RgbImage;

use crate::types::{AlignedDepthFrame, CombinedFrame};

pub trait FrameSink<T>: Send {
    fn has_subscribers(&self) -> bool;
    fn publish(&mut self, seq: u64, frame: &T);
}

/// Never subscribed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<T> FrameSink<T> for NullSink {
    fn has_subscribers(&self) -> bool {
        false
    }

    fn publish(&mut self, _seq: u64, _frame: &T) {}
}

/// Forwards `(seq, frame)` copies to a channel.
///
/// Subscribed until the receiving side is dropped. A full channel drops the
/// frame instead of blocking the capture loop.
pub struct ChannelSink<T> {
    tx: Sender<(u64, T)>,
    connected: bool,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: Sender<(u64, T)>) -> ChannelSink<T> {
        ChannelSink {
            tx,
            connected: true,
        }
    }
}

impl<T: Clone + Send> FrameSink<T> for ChannelSink<T> {
    fn has_subscribers(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, seq: u64, frame: &T) {
        match self.tx.try_send((seq, frame.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("sink full, frame {seq} dropped"),
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("sink subscriber gone");
                self.connected = false;
            }
        }
    }
}

pub struct OutputSinks {
    pub combined: Box<dyn FrameSink<CombinedFrame>>,
    pub depth: Box<dyn FrameSink<AlignedDepthFrame>>,
    pub preview: Box<dyn FrameSink<RgbImage>>,
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self {
            combined: Box::new(NullSink),
            depth: Box::new(NullSink),
            preview: Box::new(NullSink),
        }
    }
}
