//! Wait-for-any-stream primitive driving the capture order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Select, SelectTimeoutError, Sender, TryRecvError};

use crate::device::StreamPair;
use crate::error::{GrabberError, Result};
use crate::types::StreamKind;

/// Requests the capture loop to stop. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // one pending token is enough to wake the waiter
        let _ = self.wake.try_send(());
    }
}

/// Receiving side of [`StopHandle`], owned by the synchronizer.
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let stopped = Arc::new(AtomicBool::new(false));
    let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
    (
        StopHandle {
            stopped: stopped.clone(),
            wake: wake_tx,
        },
        StopSignal {
            stopped,
            wake: wake_rx,
        },
    )
}

pub struct FrameSynchronizer {
    timeout: Duration,
    stop: StopSignal,
}

impl FrameSynchronizer {
    pub fn new(timeout: Duration, stop: StopSignal) -> FrameSynchronizer {
        FrameSynchronizer { timeout, stop }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Blocks until one of `ready` yields a token and returns its index.
    ///
    /// The token is consumed. Fails with [`GrabberError::Stopped`] once a stop
    /// was requested and with [`GrabberError::WaitTimeout`] when nothing became
    /// ready within the timeout.
    pub fn wait_for_any(&self, ready: &[&Receiver<()>]) -> Result<usize> {
        if self.stop.is_stopped() {
            return Err(GrabberError::Stopped);
        }
        let mut sel = Select::new();
        for rx in ready {
            sel.recv(rx);
        }
        let stop_idx = sel.recv(&self.stop.wake);

        let op = sel.select_timeout(self.timeout).map_err(|SelectTimeoutError| {
            log::error!("Wait failed! (timeout is {} ms)", self.timeout.as_millis());
            GrabberError::WaitTimeout(self.timeout)
        })?;
        let idx = op.index();
        if idx == stop_idx {
            // a stray token is harmless, the flag is what counts
            let _ = op.recv(&self.stop.wake);
            return Err(GrabberError::Stopped);
        }
        match op.recv(ready[idx]) {
            Ok(()) => Ok(idx),
            Err(_) => Err(GrabberError::Disconnected(idx)),
        }
    }

    /// Waits on the streams of `streams` that are not in `closed`.
    ///
    /// A stream whose producer went away is added to `closed` and the wait
    /// goes on with the other one, so frames still queued there are not lost.
    /// `StreamClosed` is returned once both streams are closed.
    pub fn wait(&self, streams: &StreamPair, closed: &mut Vec<StreamKind>) -> Result<StreamKind> {
        loop {
            let open: Vec<StreamKind> = [StreamKind::Depth, StreamKind::Color]
                .into_iter()
                .filter(|kind| !closed.contains(kind))
                .collect();
            if open.is_empty() {
                let last = closed.last().copied().unwrap_or(StreamKind::Depth);
                return Err(GrabberError::StreamClosed(last));
            }
            let receivers: Vec<&Receiver<()>> =
                open.iter().map(|kind| streams.stream(*kind).ready()).collect();
            match self.wait_for_any(&receivers) {
                Ok(idx) => return Ok(open[idx]),
                Err(GrabberError::Disconnected(idx)) => {
                    log::info!("{} stream ended", open[idx]);
                    closed.push(open[idx]);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Takes a pending token from `ready` without blocking.
///
/// `Ok(false)` when no frame is waiting, `StreamClosed` once the producer is gone.
pub fn poll_ready(kind: StreamKind, ready: &Receiver<()>) -> Result<bool> {
    match ready.try_recv() {
        Ok(()) => Ok(true),
        Err(TryRecvError::Empty) => Ok(false),
        Err(TryRecvError::Disconnected) => Err(GrabberError::StreamClosed(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_before_wait() {
        let (handle, signal) = stop_channel();
        let sync = FrameSynchronizer::new(Duration::from_secs(5), signal);
        let (_tx, rx) = crossbeam_channel::bounded::<()>(1);
        handle.stop();
        assert!(matches!(sync.wait_for_any(&[&rx]), Err(GrabberError::Stopped)));
        // the flag persists after the token is consumed
        assert!(matches!(sync.wait_for_any(&[&rx]), Err(GrabberError::Stopped)));
    }

    #[test]
    fn disconnected_receiver() {
        let (_handle, signal) = stop_channel();
        let sync = FrameSynchronizer::new(Duration::from_secs(5), signal);
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        drop(tx);
        assert!(matches!(
            sync.wait_for_any(&[&rx]),
            Err(GrabberError::Disconnected(0))
        ));
    }

    #[test]
    fn poll_empty_and_closed() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        assert!(!poll_ready(StreamKind::Color, &rx).unwrap());
        tx.send(()).unwrap();
        assert!(poll_ready(StreamKind::Color, &rx).unwrap());
        drop(tx);
        assert!(matches!(
            poll_ready(StreamKind::Color, &rx),
            Err(GrabberError::StreamClosed(StreamKind::Color))
        ));
    }
}
