//! Background frame acquisition.
//!
//! Spawns a thread that owns a blocking `FrameSource` and hands frames over a
//! bounded channel. The grabber itself implements `FrameSource`, and its
//! `frame(timeout)` never waits longer than `timeout`, even when the camera
//! driver blocks.
//!
//! Each `FrameGrabber` owns exactly one thread, shut down and joined on drop.
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use titrator_traits::{Frame, FrameSource, SeamError};

use crate::error::TitratorError;
use crate::hw_error::{Seam, map_hw_error};

type Grab = Result<Frame, TitratorError>;

pub struct FrameGrabber {
    rx: xch::Receiver<Grab>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl FrameGrabber {
    /// `read_timeout` is passed to the wrapped source; `retry_delay` paces
    /// the thread after a failed read.
    pub fn spawn<S: FrameSource + Send + 'static>(
        mut source: S,
        read_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        let (tx, rx) = xch::bounded::<Grab>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("grabber thread received shutdown signal");
                    break;
                }

                let grab = source
                    .frame(read_timeout)
                    .map_err(|e| map_hw_error(&*e, Seam::Camera));
                let failed = grab.is_err();
                if tx.send(grab).is_err() {
                    tracing::debug!("grabber consumer disconnected, exiting thread");
                    break;
                }
                if failed {
                    std::thread::sleep(retry_delay);
                }
            }
            tracing::trace!("grabber thread exiting cleanly");
        });

        Self {
            rx,
            shutdown,
            join_handle: Some(join_handle),
        }
    }
}

impl FrameSource for FrameGrabber {
    fn frame(&mut self, timeout: Duration) -> Result<Frame, SeamError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(e)) => Err(Box::new(e)),
            Err(xch::RecvTimeoutError::Timeout) => Err(Box::new(TitratorError::Capture(
                format!("no frame within {} ms", timeout.as_millis()),
            ))),
            Err(xch::RecvTimeoutError::Disconnected) => Err(Box::new(TitratorError::Capture(
                "frame grabber thread stopped".into(),
            ))),
        }
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Unblock a pending send before joining.
        drop(std::mem::replace(&mut self.rx, xch::never()));
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("grabber thread joined"),
                Err(e) => tracing::warn!(?e, "grabber thread panicked during shutdown"),
            }
        }
    }
}
