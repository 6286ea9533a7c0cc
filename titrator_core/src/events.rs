//! Operator-facing event stream.
//!
//! Every event is logged through `tracing` and, when a receiver is attached,
//! delivered over an unbounded `crossbeam-channel`.

use crossbeam_channel as xch;

use crate::color::ReferenceColors;
use crate::error::TitratorError;
use crate::status::EndpointReport;

#[derive(Debug, Clone, PartialEq)]
pub enum TitrationEvent {
    /// Hardware is connected and the preview loop is sampling.
    Ready,
    RunStarted { rate: String },
    /// No reference was installed; the first sample of the run became it.
    ReferenceCaptured(ReferenceColors),
    /// Dispensing was billed and the pump stopped on a sustained change.
    NearEndpoint { volume_ml: f64, elapsed_s: f64 },
    /// The change reverted before the confirmation window closed.
    ColorRecovered { confirm_span_s: f64 },
    Endpoint(EndpointReport),
    Stopped,
    RinseStarted { rate: String, duration_s: u64 },
    RinseFinished,
    RinseFailed(TitratorError),
    Released,
    /// The active loop failed and hardware was released.
    Fault(TitratorError),
}

impl TitrationEvent {
    fn log(&self) {
        match self {
            Self::Ready => tracing::info!("hardware ready, previewing"),
            Self::RunStarted { rate } => tracing::info!(%rate, "titration started"),
            Self::ReferenceCaptured(r) => tracing::info!(reference = %r, "reference captured"),
            Self::NearEndpoint {
                volume_ml,
                elapsed_s,
            } => tracing::info!(volume_ml, elapsed_s, "near endpoint, pump paused"),
            Self::ColorRecovered { confirm_span_s } => {
                tracing::info!(confirm_span_s, "color recovered, resuming");
            }
            Self::Endpoint(r) => tracing::info!(
                volume_ml = r.volume_ml,
                dispensing_s = r.dispensing_s,
                final_colors = %r.final_colors,
                "endpoint reached"
            ),
            Self::Stopped => tracing::info!("titration stopped"),
            Self::RinseStarted { rate, duration_s } => {
                tracing::info!(%rate, duration_s, "rinse started");
            }
            Self::RinseFinished => tracing::info!("rinse finished"),
            Self::RinseFailed(e) => tracing::error!(error = %e, "rinse failed"),
            Self::Released => tracing::info!("hardware released"),
            Self::Fault(e) => tracing::error!(error = %e, "titration fault"),
        }
    }
}

/// Sending half of the event stream. Cloning shares the receiver.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<xch::Sender<TitrationEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, xch::Receiver<TitrationEvent>) {
        let (tx, rx) = xch::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    /// Log-only sink.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: TitrationEvent) {
        event.log();
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order_and_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        sink.emit(TitrationEvent::Ready);
        sink.emit(TitrationEvent::Stopped);
        assert_eq!(rx.try_recv().unwrap(), TitrationEvent::Ready);
        assert_eq!(rx.try_recv().unwrap(), TitrationEvent::Stopped);
        drop(rx);
        sink.emit(TitrationEvent::Released);
        EventSink::none().emit(TitrationEvent::Released);
    }
}
