//! Observer hooks for UI decoupling.
//!
//! Upload progress is pushed through an observer so a CLI progress bar
//! (or anything else) can subscribe without the core knowing about it.

/// Events emitted by a client while it drives the device.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Cumulative upload progress, emitted after every chunk.
    Progress {
        label: &'static str,
        sent: u64,
        total: u64,
        percent: f64,
    },
}

/// Observer trait for receiving client events.
pub trait ClientObserver: Send + Sync {
    fn on_event(&self, event: &ClientEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ClientObserver for NullObserver {
    fn on_event(&self, _event: &ClientEvent) {
        // Do nothing
    }
}

/// Default observer that reports events through tracing.
pub struct TracingObserver;

impl ClientObserver for TracingObserver {
    fn on_event(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Progress {
                label,
                sent,
                total,
                percent,
            } => {
                tracing::debug!(
                    label = %label,
                    sent = *sent,
                    total = *total,
                    progress = %format!("{percent:.0}%"),
                    "Progress"
                );
            }
        }
    }
}
