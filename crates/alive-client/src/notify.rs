//! Event delivery to subscribers.

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::AliveEvent;

/// Receives every event the session routes to subscribers.
///
/// Called on the session's task; implementations should hand the event off
/// rather than block.
pub trait Notifier<S>: Send + 'static {
    /// Deliver `event` to `subscribers`.
    fn notify(&self, subscribers: &[S], event: AliveEvent);
}

impl<S, F> Notifier<S> for F
where
    F: Fn(&[S], AliveEvent) + Send + 'static,
{
    fn notify(&self, subscribers: &[S], event: AliveEvent) {
        self(subscribers, event);
    }
}

impl<S> Notifier<S> for mpsc::UnboundedSender<(Vec<S>, AliveEvent)>
where
    S: Clone + Send + 'static,
{
    fn notify(&self, subscribers: &[S], event: AliveEvent) {
        if self.send((subscribers.to_vec(), event)).is_err() {
            debug!("event receiver dropped");
        }
    }
}
