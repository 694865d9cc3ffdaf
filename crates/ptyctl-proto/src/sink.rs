//! Delivery of events to the remote display surface.

use tokio::sync::mpsc;

use crate::event::Event;

/// Where a session's events go.
///
/// Implementations must preserve the order in which `emit` is called. Delivery
/// is fire-and-forget: a disconnected surface must not stall supervision.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: Event);
}

impl EventSink for mpsc::UnboundedSender<Event> {
    fn emit(&self, event: Event) {
        // Receiver gone means nobody is listening; supervision carries on.
        let _ = self.send(event);
    }
}
