use tokio::sync::Notify;

/// Wake-ups raised by the dispatcher.
///
/// Waiters always re-check the response store after waking and on a short
/// timer, so a notification that fires while nobody is waiting is harmless.
#[derive(Debug, Default)]
pub struct Signals {
    /// A data reply or bridge reply was stored.
    pub response: Notify,
    /// A command result or feature status was stored.
    pub result: Notify,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_response(&self) {
        self.response.notify_waiters();
    }

    pub fn raise_result(&self) {
        self.result.notify_waiters();
    }

    /// Resolves on either signal.
    pub async fn any(&self) {
        tokio::select! {
            _ = self.response.notified() => {}
            _ = self.result.notified() => {}
        }
    }
}
