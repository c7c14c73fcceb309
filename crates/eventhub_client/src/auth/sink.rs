/// Receives the terminal logout signal, e.g. to send the UI back to the login
/// screen. Called once per failed refresh and on explicit logout.
pub trait SessionSink: Send + Sync {
    fn clear(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionSink;

impl SessionSink for NoopSessionSink {
    fn clear(&self) {}
}

impl<F> SessionSink for F
where
    F: Fn() + Send + Sync,
{
    fn clear(&self) {
        self()
    }
}
