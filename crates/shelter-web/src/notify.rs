/// Outbound message channel for account notices (password reset links).
///
/// Mail and group-chat delivery live outside this service; the server only
/// hands messages to whatever implementation it was started with.
pub trait Notifier: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Writes a delivery record to the log instead of contacting a mail server.
/// The message body is never logged.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!(to, subject, "Notification dispatched");
        Ok(())
    }
}
