use crate::app_session::AppSession;
use crate::channel::Channel;
use crate::types::Address;

/// Receives change notifications after a state-changing operation commits.
///
/// Implementations must not block; delivery is best effort.
pub trait Notifier: Send + Sync {
    /// A channel row changed.
    fn channel_updated(&self, channel: &Channel);

    /// A wallet's balances changed.
    fn balance_updated(&self, wallet: &Address);

    /// An app session changed.
    fn app_session_updated(&self, session: &AppSession);
}

/// Notifier that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn channel_updated(&self, _channel: &Channel) {}

    fn balance_updated(&self, _wallet: &Address) {}

    fn app_session_updated(&self, _session: &AppSession) {}
}
