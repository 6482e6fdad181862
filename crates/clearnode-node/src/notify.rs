//! Fan-out of change notifications to subscribers.

use clearnode_core::{Address, AppSession, Channel, Notifier};
use serde::Serialize;
use tokio::sync::broadcast;

/// A change published after a state-changing operation commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ChannelUpdated { channel: Channel },
    BalanceUpdated { wallet: Address },
    AppSessionUpdated { session: AppSession },
}

/// [`Notifier`] that publishes on a `tokio::sync::broadcast` channel.
///
/// Sending never blocks; a notification with no live subscriber is dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("notification dropped, no subscribers");
        }
    }
}

impl Notifier for BroadcastNotifier {
    fn channel_updated(&self, channel: &Channel) {
        self.publish(Notification::ChannelUpdated {
            channel: channel.clone(),
        });
    }

    fn balance_updated(&self, wallet: &Address) {
        self.publish(Notification::BalanceUpdated { wallet: *wallet });
    }

    fn app_session_updated(&self, session: &AppSession) {
        self.publish(Notification::AppSessionUpdated {
            session: session.clone(),
        });
    }
}
