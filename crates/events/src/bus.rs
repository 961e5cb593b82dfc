//! Publish/subscribe abstraction for push notifications (mechanics only).
//!
//! Delivery is in publish order per subscriber. The bus does not persist
//! anything: a subscriber only sees messages published after it subscribed.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};

/// A subscription to a message stream.
///
/// Each subscription receives its own copy of every message published after it
/// was created (broadcast semantics), in publish order.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut subscription = bus.subscribe();
/// while let Some(event) = subscription.recv().await {
///     handle(event).await;
/// }
/// ```
///
/// Dropping the subscription, or calling [`Subscription::close`], is how a
/// consumer unsubscribes; the bus prunes closed subscribers on its next publish.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Stop receiving new messages. Already-buffered messages can still be
    /// drained with `recv`.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Transport-agnostic pub/sub contract.
///
/// `Send + Sync` so a single bus can be shared between the backend adapter that
/// publishes and the listeners that subscribe.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
