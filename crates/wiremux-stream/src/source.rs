use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::SourceError;
use crate::item::Item;

/// A push-style producer read by the multiplexer.
///
/// The engine pulls items one at a time and never issues a second read
/// before the previous one resolves. `Ok(None)` marks exhaustion, after
/// which no further reads are issued. A pending read may be dropped when
/// the session is canceled, so `read` must be cancellation-safe.
pub trait Source: Send + 'static {
    /// Pull the next item.
    fn read(&mut self) -> impl Future<Output = Result<Option<Item>, SourceError>> + Send;

    /// Abandon the source with a human-readable reason.
    fn cancel(&mut self, reason: &str) -> impl Future<Output = ()> + Send;
}

/// Create a bounded channel-backed source.
///
/// The [`SourceSender`] half lives with the producer; the [`ChannelSource`]
/// half is handed to the multiplexer. Dropping the sender ends the source.
pub fn source_channel(capacity: usize) -> (SourceSender, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        SourceSender {
            tx,
            cancel_rx: Some(cancel_rx),
        },
        ChannelSource {
            rx,
            cancel_tx: Some(cancel_tx),
        },
    )
}

/// The consumer half of [`source_channel`]: a [`Source`] fed by a bounded
/// channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Item, SourceError>>,
    cancel_tx: Option<oneshot::Sender<String>>,
}

impl Source for ChannelSource {
    async fn read(&mut self) -> Result<Option<Item>, SourceError> {
        match self.rx.recv().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn cancel(&mut self, reason: &str) {
        debug!(reason, "channel source canceled");
        self.rx.close();
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(reason.to_owned());
        }
    }
}

/// The producer half of [`source_channel`].
pub struct SourceSender {
    tx: mpsc::Sender<Result<Item, SourceError>>,
    cancel_rx: Option<oneshot::Receiver<String>>,
}

impl SourceSender {
    /// Push the next item, waiting for the consumer's demand.
    pub async fn send(&self, item: impl Into<Item>) -> Result<(), SourceError> {
        self.tx
            .send(Ok(item.into()))
            .await
            .map_err(|_| SourceError::Closed)
    }

    /// Make the source's next read reject with `err`, consuming the sender.
    pub async fn fail(self, err: SourceError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Resolve with the formatted cancellation reason once the consumer
    /// cancels the source, or `None` if it never does. Only the first call
    /// can observe the reason.
    pub async fn canceled(&mut self) -> Option<String> {
        match self.cancel_rx.take() {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    }
}
