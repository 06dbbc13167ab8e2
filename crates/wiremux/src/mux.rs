use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wiremux_frame::{encode_frame, serialize_item, Header, HEADER_SIZE, MAX_STREAM_ID};
use wiremux_stream::{Item, Source, SourceError};

use crate::config::MuxConfig;
use crate::error::MuxError;

/// Maximum number of source streams one session can carry.
pub const MAX_STREAMS: usize = MAX_STREAM_ID as usize + 1;

/// Payload carried by terminal frames. Receivers close on the terminal
/// flag without reading it.
const END_SENTINEL: &[u8] = b"null";

/// Combine `sources` into a single framed byte stream.
///
/// Frame ids are assigned by position: `sources[i]` produces frames with
/// id `i`, fixed for the lifetime of the session. Production is driven by
/// the consumer's demand — no source is read eagerly — and sources are
/// serviced round-robin so a slow one cannot starve the rest.
///
/// Fails synchronously, before any read, if `sources` is empty or holds
/// more streams than the one-byte id field can address. The scheduling
/// task runs on the ambient Tokio runtime.
pub fn mux<S: Source>(sources: Vec<S>) -> Result<MuxStream, MuxError> {
    mux_with_config(sources, MuxConfig::default())
}

/// [`mux`] with an explicit configuration.
pub fn mux_with_config<S: Source>(
    sources: Vec<S>,
    config: MuxConfig,
) -> Result<MuxStream, MuxError> {
    if sources.is_empty() {
        return Err(MuxError::NoSources);
    }
    if sources.len() > MAX_STREAMS {
        return Err(MuxError::TooManySources {
            count: sources.len(),
            max: MAX_STREAM_ID,
        });
    }

    let (out_tx, out_rx) = mpsc::channel(config.capacity.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let driver = MuxDriver::new(sources, out_tx);
    tokio::spawn(driver.run(cancel_rx));

    Ok(MuxStream {
        rx: out_rx,
        cancel_tx: Some(cancel_tx),
    })
}

/// The combined framed byte stream produced by [`mux`].
///
/// Dropping the handle without calling [`cancel`](MuxStream::cancel) still
/// forwards a cancellation (with the default reason) to every live source.
#[derive(Debug)]
pub struct MuxStream {
    rx: mpsc::Receiver<Result<Bytes, MuxError>>,
    cancel_tx: Option<oneshot::Sender<CancelRequest>>,
}

#[derive(Debug)]
struct CancelRequest {
    reason: Option<String>,
    ack: oneshot::Sender<()>,
}

impl MuxStream {
    /// Receive the next chunk of framed bytes.
    ///
    /// Returns `None` once every source has ended and its terminal frame
    /// has been delivered.
    pub async fn recv(&mut self) -> Option<Result<Bytes, MuxError>> {
        self.rx.recv().await
    }

    /// Cancel the session.
    ///
    /// Forwards a formatted reason to every source that has not yet ended
    /// and resolves only after all forwarded cancellations have settled.
    pub async fn cancel(mut self, reason: Option<&str>) {
        if let Some(tx) = self.cancel_tx.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            let request = CancelRequest {
                reason: reason.map(str::to_owned),
                ack: ack_tx,
            };
            if tx.send(request).is_ok() {
                let _ = ack_rx.await;
            }
        }
    }
}

impl futures_core::Stream for MuxStream {
    type Item = Result<Bytes, MuxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Per-source scheduling state.
struct ReaderState<S> {
    /// Source handle; lent to the in-flight read task, dropped once ended.
    source: Option<S>,
    busy: bool,
    ended: bool,
}

enum ReadOutcome {
    /// The source produced a value.
    Produced(Item),
    /// The source is exhausted.
    Finished,
    /// The read rejected.
    Rejected(SourceError),
    /// The session shut down while the read was in flight.
    Interrupted,
}

struct Completion<S> {
    id: u8,
    source: S,
    outcome: ReadOutcome,
}

struct MuxDriver<S> {
    readers: Vec<ReaderState<S>>,
    last_served: usize,
    out: mpsc::Sender<Result<Bytes, MuxError>>,
    /// Frames produced but not yet claimed by consumer demand.
    ready: VecDeque<Result<Bytes, MuxError>>,
    inflight: usize,
    /// Set once a read rejects; suppresses all further scheduling and
    /// enqueues.
    failed: bool,
    done_tx: mpsc::UnboundedSender<Completion<S>>,
    done_rx: mpsc::UnboundedReceiver<Completion<S>>,
    interrupt: CancellationToken,
}

impl<S: Source> MuxDriver<S> {
    fn new(sources: Vec<S>, out: mpsc::Sender<Result<Bytes, MuxError>>) -> Self {
        let readers: Vec<_> = sources
            .into_iter()
            .map(|source| ReaderState {
                source: Some(source),
                busy: false,
                ended: false,
            })
            .collect();
        // The first round-robin search starts just past the end, i.e. at 0.
        let last_served = readers.len() - 1;
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            readers,
            last_served,
            out,
            ready: VecDeque::new(),
            inflight: 0,
            failed: false,
            done_tx,
            done_rx,
            interrupt: CancellationToken::new(),
        }
    }

    async fn run(mut self, mut cancel_rx: oneshot::Receiver<CancelRequest>) {
        debug!(streams = self.readers.len(), "mux session started");
        loop {
            self.schedule();

            if self.ready.is_empty() && self.inflight == 0 && self.readers.iter().all(|r| r.ended)
            {
                debug!("all sources ended; closing mux output");
                return;
            }
            if self.failed && self.ready.is_empty() {
                // The error has been delivered; unblock whatever is still
                // in flight and shut down.
                self.interrupt.cancel();
                while self.inflight > 0 {
                    if self.done_rx.recv().await.is_none() {
                        break;
                    }
                    self.inflight -= 1;
                }
                return;
            }

            let draining = self.inflight > 0;
            let want_demand = !self.ready.is_empty() || self.has_eligible();

            // Reserve against a cloned handle so the borrowed `Permit` does
            // not hold an immutable borrow of `self` across the other arms,
            // which need `&mut self`. The clone shares the same channel.
            let out = self.out.clone();
            tokio::select! {
                biased;

                request = &mut cancel_rx => {
                    // An Err means the handle was dropped without an
                    // explicit cancel; shut down the same way, minus the
                    // acknowledgement.
                    self.shutdown(request.ok()).await;
                    return;
                }
                Some(completion) = self.done_rx.recv(), if draining => {
                    self.complete(completion);
                }
                permit = out.reserve(), if want_demand => {
                    match permit {
                        Ok(permit) => {
                            if let Some(frame) = self.ready.pop_front() {
                                permit.send(frame);
                            }
                            // With nothing queued the permit only signaled
                            // demand; release it and let the scheduler run.
                        }
                        Err(_) => {
                            // Consumer dropped the output stream.
                            self.shutdown(None).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Demand not yet claimed by produced frames. In-flight reads
    /// deliberately do not count against it: one slow read must not absorb
    /// the session's whole demand window.
    fn demand(&self) -> usize {
        self.out.capacity().saturating_sub(self.ready.len())
    }

    fn has_eligible(&self) -> bool {
        !self.failed && self.readers.iter().any(|r| !r.ended && !r.busy)
    }

    /// Issue reads while there is unmet demand and an eligible reader.
    fn schedule(&mut self) {
        if self.failed {
            return;
        }
        while self.demand() > 0 {
            let Some(idx) = self.next_eligible() else {
                break;
            };
            self.issue_read(idx);
        }
    }

    /// Round-robin selection: the search starts just after the previously
    /// serviced id and wraps, skipping ended and busy readers.
    fn next_eligible(&self) -> Option<usize> {
        let n = self.readers.len();
        (1..=n).map(|step| (self.last_served + step) % n).find(|&idx| {
            let reader = &self.readers[idx];
            !reader.ended && !reader.busy
        })
    }

    fn issue_read(&mut self, idx: usize) {
        let reader = &mut self.readers[idx];
        let Some(mut source) = reader.source.take() else {
            return;
        };
        reader.busy = true;
        self.last_served = idx;
        self.inflight += 1;

        let id = idx as u8;
        let done = self.done_tx.clone();
        let interrupt = self.interrupt.clone();
        trace!(id, "read scheduled");
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = source.read() => match result {
                    Ok(Some(item)) => ReadOutcome::Produced(item),
                    Ok(None) => ReadOutcome::Finished,
                    Err(err) => ReadOutcome::Rejected(err),
                },
                _ = interrupt.cancelled() => ReadOutcome::Interrupted,
            };
            let _ = done.send(Completion {
                id,
                source,
                outcome,
            });
        });
    }

    fn complete(&mut self, completion: Completion<S>) {
        let Completion {
            id,
            source,
            outcome,
        } = completion;
        let reader = &mut self.readers[id as usize];
        reader.busy = false;
        self.inflight -= 1;

        if self.failed {
            // A prior rejection already failed the session.
            return;
        }

        match outcome {
            ReadOutcome::Produced(item) => {
                reader.source = Some(source);
                match frame_item(id, &item) {
                    Ok(bytes) => {
                        trace!(id, len = bytes.len(), "frame produced");
                        self.ready.push_back(Ok(bytes));
                    }
                    Err(err) => {
                        warn!(id, error = %err, "failed to encode frame");
                        self.ready.push_back(Err(err));
                        self.failed = true;
                    }
                }
            }
            ReadOutcome::Finished => {
                reader.ended = true;
                debug!(id, "source ended");
                match end_frame(id) {
                    Ok(bytes) => self.ready.push_back(Ok(bytes)),
                    Err(err) => {
                        self.ready.push_back(Err(err));
                        self.failed = true;
                    }
                }
            }
            ReadOutcome::Rejected(err) => {
                reader.source = Some(source);
                warn!(id, error = %err, "source read rejected; failing mux output");
                self.ready.push_back(Err(MuxError::Source { id, source: err }));
                self.failed = true;
            }
            ReadOutcome::Interrupted => {
                reader.source = Some(source);
            }
        }
    }

    /// Cancel the session: recover in-flight sources, forward the formatted
    /// reason to every source that has not ended, settle them all, then
    /// acknowledge.
    async fn shutdown(&mut self, request: Option<CancelRequest>) {
        let reason = cancel_reason(request.as_ref().and_then(|r| r.reason.as_deref()));
        debug!(reason = %reason, "mux session canceled");

        self.interrupt.cancel();
        while self.inflight > 0 {
            let Some(completion) = self.done_rx.recv().await else {
                break;
            };
            self.inflight -= 1;
            let reader = &mut self.readers[completion.id as usize];
            reader.busy = false;
            match completion.outcome {
                // The source finished concurrently with the cancel; it no
                // longer takes part in cancellation.
                ReadOutcome::Finished => reader.ended = true,
                _ => reader.source = Some(completion.source),
            }
        }

        let mut cancels = Vec::new();
        for reader in &mut self.readers {
            if reader.ended {
                continue;
            }
            if let Some(mut source) = reader.source.take() {
                let reason = reason.clone();
                cancels.push(async move { source.cancel(&reason).await });
            }
        }
        join_all(cancels).await;

        if let Some(request) = request {
            let _ = request.ack.send(());
        }
    }
}

fn frame_item(id: u8, item: &Item) -> Result<Bytes, MuxError> {
    let (payload, is_raw) = serialize_item(item)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(
        Header {
            id,
            end: false,
            is_raw,
        },
        &payload,
        &mut buf,
    )?;
    Ok(buf.freeze())
}

fn end_frame(id: u8) -> Result<Bytes, MuxError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + END_SENTINEL.len());
    encode_frame(
        Header {
            id,
            end: true,
            is_raw: false,
        },
        END_SENTINEL,
        &mut buf,
    )?;
    Ok(buf.freeze())
}

fn cancel_reason(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("The muxer stream was canceled: {reason}"),
        None => String::from("The muxer stream was canceled."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremux_stream::source_channel;

    struct NullSource;

    impl Source for NullSource {
        async fn read(&mut self) -> Result<Option<Item>, SourceError> {
            Ok(None)
        }

        async fn cancel(&mut self, _reason: &str) {}
    }

    fn driver(n: usize) -> MuxDriver<NullSource> {
        let (out, _rx) = mpsc::channel(1);
        MuxDriver::new((0..n).map(|_| NullSource).collect(), out)
    }

    #[test]
    fn cancel_reason_formatting() {
        assert_eq!(
            cancel_reason(Some("operator request")),
            "The muxer stream was canceled: operator request"
        );
        assert_eq!(cancel_reason(None), "The muxer stream was canceled.");
    }

    #[test]
    fn round_robin_starts_at_zero_and_wraps() {
        let mut driver = driver(3);
        assert_eq!(driver.next_eligible(), Some(0));

        driver.last_served = 0;
        assert_eq!(driver.next_eligible(), Some(1));

        driver.last_served = 2;
        assert_eq!(driver.next_eligible(), Some(0));
    }

    #[test]
    fn round_robin_skips_busy_and_ended() {
        let mut driver = driver(4);
        driver.last_served = 0;
        driver.readers[1].busy = true;
        driver.readers[2].ended = true;
        assert_eq!(driver.next_eligible(), Some(3));

        driver.readers[3].busy = true;
        assert_eq!(driver.next_eligible(), Some(0));

        driver.readers[0].ended = true;
        assert_eq!(driver.next_eligible(), None);
    }

    #[tokio::test]
    async fn empty_source_emits_exactly_one_terminal_frame() {
        let (tx, source) = source_channel(1);
        drop(tx);

        let mut combined = mux(vec![source]).unwrap();
        let frame = combined.recv().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x01, 5, 6, 5, b'n', b'u', b'l', b'l']);
        assert!(combined.recv().await.is_none());
    }

    #[tokio::test]
    async fn value_frame_wire_layout() {
        let (tx, source) = source_channel(1);
        let mut combined = mux(vec![source]).unwrap();

        tx.send(json!(7)).await.unwrap();
        let frame = combined.recv().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x01, 5, 5, 5, b'7']);
    }

    #[tokio::test]
    async fn raw_frame_sets_the_raw_flag() {
        let (tx, source) = source_channel(1);
        let mut combined = mux(vec![source]).unwrap();

        tx.send(Bytes::from_static(b"\xAB\xCD")).await.unwrap();
        let frame = combined.recv().await.unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x01, 5, 5, 6, 0xAB, 0xCD]);
    }
}
