use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use wiremux_frame::{decode_frame, deserialize_item, Frame};
use wiremux_stream::Item;

use crate::config::DemuxConfig;
use crate::error::DemuxError;

type OutputSender = mpsc::Sender<Result<Item, DemuxError>>;

/// Split a combined framed byte stream back into `count` output streams.
///
/// All `count` outputs are registered before any input is consumed, so
/// consumers may attach to any of them immediately, independent of
/// arrival order. Reassembly is insensitive to how the transport chunked
/// the wire: one incoming chunk may complete zero, one, or many frames.
///
/// Fails synchronously if `count` is zero. The reassembly task runs on
/// the ambient Tokio runtime.
pub fn demux<I, E>(input: I, count: usize) -> Result<Vec<DemuxStream>, DemuxError>
where
    I: futures_core::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    demux_with_config(input, count, DemuxConfig::default())
}

/// [`demux`] with an explicit configuration.
pub fn demux_with_config<I, E>(
    input: I,
    count: usize,
    config: DemuxConfig,
) -> Result<Vec<DemuxStream>, DemuxError>
where
    I: futures_core::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    if count == 0 {
        return Err(DemuxError::InvalidStreamCount);
    }

    let mut senders = Vec::with_capacity(count);
    let mut outputs = Vec::with_capacity(count);
    for _ in 0..count {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        senders.push(Some(tx));
        outputs.push(DemuxStream { rx });
    }

    tokio::spawn(drive(input, senders));
    Ok(outputs)
}

/// One reconstructed output stream produced by [`demux`].
pub struct DemuxStream {
    rx: mpsc::Receiver<Result<Item, DemuxError>>,
}

impl DemuxStream {
    /// Receive the next item.
    ///
    /// Returns `None` once the terminal frame for this stream's id has
    /// been processed, or when the combined input ends.
    pub async fn recv(&mut self) -> Option<Result<Item, DemuxError>> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for DemuxStream {
    type Item = Result<Item, DemuxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn drive<I, E>(input: I, mut outputs: Vec<Option<OutputSender>>)
where
    I: futures_core::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    debug!(streams = outputs.len(), "demux session started");
    let mut input = std::pin::pin!(input);
    let mut buf = BytesMut::new();

    loop {
        match input.next().await {
            Some(Ok(chunk)) => {
                buf.extend_from_slice(&chunk);
                if !drain_frames(&mut buf, false, &mut outputs).await {
                    return;
                }
            }
            Some(Err(err)) => {
                let message = err.to_string();
                warn!(error = %message, "demux input aborted");
                fail_all(&mut outputs, DemuxError::Aborted(message));
                return;
            }
            None => {
                // Input ended: flush the tail frame, then let the dropped
                // senders close every remaining output.
                if drain_frames(&mut buf, true, &mut outputs).await {
                    debug!("demux input ended; closing remaining outputs");
                }
                return;
            }
        }
    }
}

/// Decode and route every complete frame in `buf`. Returns false once the
/// session has failed and the driver should stop.
async fn drain_frames(
    buf: &mut BytesMut,
    eof: bool,
    outputs: &mut Vec<Option<OutputSender>>,
) -> bool {
    loop {
        match decode_frame(buf, eof) {
            Ok(Some(frame)) => {
                if let Err(err) = route(frame, outputs).await {
                    fail_all(outputs, err);
                    return false;
                }
            }
            Ok(None) => return true,
            Err(err) => {
                warn!(error = %err, "malformed frame on demux input");
                fail_all(outputs, DemuxError::Frame(err));
                return false;
            }
        }
    }
}

async fn route(frame: Frame, outputs: &mut [Option<OutputSender>]) -> Result<(), DemuxError> {
    let id = frame.header.id;
    let idx = id as usize;
    if idx >= outputs.len() {
        return Err(DemuxError::UnknownStreamId {
            id,
            count: outputs.len(),
        });
    }

    if frame.header.end {
        trace!(id, "terminal frame; closing output");
        outputs[idx] = None;
        return Ok(());
    }

    let Some(tx) = outputs[idx].clone() else {
        // Frames after the terminal frame for an id are dropped.
        trace!(id, "frame for closed output dropped");
        return Ok(());
    };
    let item = deserialize_item(frame.payload, frame.header.is_raw);
    trace!(id, "item routed");
    if tx.send(Ok(item)).await.is_err() {
        // The consumer went away; treat the entry as closed.
        outputs[idx] = None;
    }
    Ok(())
}

/// Deliver `error` to every still-open output. Each delivery runs on its
/// own task so one stalled consumer cannot delay the others.
fn fail_all(outputs: &mut [Option<OutputSender>], error: DemuxError) {
    for slot in outputs.iter_mut() {
        if let Some(tx) = slot.take() {
            let error = error.clone();
            tokio::spawn(async move {
                let _ = tx.send(Err(error)).await;
            });
        }
    }
}
