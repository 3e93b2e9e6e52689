//! Transport plumbing shared by the pipe, stream, and delegated modes.
//!
//! A running endpoint has a single reader task (one outstanding read,
//! frames surfaced in arrival order) and, unless writes are delegated to
//! an external callback, a single writer task that serializes frames in
//! submission order. Both tasks hold only weak context: aborting them at
//! teardown drops the underlying descriptors.

use bytes::Bytes;
use extbridge_core::{FrameCodec, ProtocolError};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::error::BridgeError;

/// Boxed read half of whatever byte stream the endpoint is bound to.
pub(crate) type DynReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of whatever byte stream the endpoint is bound to.
pub(crate) type DynWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Delegated write hook for streams owned by another subsystem.
///
/// Invoked with fully framed bytes under the endpoint lock; the callback
/// must not call back into the endpoint.
pub type WriteCallback = std::sync::Arc<dyn Fn(Bytes) -> std::io::Result<()> + Send + Sync>;

/// The active outbound sink of an endpoint. At most one is installed.
pub(crate) enum WriteSink {
    /// No transport attached.
    None,
    /// Writer task fed through an in-order channel (pipes or stream).
    Task(mpsc::UnboundedSender<Bytes>),
    /// Delegated to an external callback.
    Callback(WriteCallback),
}

impl WriteSink {
    /// True when any sink is installed.
    pub(crate) const fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Hand one framed buffer to the sink.
    pub(crate) fn send(&self, frame: Bytes) -> Result<(), BridgeError> {
        match self {
            Self::None => Err(BridgeError::NoConnection),
            Self::Task(tx) => tx.send(frame).map_err(|_| BridgeError::WriteFailure),
            Self::Callback(cb) => cb(frame).map_err(|err| {
                debug!(%err, "delegated write callback failed");
                BridgeError::WriteFailure
            }),
        }
    }
}

/// Spawn the writer task for a stream-backed endpoint.
///
/// Frames submitted to the returned channel are written in order.
/// `on_error` fires once on the first failed write; closing the channel
/// ends the task silently (that is the teardown path).
pub(crate) fn spawn_writer(
    mut writer: DynWriter,
    on_error: impl FnOnce() + Send + 'static,
) -> (mpsc::UnboundedSender<Bytes>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = writer.write_all(&frame).await {
                debug!(%err, "transport write failed");
                on_error();
                return;
            }
        }
    });

    (tx, handle)
}

/// Spawn the reader task for a stream-backed endpoint.
///
/// `on_frame` receives each verified payload in wire order and returns
/// whether to keep reading. `on_close` fires exactly once when the
/// stream ends: `None` for a clean EOF, `Some(err)` for a protocol or
/// I/O failure. An aborted task fires neither (self-cancellation is
/// silent).
pub(crate) fn spawn_reader(
    reader: DynReader,
    on_frame: impl Fn(Bytes) -> bool + Send + 'static,
    on_close: impl FnOnce(Option<ProtocolError>) + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut framed = FramedRead::new(reader, FrameCodec::new());
        loop {
            match framed.next().await {
                Some(Ok(frame)) => {
                    if !on_frame(frame) {
                        return;
                    }
                }
                Some(Err(err)) => {
                    on_close(Some(err));
                    return;
                }
                None => {
                    on_close(None);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use extbridge_core::FRAME_SIGNATURE;
    use tokio_util::codec::Encoder;

    use super::*;

    fn frame(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        FrameCodec::new().encode(payload, &mut buf).unwrap();
        buf.freeze()
    }

    #[tokio::test]
    async fn test_reader_delivers_frames_then_reports_eof() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();

        let _reader = spawn_reader(
            Box::new(server),
            move |payload| frame_tx.send(payload).is_ok(),
            move |reason| {
                let _ = close_tx.send(reason);
            },
        );

        client.write_all(&frame(b"one")).await.unwrap();
        client.write_all(&frame(b"two")).await.unwrap();

        assert_eq!(frame_rx.recv().await.unwrap().as_ref(), b"one");
        assert_eq!(frame_rx.recv().await.unwrap().as_ref(), b"two");

        drop(client);
        assert!(close_rx.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_desync() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();

        let _reader = spawn_reader(
            Box::new(server),
            |_| true,
            move |reason| {
                let _ = close_tx.send(reason);
            },
        );

        let mut bad = BytesMut::from(frame(b"payload").as_ref());
        bad[0] ^= 0xFF;
        client.write_all(&bad).await.unwrap();

        match close_rx.await.unwrap() {
            Some(ProtocolError::Desync { expected, .. }) => {
                assert_eq!(expected, FRAME_SIGNATURE);
            }
            other => panic!("expected desync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_writer_preserves_submission_order() {
        let (client, server) = tokio::io::duplex(4096);
        let (tx, _handle) = spawn_writer(Box::new(server), || {});

        tx.send(frame(b"first")).unwrap();
        tx.send(frame(b"second")).unwrap();

        let mut framed = FramedRead::new(client, FrameCodec::new());
        assert_eq!(framed.next().await.unwrap().unwrap().as_ref(), b"first");
        assert_eq!(framed.next().await.unwrap().unwrap().as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_writer_error_fires_once() {
        let (client, server) = tokio::io::duplex(16);
        drop(client);

        let (error_tx, error_rx) = tokio::sync::oneshot::channel();
        let (tx, handle) = spawn_writer(Box::new(server), move || {
            let _ = error_tx.send(());
        });

        tx.send(frame(b"doomed")).unwrap();
        error_rx.await.unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_sink_without_transport_rejects() {
        let sink = WriteSink::None;
        assert!(!sink.is_active());
        assert!(matches!(
            sink.send(Bytes::from_static(b"x")),
            Err(BridgeError::NoConnection)
        ));
    }
}
