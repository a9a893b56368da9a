//! Request/response facades handlers see instead of raw HTTP/2 DATA frames. Both
//! directions are just streams of already-gRPC-framed message bytes; a unary or
//! server-streaming RPC simply reads/writes exactly one message through them.

use bytes::Bytes;
use tokio::sync::mpsc;

/// The inbound half of a call: one message for unary/server-streaming RPCs, any number for
/// client-streaming/bidi.
pub struct RequestStream {
    rx: mpsc::Receiver<Bytes>,
}

impl RequestStream {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Build a connected pair for feeding a handler directly (used by the connection driver and
    /// by tests).
    pub fn channel(buffer: usize) -> (Self, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(rx), tx)
    }

    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("response receiver has gone away")]
pub struct SendError;

/// The outbound half of a call: one message for unary/client-streaming RPCs, any number for
/// server-streaming/bidi. Sending fails once the connection driver has stopped reading (client
/// disconnected, deadline expired, or the stream was reset).
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Bytes>,
}

impl ResponseSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub async fn send(&self, message: Bytes) -> Result<(), SendError> {
        self.tx.send(message).await.map_err(|_| SendError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_stream_yields_pushed_messages_in_order() {
        let (mut stream, tx) = RequestStream::channel(4);
        tx.send(Bytes::from_static(b"one")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();
        drop(tx);
        assert_eq!(stream.next().await, Some(Bytes::from_static(b"one")));
        assert_eq!(stream.next().await, Some(Bytes::from_static(b"two")));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn response_sink_send_fails_after_receiver_drop() {
        let (sink, rx) = ResponseSink::channel(1);
        drop(rx);
        assert!(sink.send(Bytes::from_static(b"x")).await.is_err());
    }
}
