//! Length-delimited postcard codec for envelopes

use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::messages::Envelope;
use crate::{LinkError, Result};

/// Frames [`Envelope`]s on a byte stream.
///
/// An inbound frame over the limit is a connection-level error. A frame that
/// passes the length check but fails to deserialize is logged and skipped. An
/// outbound envelope over the limit is refused with
/// [`LinkError::MessageTooLarge`] and nothing is written.
#[derive(Debug)]
pub struct WireCodec {
    frames: LengthDelimitedCodec,
    max_message_bytes: usize,
    malformed: u64,
}

impl WireCodec {
    pub fn new(max_message_bytes: usize) -> Self {
        let frames = LengthDelimitedCodec::builder().max_frame_length(max_message_bytes).new_codec();
        Self { frames, max_message_bytes, malformed: 0 }
    }

    /// Envelopes discarded because they failed to deserialize
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

impl Decoder for WireCodec {
    type Item = Envelope;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        loop {
            let Some(frame) = self.frames.decode(src)? else {
                return Ok(None);
            };
            match postcard::from_bytes::<Envelope>(&frame) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    self.malformed += 1;
                    warn!(len = frame.len(), malformed = self.malformed, "Discarding malformed envelope: {}", e);
                }
            }
        }
    }
}

impl Encoder<Envelope> for WireCodec {
    type Error = LinkError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<()> {
        let encoded = postcard::to_allocvec(&envelope)
            .map_err(|e| LinkError::protocol(format!("failed to serialize envelope: {}", e)))?;
        if encoded.len() > self.max_message_bytes {
            return Err(LinkError::MessageTooLarge {
                size: encoded.len(),
                max: self.max_message_bytes,
            });
        }
        self.frames.encode(Bytes::from(encoded), dst)?;
        Ok(())
    }
}

/// An envelope queued for the socket writer.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) envelope: Envelope,
    written: Option<oneshot::Sender<()>>,
}

impl Outgoing {
    /// Queue an envelope and learn when it reached the socket. The receiver
    /// also resolves (with an error) if the envelope is discarded instead.
    pub(crate) fn tracked(envelope: Envelope) -> (Self, oneshot::Receiver<()>) {
        let (written, done) = oneshot::channel();
        (Self { envelope, written: Some(written) }, done)
    }
}

impl From<Envelope> for Outgoing {
    fn from(envelope: Envelope) -> Self {
        Self { envelope, written: None }
    }
}

/// Socket writer task shared by both roles.
///
/// Every call task funnels its envelopes through one channel, so writes to the
/// socket never interleave. An envelope the codec refuses is dropped and the
/// connection carries on; the receiving side sees a sequence gap on that call
/// only. An I/O failure stops the writer and is returned so the caller can
/// tear the connection down with the real cause.
pub(crate) async fn write_envelopes<W>(
    mut sink: FramedWrite<W, WireCodec>,
    mut outbound: mpsc::Receiver<Outgoing>,
    cancel: CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut oversized = 0u64;
    let result = loop {
        let outgoing = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            outgoing = outbound.recv() => match outgoing {
                Some(outgoing) => outgoing,
                None => break Ok(()),
            },
        };
        let Outgoing { envelope, written: done } = outgoing;
        let call = envelope.call;
        match sink.send(envelope).await {
            Ok(()) => {
                written += 1;
                if let Some(done) = done {
                    let _ = done.send(());
                }
                trace!(written, "Envelope written");
            }
            Err(LinkError::MessageTooLarge { size, max }) => {
                oversized += 1;
                warn!(%call, size, max, oversized, "Dropping envelope over the message limit");
            }
            Err(e) => break Err(e),
        }
    };

    if result.is_ok() {
        if let Err(e) = sink.close().await {
            debug!("Closing connection writer: {}", e);
        }
    }
    debug!(written, oversized, "Connection writer stopped");
    result.map(|()| written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{
        Body, CallId, ImageMessage, ImuMessage, MotorCurrentMessage, Operation, Payload,
    };

    fn encode_all(codec: &mut WireCodec, envelopes: &[Envelope]) -> BytesMut {
        let mut buf = BytesMut::new();
        for envelope in envelopes {
            codec.encode(envelope.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn decodes_back_to_back_envelopes() {
        let mut codec = WireCodec::new(1024);
        let sent = vec![
            Envelope::open(CallId(1), Operation::StreamImu),
            Envelope::item(
                CallId(1),
                1,
                Payload::Imu(ImuMessage { values: vec![1.0, 0.0, 9.8] }),
            ),
            Envelope::item(
                CallId(2),
                1,
                Payload::MotorCurrent(MotorCurrentMessage { value: u64::MAX }),
            ),
            Envelope::new(CallId(1), Body::End),
        ];
        let mut buf = encode_all(&mut codec, &sent);

        let mut received = Vec::new();
        while let Some(envelope) = codec.decode(&mut buf).unwrap() {
            received.push(envelope);
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = WireCodec::new(1024);
        let full = encode_all(&mut codec, &[Envelope::cancel(CallId(3))]);

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Envelope::cancel(CallId(3))));
    }

    #[test]
    fn malformed_envelope_is_skipped() {
        let mut codec = WireCodec::new(1024);
        let mut buf = BytesMut::new();
        // a length-prefixed frame with an invalid body variant
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&[0x01, 0x7f]);
        buf.extend_from_slice(&encode_all(&mut codec, &[Envelope::cancel(CallId(9))]));

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Envelope::cancel(CallId(9))));
        assert_eq!(codec.malformed(), 1);
    }

    #[test]
    fn oversized_envelope_is_refused_without_writing() {
        let mut codec = WireCodec::new(64);
        let mut buf = BytesMut::new();
        let big = Envelope::item(
            CallId(1),
            1,
            Payload::Image(ImageMessage { data: Bytes::from(vec![0u8; 256]) }),
        );
        let err = codec.encode(big, &mut buf).unwrap_err();
        assert!(matches!(err, LinkError::MessageTooLarge { max: 64, .. }));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn writer_skips_oversized_envelope_and_keeps_going() {
        use futures::StreamExt;

        let (client, server) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::channel(8);
        let writer = tokio::spawn(write_envelopes(
            FramedWrite::new(client, WireCodec::new(128)),
            rx,
            CancellationToken::new(),
        ));

        let big = Envelope::item(
            CallId(1),
            1,
            Payload::Image(ImageMessage { data: Bytes::from(vec![0u8; 1024]) }),
        );
        let (big, big_written) = Outgoing::tracked(big);
        let small = Envelope::item(
            CallId(2),
            1,
            Payload::MotorCurrent(MotorCurrentMessage { value: 7 }),
        );
        let (small_out, small_written) = Outgoing::tracked(small.clone());
        tx.send(big).await.unwrap();
        tx.send(small_out).await.unwrap();
        drop(tx);

        assert!(big_written.await.is_err());
        assert!(small_written.await.is_ok());
        assert_eq!(writer.await.unwrap().unwrap(), 1);

        let mut reader = tokio_util::codec::FramedRead::new(server, WireCodec::new(128));
        assert_eq!(reader.next().await.unwrap().unwrap(), small);
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut codec = WireCodec::new(64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(codec.decode(&mut buf), Err(LinkError::Io(_))));
    }
}
