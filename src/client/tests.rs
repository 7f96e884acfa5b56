//! Client tests against a detached channel
//!
//! No socket is involved: the test plays the server by dispatching envelopes
//! straight into the channel and reading what the client wrote.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::channel::Channel;
use super::consumer::StreamConsumer;
use crate::codec::IntoPayload;
use crate::config::LinkConfig;
use crate::error::TerminationCause;
use crate::test_utils;
use crate::types::{ImuSample, MotorCurrentSample};
use crate::wire::{Body, CallId, Envelope, ImuMessage, Operation, Outgoing, Payload};
use crate::LinkError;

fn detached(config: LinkConfig) -> (Channel, mpsc::Receiver<Outgoing>) {
    let (tx, rx) = mpsc::channel(64);
    (Channel::new(1, Arc::new(config), tx), rx)
}

fn imu_item(call: CallId, seq: u64, values: &[f32]) -> Envelope {
    Envelope::item(call, seq, Payload::Imu(ImuMessage { values: values.to_vec() }))
}

#[tokio::test]
async fn imu_values_arrive_in_order() {
    let (channel, mut wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut imu = consumer.stream_imu().await.unwrap();
    let call = imu.call();
    assert_eq!(wire.recv().await.unwrap().envelope, Envelope::open(call, Operation::StreamImu));

    channel.dispatch(imu_item(call, 1, &[1.0, 0.0, 9.8]));
    channel.dispatch(imu_item(call, 2, &[1.1, 0.0, 9.7]));
    channel.dispatch(Envelope::new(call, Body::End));

    let first = imu.next().await.unwrap().unwrap();
    let second = imu.next().await.unwrap().unwrap();
    assert_eq!(first.values(), &[1.0, 0.0, 9.8]);
    assert_eq!(second.values(), &[1.1, 0.0, 9.7]);
    assert!(imu.next().await.is_none());
    assert_eq!(imu.cause(), Some(TerminationCause::ServerEnded));
    assert_eq!(imu.received(), 2);
}

#[tokio::test]
async fn malformed_frame_is_skipped() {
    let (channel, _wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut frames = consumer.stream_image().await.unwrap();
    let call = frames.call();

    let corrupt = test_utils::corrupt_frame().into_payload();
    let valid = test_utils::sample_frame(16, 12).into_payload();
    channel.dispatch(Envelope::item(call, 1, corrupt));
    channel.dispatch(Envelope::item(call, 2, valid));

    let frame = frames.next().await.unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (16, 12));
    assert_eq!(frames.skipped(), 1);
    assert!(!frames.is_terminated());
}

#[tokio::test]
async fn schema_mismatch_ends_only_that_stream() {
    let (channel, mut wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut imu = consumer.stream_imu().await.unwrap();
    let mut current = consumer.stream_motor_current().await.unwrap();
    let (imu_call, current_call) = (imu.call(), current.call());

    channel.dispatch(imu_item(imu_call, 1, &[1.0, 2.0, 3.0, 4.0]));
    let err = imu.next().await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::SchemaMismatch { expected: 3, found: 4, .. }));
    assert!(imu.next().await.is_none());
    assert_eq!(imu.cause(), Some(TerminationCause::SchemaMismatch));

    // the server is told to stop the mismatched call
    let mut bodies = Vec::new();
    while let Ok(outgoing) = wire.try_recv() {
        bodies.push(outgoing.envelope);
    }
    assert!(bodies.contains(&Envelope::cancel(imu_call)));
    assert!(!bodies.contains(&Envelope::cancel(current_call)));

    channel.dispatch(Envelope::item(
        current_call,
        1,
        MotorCurrentSample::from_raw(1234567890123456789).into_payload(),
    ));
    assert_eq!(current.next().await.unwrap().unwrap().raw(), 1234567890123456789);
}

#[tokio::test(start_paused = true)]
async fn silent_stream_fails_with_idle_timeout() {
    let config = LinkConfig { idle_timeout_ms: Some(200), ..LinkConfig::default() };
    let (channel, _wire) = detached(config);
    let mut imu = StreamConsumer::new(channel).stream_imu().await.unwrap();

    match imu.next().await {
        Some(Err(LinkError::StreamTerminated { cause: TerminationCause::IdleTimeout(idle) })) => {
            assert_eq!(idle, Duration::from_millis(200));
        }
        other => panic!("expected idle timeout, got {other:?}"),
    }
    assert!(imu.next().await.is_none());
}

#[tokio::test]
async fn server_error_surfaces_as_termination() {
    let (channel, _wire) = detached(LinkConfig::default());
    let mut imu = StreamConsumer::new(channel.clone()).stream_imu().await.unwrap();
    channel.dispatch(Envelope::new(imu.call(), Body::Error("IMU bus fault".into())));

    let err = imu.next().await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        LinkError::StreamTerminated { cause: TerminationCause::Remote(ref reason) } if reason == "IMU bus fault"
    ));
    assert!(imu.next().await.is_none());
}

#[tokio::test]
async fn cancelling_one_stream_leaves_siblings_running() {
    let (channel, mut wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut frames = consumer.stream_frames().await.unwrap();
    let mut imu = consumer.stream_imu().await.unwrap();
    let (frames_call, imu_call) = (frames.call(), imu.call());

    let handle = frames.cancel_handle();
    handle.cancel();
    handle.cancel();
    assert!(frames.next().await.is_none());
    assert_eq!(frames.cause(), Some(TerminationCause::Cancelled));

    let mut cancels = 0;
    while let Ok(Outgoing { envelope, .. }) = wire.try_recv() {
        if envelope == Envelope::cancel(frames_call) {
            cancels += 1;
        }
        assert_ne!(envelope, Envelope::cancel(imu_call));
    }
    assert_eq!(cancels, 1);

    channel.dispatch(imu_item(imu_call, 1, &[0.0, 0.0, 9.8]));
    assert_eq!(imu.next().await.unwrap().unwrap(), ImuSample::from([0.0, 0.0, 9.8]));
    assert_eq!(channel.open_calls(), 1);
}

#[tokio::test]
async fn dropping_subscription_cancels_call() {
    let (channel, mut wire) = detached(LinkConfig::default());
    let imu = StreamConsumer::new(channel.clone()).stream_imu().await.unwrap();
    let call = imu.call();
    drop(imu);

    assert_eq!(wire.recv().await.unwrap().envelope, Envelope::open(call, Operation::StreamImu));
    assert_eq!(wire.recv().await.unwrap().envelope, Envelope::cancel(call));
    assert_eq!(channel.open_calls(), 0);
}

#[tokio::test]
async fn sequence_gaps_are_counted() {
    let (channel, _wire) = detached(LinkConfig::default());
    let mut imu = StreamConsumer::new(channel.clone()).stream_imu().await.unwrap();
    let call = imu.call();

    channel.dispatch(imu_item(call, 1, &[0.0; 3]));
    channel.dispatch(imu_item(call, 4, &[0.0; 3]));
    imu.next().await.unwrap().unwrap();
    imu.next().await.unwrap().unwrap();
    assert_eq!(imu.missed(), 2);
}

#[tokio::test]
async fn connection_loss_ends_every_stream() {
    let (channel, _wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut imu = consumer.stream_imu().await.unwrap();
    let mut current = consumer.stream_motor_current().await.unwrap();

    channel.fail_all(TerminationCause::Transport("connection reset".into()));
    assert!(matches!(
        imu.next().await,
        Some(Err(LinkError::StreamTerminated { cause: TerminationCause::Transport(_) }))
    ));
    assert!(matches!(
        current.next().await,
        Some(Err(LinkError::StreamTerminated { cause: TerminationCause::Transport(_) }))
    ));
    assert!(channel.is_closed());
    assert!(matches!(consumer.stream_imu().await, Err(LinkError::Connection { .. })));
}

#[tokio::test]
async fn decoder_must_match_operation() {
    let (channel, _wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel);
    let err = consumer
        .subscribe(Operation::StreamImage, crate::codec::MotorCurrentDecoder)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Protocol { .. }));
    let err = consumer
        .subscribe(Operation::StreamMotorCommand, crate::codec::MotorCurrentDecoder)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Protocol { .. }));
}

#[tokio::test]
async fn wrong_payload_variant_ends_stream_as_protocol_violation() {
    let (channel, _wire) = detached(LinkConfig::default());
    let mut imu = StreamConsumer::new(channel.clone()).stream_imu().await.unwrap();
    let call = imu.call();

    channel.dispatch(Envelope::item(call, 1, MotorCurrentSample::from_raw(5).into_payload()));
    let err = imu.next().await.unwrap().unwrap_err();
    assert!(matches!(err, LinkError::Protocol { .. }));
    assert!(imu.next().await.is_none());
    assert!(matches!(imu.cause(), Some(TerminationCause::Protocol(_))));
}

#[tokio::test]
async fn write_failure_cause_survives_the_close_it_triggers() {
    let (channel, _wire) = detached(LinkConfig::default());
    let consumer = StreamConsumer::new(channel.clone());
    let mut imu = consumer.stream_imu().await.unwrap();
    let mut current = consumer.stream_motor_current().await.unwrap();

    let first = channel.fail_all(TerminationCause::Transport("broken pipe".into()));
    // the reader then sees the closed token and reports a plain close
    let second = channel.fail_all(TerminationCause::ConnectionClosed);
    assert_eq!(first, TerminationCause::Transport("broken pipe".into()));
    assert_eq!(second, first);

    assert!(matches!(
        imu.next().await,
        Some(Err(LinkError::StreamTerminated { cause: TerminationCause::Transport(_) }))
    ));
    assert!(matches!(
        current.next().await,
        Some(Err(LinkError::StreamTerminated { cause: TerminationCause::Transport(_) }))
    ));
    assert_eq!(imu.cause(), Some(TerminationCause::Transport("broken pipe".into())));
}
