// Integration tests for the synchronized motion coordinator

mod common;

use axl_rs::motion::{Coordinator, HaltReason, MotionError, QueueState};
use common::{Call, Failure, RecordingActuator, approx, test_config};
use std::sync::Arc;
use std::time::Duration;

fn machine(limits: &[(f64, f64)]) -> (Coordinator<RecordingActuator>, Vec<Arc<RecordingActuator>>) {
    let axes: Vec<Arc<RecordingActuator>> = limits
        .iter()
        .map(|&(v, a)| Arc::new(RecordingActuator::new(v, a)))
        .collect();
    let coordinator = Coordinator::new(axes.clone(), &test_config()).unwrap();
    (coordinator, axes)
}

fn absolute_call(axis: &RecordingActuator) -> Option<Call> {
    axis.calls().into_iter().rev().find(|c| matches!(c, Call::Absolute { .. }))
}

#[tokio::test]
async fn test_absolute_scales_to_slowest_axis() {
    let (mut c, axes) = machine(&[(5.0, 1000.0), (20.0, 1000.0)]);
    c.absolute(&[0.0, 0.0], Some(10.0), Some(5.0)).await.unwrap();
    // already there: nothing to dispatch
    assert!(absolute_call(&axes[0]).is_none());

    c.absolute(&[10.0, 0.0], Some(10.0), Some(5.0)).await.unwrap();
    match absolute_call(&axes[0]) {
        Some(Call::Absolute { pos, vel: Some(v), accel: Some(a) }) => {
            assert_eq!(pos, 10.0);
            assert!(approx(v, 5.0));
            assert!(approx(a, 2.5));
        }
        other => panic!("unexpected {other:?}"),
    }
    match absolute_call(&axes[1]) {
        Some(Call::Absolute { pos, vel: Some(v), accel: Some(a) }) => {
            assert_eq!(pos, 0.0);
            assert_eq!(v, 0.0);
            assert_eq!(a, 0.0);
        }
        other => panic!("unexpected {other:?}"),
    }
    // the requested values stay modal, not the scaled ones
    assert_eq!(c.last_velocity(), 10.0);
}

#[tokio::test]
async fn test_absolute_uses_cached_position() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.absolute(&[1.0, 1.0], None, None).await.unwrap();
    let queries = |a: &RecordingActuator| a.calls().iter().filter(|c| **c == Call::GetState).count();
    assert_eq!(queries(&axes[0]), 1);
    c.absolute(&[2.0, 3.0], None, None).await.unwrap();
    c.relative(&[1.0, -1.0], None, None).await.unwrap();
    assert_eq!(queries(&axes[0]), 1);
    assert!(matches!(absolute_call(&axes[1]), Some(Call::Absolute { pos, .. }) if pos == 2.0));
}

fn absolute_vel(axis: &RecordingActuator) -> Option<f64> {
    match absolute_call(axis) {
        Some(Call::Absolute { vel, .. }) => vel,
        _ => None,
    }
}

fn absolute_accel(axis: &RecordingActuator) -> Option<f64> {
    match absolute_call(axis) {
        Some(Call::Absolute { accel, .. }) => accel,
        _ => None,
    }
}

#[tokio::test]
async fn test_modal_velocity_and_accel() {
    let (mut c, axes) = machine(&[(1000.0, 10000.0)]);
    c.absolute(&[5.0], Some(7.0), Some(70.0)).await.unwrap();
    c.absolute(&[1.0], None, Some(0.0)).await.unwrap();
    assert_eq!(absolute_vel(&axes[0]), Some(7.0));
    assert_eq!(absolute_accel(&axes[0]), Some(70.0));

    // velocity moves only touch the modal acceleration
    c.velocity(&[3.0], Some(30.0)).await.unwrap();
    assert_eq!(c.last_velocity(), 7.0);
    assert_eq!(c.last_accel(), 30.0);
}

#[tokio::test]
async fn test_target_invalidates_cached_position() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.absolute(&[1.0, 1.0], None, None).await.unwrap();
    c.target(&[4.0, 4.0], Some(&[1.0, 2.0][..]), None).await.unwrap();
    assert!(axes[1].calls().contains(&Call::Target {
        pos: 4.0,
        vel: Some(2.0),
        accel: None
    }));
    axes[0].clear_calls();
    c.absolute(&[0.0, 0.0], None, None).await.unwrap();
    assert_eq!(axes[0].calls()[0], Call::GetState);
}

#[tokio::test]
async fn test_mismatched_vectors_never_reach_actuators() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    let err = c.set_position(&[1.0, 2.0, 3.0]).await.unwrap_err();
    assert!(matches!(err, MotionError::DimensionMismatch { expected: 2, got: 3 }));
    assert!(c.absolute(&[1.0], None, None).await.is_err());
    assert!(c.velocity(&[1.0, 2.0, 3.0], None).await.is_err());
    assert!(c.add_move_to_queue(&[1.0], None, None).await.is_err());
    assert!(c.target(&[1.0, 1.0], Some(&[1.0][..]), None).await.is_err());
    for axis in &axes {
        assert!(axis.calls().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_rates_fail_before_any_call() {
    let (mut c, axes) = machine(&[(100.0, 1000.0)]);
    assert!(matches!(
        c.absolute(&[1.0], Some(-1.0), None).await,
        Err(MotionError::Invalid(_))
    ));
    assert!(c.add_move_to_queue(&[1.0], None, Some(f64::NAN)).await.is_err());
    assert!(c.absolute(&[f64::INFINITY], None, None).await.is_err());
    assert!(c.set_velocity(0.0).is_err());
    assert!(axes[0].calls().is_empty());
    assert_eq!(c.last_velocity(), 100.0);
}

#[tokio::test]
async fn test_set_position_updates_cache() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.set_position(&[3.0, 4.0]).await.unwrap();
    assert_eq!(axes[1].calls(), vec![Call::SetPosition(4.0)]);
    c.absolute(&[3.0, 5.0], None, None).await.unwrap();
    assert!(!axes[0].calls().contains(&Call::GetState));
}

#[tokio::test]
async fn test_zero_velocity_vector_stops_at_axis_limits() {
    let (mut c, axes) = machine(&[(100.0, 40.0), (100.0, 1000.0)]);
    c.velocity(&[0.0, 0.0], Some(200.0)).await.unwrap();
    assert_eq!(
        axes[0].calls(),
        vec![Call::Velocity {
            vel: 0.0,
            accel: Some(40.0)
        }]
    );
    assert_eq!(
        axes[1].calls(),
        vec![Call::Velocity {
            vel: 0.0,
            accel: Some(200.0)
        }]
    );
}

#[tokio::test]
async fn test_velocity_keeps_direction_when_scaled() {
    let (mut c, axes) = machine(&[(3.0, 1000.0), (100.0, 1000.0)]);
    c.velocity(&[-6.0, 8.0], Some(10.0)).await.unwrap();
    // axis 0 would need 6 u/s against a limit of 3
    match &axes[0].calls()[0] {
        Call::Velocity { vel, .. } => assert!(approx(*vel, -3.0)),
        other => panic!("unexpected {other:?}"),
    }
    match &axes[1].calls()[0] {
        Call::Velocity { vel, .. } => assert!(approx(*vel, 4.0)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_dispatch_failure_reports_possible_motion() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.absolute(&[0.0, 0.0], None, None).await.unwrap();
    axes[1].fail_with(Some(Failure::NotSent));
    match c.absolute(&[1.0, 1.0], None, None).await {
        Err(MotionError::Dispatch {
            operation,
            failures,
            completed,
            motion_started,
        }) => {
            assert_eq!(operation, "absolute");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].actuator, 1);
            assert_eq!(completed, vec![0]);
            assert!(motion_started);
        }
        other => panic!("unexpected {other:?}"),
    }
    // position is unknown now and gets re-read
    axes[1].fail_with(None);
    axes[0].clear_calls();
    c.absolute(&[2.0, 2.0], None, None).await.unwrap();
    assert_eq!(axes[0].calls()[0], Call::GetState);
}

#[tokio::test]
async fn test_query_failure_is_not_motion() {
    let (c, axes) = machine(&[(100.0, 1000.0)]);
    axes[0].fail_with(Some(Failure::NoAck));
    assert!(matches!(
        c.get_position().await,
        Err(MotionError::Dispatch {
            motion_started: false,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_queued_move_unit_and_distance() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0), (100.0, 1000.0)]);
    let n = c.add_move_to_queue(&[5.0, 5.0, 5.0], Some(10.0), Some(10.0)).await.unwrap();
    assert_eq!(n, 0);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = axes[2].transmitted();
    assert_eq!(sent.len(), 1);
    let segment = &sent[0];
    let third = 1.0 / 3f64.sqrt();
    for i in 0..3 {
        assert!(approx(segment.unit[i], third));
    }
    assert!(segment.unit[3..].iter().all(|u| *u == 0.0));
    assert!(approx(segment.distance, 5.0 * 3f64.sqrt()));
    assert!(approx(segment.vmax, 10.0));
    assert!(approx(segment.vi, 2.5));
    assert!(approx(segment.vf, 2.5));
    assert!(segment.is_last);
}

#[tokio::test(start_paused = true)]
async fn test_queued_segments_chain_from_last_target() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.add_move_to_queue(&[10.0, 0.0], None, None).await.unwrap();
    c.add_move_to_queue(&[10.0, 10.0], None, None).await.unwrap();
    assert!(matches!(
        c.add_move_to_queue(&[10.0, 10.0], None, None).await,
        Err(MotionError::ZeroLengthMove)
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = axes[0].transmitted();
    assert_eq!(sent.len(), 2);
    assert!(approx(sent[1].unit[0], 0.0));
    assert!(approx(sent[1].unit[1], 1.0));
    assert!(approx(sent[1].distance, 10.0));
    // one position query for the first segment only
    let queries = axes[0].calls().iter().filter(|c| **c == Call::GetState).count();
    assert_eq!(queries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_segment_numbers_are_gapless() {
    let (mut c, axes) = machine(&[(100.0, 1000.0)]);
    axes[0].set_auto_complete(true);
    let mut numbers = Vec::new();
    for i in 1..=40 {
        numbers.push(c.add_move_to_queue(&[i as f64], None, None).await.unwrap());
        if i % 7 == 0 {
            tokio::time::sleep(Duration::from_millis(80)).await;
        }
    }
    assert_eq!(numbers, (0..40).collect::<Vec<u32>>());
    c.drain_queue().await.unwrap();
    assert_eq!(c.queue_stats().await.unwrap().retired, 40);
}

#[tokio::test(start_paused = true)]
async fn test_window_limits_in_flight_segments() {
    let axes: Vec<Arc<RecordingActuator>> = (0..2).map(|_| Arc::new(RecordingActuator::new(100.0, 1000.0))).collect();
    let mut config = test_config();
    config.remote_window = 4;
    let mut c = Coordinator::new(axes.clone(), &config).unwrap();
    for i in 1..=10 {
        c.add_move_to_queue(&[i as f64, 0.0], None, None).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(axes[0].transmitted().len(), 3);

    for retire in 0..7u32 {
        let stats = c.queue_stats().await.unwrap();
        assert!(stats.in_flight <= 3, "{} in flight", stats.in_flight);
        for axis in &axes {
            axis.complete(retire);
        }
        let stats = c.queue_stats().await.unwrap();
        assert_eq!(stats.retired, retire as u64 + 1);
        assert!(stats.in_flight <= 3);
    }
    let numbers: Vec<u32> = axes[1].transmitted().iter().map(|s| s.segment_number).collect();
    assert_eq!(numbers, (0..10).collect::<Vec<u32>>());
}

#[tokio::test(start_paused = true)]
async fn test_segment_retires_only_when_every_actuator_reports() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0), (100.0, 1000.0)]);
    c.add_move_to_queue(&[1.0, 1.0, 0.0], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    axes[0].complete(0);
    axes[2].complete(0);
    // duplicate and stray numbers don't count
    axes[2].complete(0);
    axes[1].complete(7);
    let stats = c.queue_stats().await.unwrap();
    assert_eq!(stats.retired, 0);
    assert_eq!(stats.length, 1);
    assert_eq!(stats.ignored_acks, 2);

    axes[1].complete(0);
    let stats = c.queue_stats().await.unwrap();
    assert_eq!(stats.retired, 1);
    assert_eq!(stats.state, QueueState::Empty);
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_busy_queue_until_resumed() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    for i in 1..=5 {
        c.add_move_to_queue(&[i as f64, 0.0], None, None).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.velocity(&[1.0, 1.0], None).await.unwrap();
    c.stop().await.unwrap();
    let preempted = HaltReason::Preempted { operation: "velocity" };

    for axis in &axes {
        assert_eq!(axis.velocity_state(), 0.0);
        assert!(axis.calls().contains(&Call::Stop));
    }
    assert!(c.get_velocity().await.unwrap().iter().all(|v| v.abs() < 1e-3));
    // the velocity command halted the queue first and its reason sticks
    assert_eq!(
        c.queue_stats().await.unwrap().state,
        QueueState::Halted(preempted.clone())
    );
    match c.add_move_to_queue(&[9.0, 9.0], None, None).await {
        Err(MotionError::QueueHalted(reason)) => assert_eq!(reason, preempted),
        other => panic!("unexpected {other:?}"),
    }

    assert!(c.resume_queue().await.unwrap());
    assert_eq!(c.add_move_to_queue(&[9.0, 9.0], None, None).await.unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_stop_names_itself_as_halt_reason() {
    let (mut c, _axes) = machine(&[(100.0, 1000.0)]);
    c.add_move_to_queue(&[1.0], None, None).await.unwrap();
    c.stop().await.unwrap();
    assert_eq!(
        c.queue_stats().await.unwrap().state,
        QueueState::Halted(HaltReason::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_direct_commands_preempt_a_busy_queue() {
    let (mut c, axes) = machine(&[(100.0, 1000.0), (100.0, 1000.0)]);
    c.add_move_to_queue(&[1.0, 0.0], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.target(&[4.0, 4.0], None, None).await.unwrap();
    assert_eq!(
        c.queue_stats().await.unwrap().state,
        QueueState::Halted(HaltReason::Preempted { operation: "target" })
    );

    // a halted queue is reported without asking the actuators where they are
    axes[0].clear_calls();
    assert!(matches!(
        c.add_move_to_queue(&[5.0, 5.0], None, None).await,
        Err(MotionError::QueueHalted(HaltReason::Preempted { .. }))
    ));
    assert!(axes[0].calls().is_empty());

    assert!(c.resume_queue().await.unwrap());
    assert_eq!(c.add_move_to_queue(&[5.0, 5.0], None, None).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_direct_commands_leave_an_idle_queue_alone() {
    let (mut c, _axes) = machine(&[(100.0, 1000.0)]);
    c.absolute(&[2.0], None, None).await.unwrap();
    c.set_position(&[0.0]).await.unwrap();
    c.velocity(&[0.0], None).await.unwrap();
    assert_eq!(c.queue_stats().await.unwrap().state, QueueState::Empty);
    assert_eq!(c.add_move_to_queue(&[1.0], None, None).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_on_running_queue_keeps_chaining() {
    let (mut c, axes) = machine(&[(100.0, 1000.0)]);
    c.add_move_to_queue(&[1.0], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!c.resume_queue().await.unwrap());

    axes[0].clear_calls();
    c.add_move_to_queue(&[3.0], None, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!axes[0].calls().contains(&Call::GetState));
    let sent = axes[0].transmitted();
    assert_eq!(sent.len(), 1);
    assert!(approx(sent[0].distance, 2.0));
}

#[tokio::test(start_paused = true)]
async fn test_axis_without_usable_limits_rejects_moves() {
    for bad in [0.0, -5.0] {
        let (mut c, axes) = machine(&[(bad, 1000.0), (100.0, 1000.0)]);
        assert!(matches!(
            c.add_move_to_queue(&[1.0, 1.0], Some(10.0), Some(10.0)).await,
            Err(MotionError::Invalid(_))
        ));
        assert!(matches!(
            c.absolute(&[2.0, 2.0], Some(10.0), Some(10.0)).await,
            Err(MotionError::Invalid(_))
        ));
        assert!(matches!(
            c.velocity(&[1.0, 1.0], None).await,
            Err(MotionError::Invalid(_))
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        for axis in &axes {
            assert!(axis.transmitted().is_empty());
            assert!(
                axis.calls()
                    .iter()
                    .all(|call| matches!(call, Call::GetState))
            );
        }
        assert_eq!(c.last_velocity(), 100.0);
    }

    let (mut c, axes) = machine(&[(100.0, 0.0), (100.0, 1000.0)]);
    // the crippled axis may sit still while the other one moves
    c.absolute(&[0.0, 3.0], None, None).await.unwrap();
    assert!(matches!(absolute_call(&axes[1]), Some(Call::Absolute { pos, .. }) if pos == 3.0));
    assert!(c.absolute(&[1.0, 3.0], None, None).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_idle_queue_leaves_it_empty() {
    let (mut c, _axes) = machine(&[(100.0, 1000.0)]);
    c.stop().await.unwrap();
    assert_eq!(c.queue_stats().await.unwrap().state, QueueState::Empty);
    assert_eq!(c.add_move_to_queue(&[1.0], None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_actuator_count_is_bounded() {
    let none: Vec<Arc<RecordingActuator>> = Vec::new();
    assert!(matches!(
        Coordinator::new(none, &test_config()),
        Err(MotionError::Invalid(_))
    ));
    let eight: Vec<Arc<RecordingActuator>> = (0..8).map(|_| Arc::new(RecordingActuator::new(1.0, 1.0))).collect();
    assert!(Coordinator::new(eight, &test_config()).is_err());
}
