//! Integration tests for the stream session lifecycle and render switching

mod mocks;

use mocks::*;
use pixelcast_core::config::PerformanceStrategy;
use pixelcast_core::device::{DeviceCall, SyntheticBehavior, SyntheticConfig, SyntheticDevice};
use pixelcast_core::error::{FailureKind, PixelcastError};
use pixelcast_core::health::UnhealthyReason;
use pixelcast_core::render::ShaderPreset;
use pixelcast_core::types::{RenderMode, Resolution};
use pixelcast_core::viewport::{ContainerMetrics, Insets, LayoutChrome};
use pixelcast_core::{SessionEvent, SessionState, StopReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_stop_cycle_is_reusable() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    for _ in 0..3 {
        let info = assert_ok!(session.start(None).await);
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(info.render_mode, RenderMode::Software);
        assert_eq!(info.capabilities.resolution, Resolution::GAME_BOY);

        assert_ok!(session.stop().await);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.info().is_none());
    }

    assert_eq!(device.acquisitions(), 3);
    assert_eq!(device.releases(), 3);
    assert_eq!(device.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_starts_share_one_acquisition() {
    let device = slow_device(Duration::from_millis(100));
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    let (a, b, c) = tokio::join!(session.start(None), session.start(None), session.start(None));
    let a = assert_ok!(a);
    let b = assert_ok!(b);
    let c = assert_ok!(c);

    assert_eq!(a.session, b.session);
    assert_eq!(b.session, c.session);
    assert_eq!(device.acquisitions(), 1);

    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stops_share_one_release() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    assert_ok!(session.start(None).await);

    let (a, b) = tokio::join!(session.stop(), session.stop());
    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(device.releases(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interleaved_start_stop_never_leaks_handles() {
    let device = slow_device(Duration::from_millis(30));
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    let s = session.clone();
    let _ = tokio::join!(
        s.start(None),
        s.stop(),
        s.start(None),
        s.start(None),
        s.stop()
    );
    assert_ok!(session.stop().await);

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(device.acquisitions(), device.releases());
    assert_eq!(device.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_start_waits_then_stops() {
    let device = slow_device(Duration::from_millis(100));
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    let starting = {
        let session = session.clone();
        tokio::spawn(async move { session.start(None).await })
    };
    wait_until(|| session.state() == SessionState::Starting).await;

    assert_ok!(session.stop().await);
    let info = assert_ok!(starting.await.unwrap());
    assert_eq!(info.render_mode, RenderMode::Software);

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.info().is_none());
    assert_eq!(device.calls(), vec![DeviceCall::Acquire, DeviceCall::Release]);
    assert_eq!(device.overlapping_calls(), 0);
    assert_eq!(device.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_during_stop_waits_for_release() {
    let device = slow_release_device(Duration::from_millis(100));
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let first = assert_ok!(session.start(None).await);

    let stopping = {
        let session = session.clone();
        tokio::spawn(async move { session.stop().await })
    };
    wait_until(|| session.state() == SessionState::Stopping).await;

    let second = assert_ok!(session.start(None).await);
    assert_ok!(stopping.await.unwrap());
    assert_ne!(first.session, second.session);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(
        device.calls(),
        vec![DeviceCall::Acquire, DeviceCall::Release, DeviceCall::Acquire]
    );
    assert_eq!(device.overlapping_calls(), 0);

    assert_ok!(session.stop().await);
    assert_eq!(device.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_uses_configured_default_device() {
    let device = Arc::new(SyntheticDevice::new(SyntheticConfig {
        device_id: "usb-capture-1".to_string(),
        ..Default::default()
    }));
    let mut settings = test_settings(1000);
    settings.device.default = Some("usb-capture-1".to_string());
    let session = session(device.clone(), MockBackend::raster_only(), settings);

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.device.id, "usb-capture-1");
    assert_eq!(info.capabilities.resolution, Resolution::GAME_BOY);
    assert_ok!(session.stop().await);
}

#[tokio::test]
async fn test_stop_while_idle_is_noop() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let mut events = session.subscribe();

    assert_ok!(session.stop().await);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(device.releases(), 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_frames_fails_health_check_and_releases() {
    let device = device(SyntheticBehavior::NoFrames);
    let session = session(device.clone(), MockBackend::accelerated(), test_settings(200));
    let mut events = session.subscribe();

    let err = assert_err!(session.start(None).await);
    assert!(matches!(
        err.root(),
        PixelcastError::StreamUnhealthy(UnhealthyReason::NoFramesReceived)
    ));
    assert_eq!(err.failure_kind(), FailureKind::NoFrames);
    assert_eq!(session.state(), SessionState::Error);

    // The partially acquired handle is released, not leaked
    assert_eq!(device.acquisitions(), 1);
    assert_eq!(device.releases(), 1);
    assert_eq!(device.open_handles(), 0);

    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::SessionError { session: Some(_), .. })
    })
    .await;
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::SessionStopped { reason: StopReason::Cleanup, .. })
    })
    .await;
}

#[tokio::test]
async fn test_no_device_reports_connect_message() {
    let device = device(SyntheticBehavior::NoDevice);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    let err = assert_err!(session.start(None).await);
    assert_eq!(err.failure_kind(), FailureKind::NoDevice);
    assert!(err.user_message().contains("Connect the device"));
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(device.acquisitions(), 0);

    // Stop from Error clears it
    assert_ok!(session.stop().await);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_after_error_retries() {
    let device = Arc::new(SyntheticDevice::new(SyntheticConfig {
        device_id: "usb-capture-0".to_string(),
        ..Default::default()
    }));
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));

    assert_err!(session.start(Some("missing".to_string())).await);
    assert_eq!(session.state(), SessionState::Error);

    let info = assert_ok!(session.start(Some("usb-capture-0".to_string())).await);
    assert_eq!(info.device.id, "usb-capture-0");
    assert!(session.is_streaming());
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_disconnect_stops_session() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let mut events = session.subscribe();

    let info = assert_ok!(session.start(None).await);
    device.disconnect();

    let error = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionError { .. })).await;
    match error {
        SessionEvent::SessionError { session, error } => {
            assert_eq!(session, Some(info.session));
            assert!(matches!(error, PixelcastError::DeviceDisconnected));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let stopped = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionStopped { .. })).await;
    assert!(matches!(
        stopped,
        SessionEvent::SessionStopped {
            reason: StopReason::DeviceLost,
            ..
        }
    ));

    wait_until(|| session.state() == SessionState::Idle).await;
    assert_eq!(device.releases(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_user_stop_is_not_reported_as_disconnect() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let mut events = session.subscribe();

    assert_ok!(session.start(None).await);
    assert_ok!(session.stop().await);

    let stopped = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionStopped { .. })).await;
    assert!(matches!(
        stopped,
        SessionEvent::SessionStopped {
            reason: StopReason::User,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::SessionError { error, .. }) => panic!("unexpected error event: {}", error),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_release_failure_still_reaches_idle() {
    let device = device(SyntheticBehavior::FailRelease);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let mut events = session.subscribe();

    assert_ok!(session.start(None).await);
    assert_ok!(session.stop().await);
    assert_eq!(session.state(), SessionState::Idle);

    let error = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionError { .. })).await;
    match error {
        SessionEvent::SessionError { error, .. } => {
            assert!(matches!(error, PixelcastError::ReleaseFailed(_)));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Usable again afterwards
    assert_ok!(session.start(None).await);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_while_streaming_restarts() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device.clone(), MockBackend::raster_only(), test_settings(1000));
    let mut events = session.subscribe();

    let first = assert_ok!(session.start(None).await);
    let second = assert_ok!(session.start(None).await);
    assert_ne!(first.session, second.session);
    assert_ne!(first.media, second.media);

    let stopped = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionStopped { .. })).await;
    match stopped {
        SessionEvent::SessionStopped { session, reason } => {
            assert_eq!(session, first.session);
            assert_eq!(reason, StopReason::Restart);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(device.acquisitions(), 2);
    assert_eq!(device.releases(), 1);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accelerated_start() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::accelerated(), test_settings(1000));

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Accelerated);
    assert!(session.is_rendering_accelerated());

    let mut presented = session.subscribe_presented();
    let frame = tokio::time::timeout(Duration::from_secs(5), presented.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.mode, RenderMode::Accelerated);
    assert_eq!(Some(frame.surface), session.surface_id().await);

    assert_ok!(session.stop().await);
    assert!(!session.is_rendering_accelerated());
    assert!(session.screenshot().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_surface_falls_back_to_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::with_max_texture(64), test_settings(1000));

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Software);
    assert!(!session.is_rendering_accelerated());

    let mut presented = session.subscribe_presented();
    let frame = tokio::time::timeout(Duration::from_secs(5), presented.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.mode, RenderMode::Software);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_context_creation_failure_falls_back_to_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device.clone(),
        MockBackend::with_context(ContextMode::FailCreate),
        test_settings(1000),
    );
    let mut events = session.subscribe();

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Software);
    assert_eq!(session.state(), SessionState::Streaming);
    wait_for_frames(&session, 1).await;

    assert_ok!(session.stop().await);
    loop {
        match events.try_recv() {
            Ok(SessionEvent::SessionError { error, .. }) => panic!("unexpected error event: {}", error),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bind_failure_after_transfer_is_unrecoverable() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device.clone(),
        MockBackend::with_context(ContextMode::FailBind),
        test_settings(1000),
    );

    let err = assert_err!(session.start(None).await);
    assert!(matches!(err.root(), PixelcastError::SurfaceUnrecoverable(_)));
    assert!(err.to_string().starts_with("display unavailable until a new session is started"));
    assert_eq!(err.failure_kind(), FailureKind::Internal);
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(device.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_main_thread_only_acceleration_uses_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::main_thread_only(), test_settings(1000));

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Software);
    assert!(!session.is_rendering_accelerated());

    // Leaving performance mode does not move the surface to the worker either
    assert_ok!(session.set_performance_mode(true).await);
    let mode = assert_ok!(session.set_performance_mode(false).await);
    assert_eq!(mode, RenderMode::Software);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_switch_to_accelerated_keeps_streaming() {
    for context in [ContextMode::FailCreate, ContextMode::FailBind] {
        let device = device(SyntheticBehavior::Normal);
        let session = session(
            device.clone(),
            MockBackend::with_context(context),
            performance_settings(true, PerformanceStrategy::ForceSoftware),
        );

        let info = assert_ok!(session.start(None).await);
        assert_eq!(info.render_mode, RenderMode::Software);
        let before = session.surface_id().await.unwrap();

        let mode = assert_ok!(session.set_performance_mode(false).await);
        assert_eq!(mode, RenderMode::Software);
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(!session.is_rendering_accelerated());

        let after = session.surface_id().await.unwrap();
        if context == ContextMode::FailCreate {
            assert_eq!(before, after);
        } else {
            assert_ne!(before, after);
        }

        let mut presented = session.subscribe_presented();
        let frame = tokio::time::timeout(Duration::from_secs(5), presented.wait_for(|f| f.surface == after))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.mode, RenderMode::Software);

        assert_ok!(session.stop().await);
        assert_eq!(device.open_handles(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_performance_mode_at_start_uses_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device,
        MockBackend::accelerated(),
        performance_settings(true, PerformanceStrategy::ForceSoftware),
    );

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Software);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_performance_toggle_round_trip_keeps_preset() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::accelerated(), test_settings(1000));
    let mut events = session.subscribe();

    assert_ok!(session.start(None).await);
    session.set_preset(ShaderPreset::Dmg).await;

    let mode = assert_ok!(session.set_performance_mode(true).await);
    assert_eq!(mode, RenderMode::Software);
    assert!(!session.is_rendering_accelerated());
    assert_eq!(session.preset().await, ShaderPreset::Dmg);

    // Chosen while performance mode is on; applied when it turns off
    session.set_preset(ShaderPreset::LcdGrid).await;

    let mode = assert_ok!(session.set_performance_mode(false).await);
    assert_eq!(mode, RenderMode::Accelerated);
    assert!(session.is_rendering_accelerated());
    assert_eq!(session.preset().await, ShaderPreset::LcdGrid);
    assert_eq!(session.stats().await.preset, ShaderPreset::LcdGrid);
    assert!(session.stats().await.renderer_switches >= 2);

    wait_for_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::RenderModeChanged {
                mode: RenderMode::Software,
                ..
            }
        )
    })
    .await;

    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_low_cost_strategy_at_start_uses_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device,
        MockBackend::accelerated(),
        performance_settings(true, PerformanceStrategy::LowCostPreset),
    );

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Software);
    assert!(!session.is_rendering_accelerated());

    let mode = assert_ok!(session.set_performance_mode(false).await);
    assert_eq!(mode, RenderMode::Accelerated);
    assert_eq!(session.stats().await.preset, ShaderPreset::None);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_low_cost_strategy_keeps_accelerated_renderer() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device,
        MockBackend::accelerated(),
        performance_settings(false, PerformanceStrategy::LowCostPreset),
    );

    assert_ok!(session.start(None).await);
    session.set_preset(ShaderPreset::Scanlines).await;

    let mode = assert_ok!(session.set_performance_mode(true).await);
    assert_eq!(mode, RenderMode::Accelerated);
    assert!(session.is_rendering_accelerated());
    assert_eq!(session.stats().await.preset, ShaderPreset::Performance);
    assert_eq!(session.preset().await, ShaderPreset::Scanlines);

    assert_ok!(session.set_performance_mode(false).await);
    assert_eq!(session.stats().await.preset, ShaderPreset::Scanlines);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_software_never_draws_on_transferred_surface() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::accelerated(), test_settings(1000));

    assert_ok!(session.start(None).await);
    let transferred = session.surface_id().await.unwrap();

    assert_ok!(session.set_performance_mode(true).await);
    let replacement = session.surface_id().await.unwrap();
    assert_ne!(transferred, replacement);

    let mut presented = session.subscribe_presented();
    let mut software_frames = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    while tokio::time::Instant::now() < deadline {
        let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(100), presented.next()).await else {
            continue;
        };
        if frame.mode == RenderMode::Software {
            assert_ne!(frame.surface, transferred);
            software_frames += 1;
        }
    }
    assert!(software_frames > 0);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_surface_expiry_falls_back_to_software() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(
        device,
        MockBackend::with_context(ContextMode::FailRender),
        test_settings(1000),
    );
    let mut events = session.subscribe();

    let info = assert_ok!(session.start(None).await);
    assert_eq!(info.render_mode, RenderMode::Accelerated);
    let transferred = session.surface_id().await.unwrap();

    let expired = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SurfaceExpired { .. })).await;
    match expired {
        SessionEvent::SurfaceExpired { surface, .. } => assert_eq!(surface, transferred),
        other => panic!("unexpected event {:?}", other),
    }

    wait_until(|| session.is_streaming() && !session.is_rendering_accelerated()).await;
    let mut presented = session.subscribe_presented();
    let frame = tokio::time::timeout(
        Duration::from_secs(5),
        presented.wait_for(|f| f.mode == RenderMode::Software),
    )
    .await
    .unwrap()
    .unwrap();
    assert_ne!(frame.surface, transferred);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_switch_without_surface_stops_session() {
    let device = device(SyntheticBehavior::Normal);
    // First surface attaches, its replacement is refused
    let host = Arc::new(ScriptedHost::failing_after(1));
    let session = session_with_host(
        device.clone(),
        MockBackend::accelerated(),
        host.clone(),
        test_settings(1000),
    );
    let mut events = session.subscribe();

    assert_ok!(session.start(None).await);
    assert!(session.is_rendering_accelerated());

    let err = assert_err!(session.set_performance_mode(true).await);
    assert!(matches!(err.root(), PixelcastError::SurfaceUnrecoverable(_)));

    let stopped = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SessionStopped { .. })).await;
    assert!(matches!(
        stopped,
        SessionEvent::SessionStopped {
            reason: StopReason::RenderFailure,
            ..
        }
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(device.open_handles(), 0);
    assert_eq!(host.attached().len(), 1);
    assert_eq!(host.detached().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hidden_presentation_pauses_rendering() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::raster_only(), test_settings(1000));

    assert_ok!(session.start(None).await);
    wait_for_frames(&session, 3).await;

    session.set_visible(false).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    let paused_at = session.stats().await.frames_drawn;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.stats().await.frames_drawn, paused_at);
    assert!(session.stats().await.pauses >= 1);
    assert!(session.is_streaming());

    session.set_visible(true).await;
    wait_for_frames(&session, paused_at + 3).await;
    assert_ok!(session.stop().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resize_scales_to_integer_multiple() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::raster_only(), test_settings(1000));

    assert_ok!(session.start(None).await);
    session
        .set_chrome(LayoutChrome {
            padding: Insets::uniform(10.0),
            border: Insets::uniform(2.0),
            ..Default::default()
        })
        .await;

    let dims = session
        .force_resize(ContainerMetrics::new(800.0, 600.0))
        .await
        .unwrap();
    assert_eq!(dims.scale, 4);
    assert_eq!(dims.logical, Resolution::new(640, 576));
    assert_eq!(dims.backing, Resolution::new(640, 576));

    // Debounced requests: only the last one lands
    session.request_resize(ContainerMetrics::new(400.0, 400.0));
    session.request_resize(ContainerMetrics::new(524.0, 456.0).with_pixel_density(2.0));
    wait_until_async(|| async {
        session.stats().await.dimensions.logical == Resolution::new(480, 432)
    })
    .await;
    let stats = session.stats().await;
    assert_eq!(stats.dimensions.scale, 3);
    assert_eq!(stats.dimensions.backing, Resolution::new(960, 864));

    let mut presented = session.subscribe_presented();
    let frame = tokio::time::timeout(
        Duration::from_secs(5),
        presented.wait_for(|f| f.resolution == Resolution::new(960, 864)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(frame.mode, RenderMode::Software);

    // The snapshot stays usable while the session stops underneath it
    assert_ok!(tokio::time::timeout(Duration::from_secs(5), session.stop()).await.unwrap());
    assert_eq!(frame.resolution, Resolution::new(960, 864));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_brightness_is_validated() {
    let device = device(SyntheticBehavior::Normal);
    let session = session(device, MockBackend::raster_only(), test_settings(1000));

    assert_ok!(session.set_brightness(1.5).await);
    assert_err!(session.set_brightness(-0.5).await);
}

async fn wait_for_frames(session: &pixelcast_core::StreamSession, count: u64) {
    wait_until_async(|| async { session.stats().await.frames_drawn >= count }).await;
}

async fn wait_until_async<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let wait = async {
        while !cond().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for condition");
}
