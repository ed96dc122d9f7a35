//! End-to-end shaping scenarios against the in-memory packet source.

use std::time::{Duration, Instant};

use bytes::Bytes;
use shaper::{
    Direction, MemSourceProvider, Packet, SessionEvent, Shaper, ShaperError, ShaperOptions,
    ShapingSession, SourceError,
};

fn packet(tag: u8) -> Packet {
    Packet::opaque(Bytes::from(vec![tag, 0xAB, 0xCD]), Direction::Outbound)
}

fn tag(packet: &Packet) -> u8 {
    packet.raw()[0]
}

/// Polls `cond` until it holds or the timeout elapses.
async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn permission_denied_aborts_start() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, _handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider.deny_permission());

    let result = shaper.start(ShapingSession::new()).await;
    assert!(matches!(
        result,
        Err(ShaperError::Source(SourceError::PermissionDenied))
    ));
    assert!(!shaper.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn session_filter_reaches_the_source() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider);

    let session = ShapingSession::new().direction(Direction::Outbound).port(3389);
    shaper.start(session.clone()).await.unwrap();

    let expected = shaper::BoundaryFilter::from_session(&session).expression();
    assert_eq!(handle.last_filter().unwrap(), expected);

    shaper.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_delay_passes_immediately_without_queuing() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, mut handle) = MemSourceProvider::channel(32);
    let mut shaper = Shaper::new(provider);

    shaper.start(ShapingSession::new()).await.unwrap();
    let stats = shaper.stats();

    for i in 0..20 {
        handle.inject(packet(i)).await.unwrap();
    }
    for i in 0..20 {
        let out = handle.reinjected().await.unwrap();
        assert_eq!(tag(&out), i);
    }

    // Counters trail the reinjection by a moment.
    wait_until(|| stats.passed() == 20).await;
    assert_eq!(stats.delayed(), 0);
    assert_eq!(stats.dropped_by_loss(), 0);

    shaper.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn full_loss_drops_everything_before_the_queue() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, mut handle) = MemSourceProvider::channel(32);
    let mut shaper = Shaper::new(provider);

    shaper
        .start(ShapingSession::new().loss_percent(100.0).latency_ms(1000.0))
        .await
        .unwrap();
    let stats = shaper.stats();

    for i in 0..20 {
        handle.inject(packet(i)).await.unwrap();
    }
    wait_until(|| stats.dropped_by_loss() == 20).await;

    assert_eq!(stats.passed(), 0);
    assert_eq!(stats.delayed(), 0);
    assert!(handle.drain_reinjected().is_empty());

    shaper.stop().await.unwrap();
    assert!(handle.drain_reinjected().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn fifty_ms_latency_releases_in_order_around_the_deadline() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, mut handle) = MemSourceProvider::channel(32);
    let mut shaper = Shaper::new(provider);

    let session = ShapingSession::new().latency_ms(50.0).direction(Direction::Outbound);
    shaper.start(session).await.unwrap();
    let stats = shaper.stats();

    let injected_at = Instant::now();
    for i in 0..10 {
        handle.inject(packet(i)).await.unwrap();
    }

    for i in 0..10 {
        let out = handle.reinjected().await.unwrap();
        assert_eq!(tag(&out), i, "release order must match capture order");
    }
    let elapsed = injected_at.elapsed();

    // 50ms configured, plus scheduler and releaser-interval slop.
    assert!(elapsed >= Duration::from_millis(45), "released too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "released too late: {elapsed:?}");

    wait_until(|| stats.delayed() == 10 && stats.released() == 10).await;
    assert_eq!(stats.dropped_by_loss(), 0);

    shaper.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_drains_queued_packets_exactly_once() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, mut handle) = MemSourceProvider::channel(32);
    let mut shaper = Shaper::new(provider);

    // Latency far beyond the test duration: everything stays queued.
    shaper.start(ShapingSession::new().latency_ms(60_000.0)).await.unwrap();
    let stats = shaper.stats();

    for i in 0..10 {
        handle.inject(packet(i)).await.unwrap();
    }
    wait_until(|| stats.delayed() == 10).await;
    assert!(handle.drain_reinjected().is_empty());

    shaper.stop().await.unwrap();

    let drained = handle.drain_reinjected();
    assert_eq!(drained.len(), 10, "every queued packet is reinjected at stop");
    assert_eq!(drained.iter().map(tag).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    assert_eq!(stats.drained(), 10);
    assert_eq!(stats.released(), 0);
    assert_eq!(stats.captured(), stats.passed() + stats.delayed() + stats.dropped_by_loss());
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_overflow_sheds_and_keeps_running() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, mut handle) = MemSourceProvider::channel(32);
    let options = ShaperOptions::default().queue_capacity(4);
    let mut shaper = Shaper::with_options(provider, options);
    let mut events = shaper.events().unwrap();

    shaper.start(ShapingSession::new().latency_ms(60_000.0)).await.unwrap();
    let stats = shaper.stats();

    for i in 0..10 {
        handle.inject(packet(i)).await.unwrap();
    }
    wait_until(|| stats.delayed() + stats.overflow_dropped() == 10).await;

    assert_eq!(stats.delayed(), 4);
    assert_eq!(stats.overflow_dropped(), 6);

    // The session survived the overflow and still accepts traffic.
    assert!(shaper.is_running());

    let mut saw_overflow = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::QueueOverflow { .. }) {
            saw_overflow = true;
        }
    }
    assert!(saw_overflow, "overflow must be reported on the event channel");

    shaper.stop().await.unwrap();
    assert_eq!(handle.drain_reinjected().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_on_idle_controller_is_a_noop() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, _handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider);

    shaper.stop().await.unwrap();

    shaper.start(ShapingSession::new()).await.unwrap();
    shaper.stop().await.unwrap();
    shaper.stop().await.unwrap();
    assert!(!shaper.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_is_rejected() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, _handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider);

    shaper.start(ShapingSession::new()).await.unwrap();
    assert!(matches!(
        shaper.start(ShapingSession::new()).await,
        Err(ShaperError::AlreadyRunning)
    ));
    shaper.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn recv_error_racing_a_requested_stop_is_not_fatal() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider);
    let mut events = shaper.events().unwrap();

    shaper.start(ShapingSession::new()).await.unwrap();

    // The pending receive fails with an I/O error instead of a clean close
    // once stop shuts the receive path down.
    handle.fail_recv();
    shaper.stop().await.unwrap();
    assert!(!shaper.is_running());

    let mut saw_stopped = false;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::CaptureError { .. }),
            "a receive error after a requested stop is part of the teardown"
        );
        saw_stopped |= event == SessionEvent::Stopped;
    }
    assert!(saw_stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn broken_capture_path_surfaces_an_error_event() {
    let _ = tracing_subscriber::fmt::try_init();
    let (provider, handle) = MemSourceProvider::channel(8);
    let mut shaper = Shaper::new(provider);
    let mut events = shaper.events().unwrap();

    shaper.start(ShapingSession::new()).await.unwrap();
    assert!(matches!(events.recv().await, Some(SessionEvent::Started { .. })));

    // Killing the injection side makes the source report Closed outside of
    // any stop request, which the capture loop treats as fatal.
    drop(handle);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "no capture error surfaced");
        match events.recv().await {
            Some(SessionEvent::CaptureError { .. }) => break,
            Some(_) => {}
            None => panic!("event channel closed without a capture error"),
        }
    }

    // The teardown already ran; stop() only tidies controller state.
    shaper.stop().await.unwrap();
    assert!(!shaper.is_running());
}
