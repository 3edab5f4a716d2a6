//! End-to-end tests of the connection lifecycle against mock transports.
//!
//! These exercise the full stack (supervisor, enabler, data channel,
//! reconnect coordinator) without hardware. Timing-sensitive tests run on
//! tokio's paused clock so watchdogs and backoffs resolve instantly.

use std::sync::Arc;
use std::time::Duration;

use wishring_core::channel::{DataChannel, SyncStep, WishSnapshot};
use wishring_core::error::Error;
use wishring_core::events::{DisconnectReason, RingEvent};
use wishring_core::mock::{MockScanner, MockTransport, MockTransportFactory};
use wishring_core::notify::NotificationEnabler;
use wishring_core::reconnect::AutoReconnectCoordinator;
use wishring_core::store::{KnownDeviceStore, MemoryStore};
use wishring_core::supervisor::ConnectionSupervisor;
use wishring_core::transport::{CharacteristicInfo, CharacteristicProps, RingTransport};
use wishring_core::{session, ConnectionPhase, ConnectionState, KnownDevice, PressType, RingDevice};
use wishring_types::uuid::{BATTERY_CHAR, CCCD, COUNTER_CHAR, RING_SERVICE};

const RING_ADDR: &str = "AA:BB:CC:DD:EE:FF";

fn ring_setup() -> (
    Arc<MockTransport>,
    Arc<ConnectionSupervisor>,
    Arc<DataChannel>,
) {
    let factory = Arc::new(MockTransportFactory::new());
    let transport = factory.register(MockTransport::wish_ring(RING_ADDR));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = Arc::new(DataChannel::new(Arc::clone(&supervisor)));
    (transport, supervisor, channel)
}

fn ring_device(address: &str, name: &str) -> RingDevice {
    RingDevice {
        address: address.to_string(),
        name: name.to_string(),
        signal_strength: -55,
        is_bonded: false,
        is_connectable: true,
    }
}

fn notify_char(uuid: uuid::Uuid, cccd: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid,
        service_uuid: RING_SERVICE,
        props: CharacteristicProps {
            notify: true,
            ..Default::default()
        },
        descriptors: if cccd { vec![CCCD] } else { Vec::new() },
    }
}

#[tokio::test(start_paused = true)]
async fn end_to_end_button_press() {
    let (transport, supervisor, channel) = ring_setup();

    let report = session::establish(&supervisor, &channel, RING_ADDR)
        .await
        .unwrap();
    // Counter and battery are notify-capable with a CCCD; reset is not.
    assert_eq!((report.attempted, report.succeeded), (2, 2));
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert_eq!(supervisor.phase(), ConnectionPhase::Ready);
    assert!(transport.is_subscribed(COUNTER_CHAR));

    // The initial settings read populated the observable battery level.
    assert_eq!(channel.battery().borrow().unwrap().percent(), 87);

    let mut presses = channel.button_presses();
    transport.inject_notification(COUNTER_CHAR, vec![0x02]);

    let press = presses.recv().await.unwrap();
    assert_eq!(press.press_count, 2);
    assert_eq!(press.press_type, PressType::Double);
}

#[tokio::test(start_paused = true)]
async fn second_concurrent_connect_fails_fast() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_millis(100)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));

    let (first, second) = tokio::join!(supervisor.connect(RING_ADDR), async {
        // Let the first attempt take the gate before the second call.
        tokio::task::yield_now().await;
        supervisor.connect(RING_ADDR).await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::ConnectInProgress)));
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (_, supervisor, _channel) = ring_setup();
    let mut events = supervisor.events();

    // Disconnecting while already disconnected: no state change, no event.
    supervisor.disconnect().await.unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());

    supervisor.connect(RING_ADDR).await.unwrap();
    supervisor.disconnect().await.unwrap();
    supervisor.disconnect().await.unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(supervisor.lease().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn connect_watchdog_times_out() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_secs(120)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));

    let result = supervisor.connect(RING_ADDR).await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    // Timeout lands back in a terminal state, never a stuck phase.
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert_eq!(supervisor.phase(), ConnectionPhase::Idle);
    assert!(supervisor.watch_last_error().borrow().is_some());
}

#[tokio::test(start_paused = true)]
async fn cancelled_connect_is_not_an_error_state() {
    let factory = Arc::new(MockTransportFactory::new());
    let transport = factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_secs(10)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.connect(RING_ADDR).await }
    });
    // Let the attempt reach its transport connect before abandoning it.
    tokio::time::sleep(Duration::from_millis(10)).await;
    supervisor.cancel_connect();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    // Cancellation is caller-initiated, so it never surfaces as an error.
    assert!(supervisor.watch_last_error().borrow().is_none());
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn partial_subscription_is_reported_not_thrown() {
    let chars = vec![
        notify_char(uuid::uuid!("0000aaa1-0000-1000-8000-00805f9b34fb"), true),
        notify_char(uuid::uuid!("0000aaa2-0000-1000-8000-00805f9b34fb"), true),
        notify_char(uuid::uuid!("0000aaa3-0000-1000-8000-00805f9b34fb"), true),
    ];
    let failing = chars[1].uuid;
    let transport: Arc<dyn RingTransport> = Arc::new(
        MockTransport::new(RING_ADDR)
            .with_characteristics(chars)
            .with_cccd_failure(failing),
    );
    transport.connect().await.unwrap();
    transport.discover_services().await.unwrap();

    let report = NotificationEnabler::default()
        .enable_all(transport.as_ref())
        .await
        .unwrap();
    assert_eq!((report.attempted, report.succeeded), (3, 2));
    assert!(report.any_succeeded());
}

#[tokio::test(start_paused = true)]
async fn characteristic_without_cccd_is_skipped_uncounted() {
    let chars = vec![
        notify_char(COUNTER_CHAR, true),
        notify_char(uuid::uuid!("0000aaa4-0000-1000-8000-00805f9b34fb"), false),
    ];
    let transport: Arc<dyn RingTransport> =
        Arc::new(MockTransport::new(RING_ADDR).with_characteristics(chars));
    transport.connect().await.unwrap();
    transport.discover_services().await.unwrap();

    let report = NotificationEnabler::default()
        .enable_all(transport.as_ref())
        .await
        .unwrap();
    assert_eq!((report.attempted, report.succeeded), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn empty_service_list_triggers_one_rediscovery() {
    let mock = MockTransport::wish_ring(RING_ADDR);
    mock.mark_connected();
    // Services not discovered yet: the enabler sees an empty list and must
    // re-discover once on its own.
    let transport: Arc<dyn RingTransport> = Arc::new(mock);

    let report = NotificationEnabler::default()
        .enable_all(transport.as_ref())
        .await
        .unwrap();
    assert_eq!((report.attempted, report.succeeded), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_detected_and_reported() {
    let (transport, supervisor, _channel) = ring_setup();
    let mut events = supervisor.events();
    supervisor.connect(RING_ADDR).await.unwrap();
    // Drain the connected event.
    while !matches!(events.recv().await.unwrap(), RingEvent::Connected { .. }) {}

    let mut state = supervisor.watch_state();
    transport.simulate_connection_loss();

    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        RingEvent::Disconnected {
            reason: DisconnectReason::ConnectionLost,
            ..
        }
    ));
    assert!(supervisor.lease().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn sync_all_short_circuits_on_first_failure() {
    let factory = Arc::new(MockTransportFactory::new());
    // Budget of one write: the count lands, the text write fails.
    factory.register(MockTransport::wish_ring(RING_ADDR).with_write_budget(1));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = DataChannel::new(Arc::clone(&supervisor));
    supervisor.connect(RING_ADDR).await.unwrap();

    let report = channel
        .sync_all(&WishSnapshot {
            count: 42,
            text: "wish me luck".to_string(),
            target: 100,
            completed: false,
        })
        .await;

    assert_eq!(report.completed, vec![SyncStep::Count]);
    assert_eq!(report.failed, Some(SyncStep::Text));
    assert!(!report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn count_write_is_big_endian_and_clamped() {
    let (transport, supervisor, channel) = ring_setup();
    supervisor.connect(RING_ADDR).await.unwrap();

    channel.write_count(0x0102_0304).await.unwrap();
    channel.write_count(u32::MAX).await.unwrap();

    let writes = transport.writes();
    assert_eq!(writes[0], (COUNTER_CHAR, vec![0x01, 0x02, 0x03, 0x04]));
    // Above the device maximum, the write is clamped to 99 999.
    assert_eq!(writes[1], (COUNTER_CHAR, 99_999u32.to_be_bytes().to_vec()));
}

#[tokio::test(start_paused = true)]
async fn battery_notification_updates_observable_level() {
    let (transport, supervisor, channel) = ring_setup();
    session::establish(&supervisor, &channel, RING_ADDR)
        .await
        .unwrap();

    let mut battery = channel.battery();
    transport.inject_notification(BATTERY_CHAR, vec![12]);
    battery
        .wait_for(|level| level.map(|l| l.percent()) == Some(12))
        .await
        .unwrap();
    assert!(battery.borrow().unwrap().is_low());
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_is_bounded() {
    let factory = Arc::new(MockTransportFactory::new());
    let transport =
        factory.register(MockTransport::wish_ring(RING_ADDR).with_connect_failures(u32::MAX));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = Arc::new(DataChannel::new(Arc::clone(&supervisor)));
    let scanner = Arc::new(MockScanner::new().with_results(vec![ring_device(
        RING_ADDR,
        "WISH_RING_01",
    )]));
    let store = Arc::new(MemoryStore::with_record(KnownDevice::new(
        RING_ADDR,
        "WISH_RING_01",
    )));

    let coordinator = AutoReconnectCoordinator::new(
        Arc::clone(&supervisor),
        channel,
        Arc::clone(&scanner) as Arc<dyn wishring_core::scan::RingScanner>,
        store,
    );

    let connected = coordinator.run().await.unwrap();
    assert!(!connected);
    // Exactly one direct attempt and one scan-triggered attempt, then stop.
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(scanner.scan_count(), 1);
    assert_eq!(supervisor.phase(), ConnectionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_direct_hit_skips_scanning() {
    let (_, supervisor, channel) = ring_setup();
    let scanner = Arc::new(MockScanner::new());
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::with_record(KnownDevice::new(
        RING_ADDR,
        "WISH_RING_01",
    )));

    let coordinator = AutoReconnectCoordinator::new(
        Arc::clone(&supervisor),
        channel,
        Arc::clone(&scanner) as Arc<dyn wishring_core::scan::RingScanner>,
        Arc::clone(&store) as Arc<dyn KnownDeviceStore>,
    );

    assert!(coordinator.run().await.unwrap());
    assert_eq!(scanner.scan_count(), 0);
    assert_eq!(supervisor.phase(), ConnectionPhase::Ready);
    // Success refreshes the persisted record.
    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.connection_count, 2);
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_without_record_takes_first_found() {
    let (_, supervisor, channel) = ring_setup();
    let scanner = Arc::new(MockScanner::new().with_results(vec![ring_device(
        RING_ADDR,
        "WISH_RING_01",
    )]));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let mut events = supervisor.events();

    let coordinator = AutoReconnectCoordinator::new(
        Arc::clone(&supervisor),
        channel,
        Arc::clone(&scanner) as Arc<dyn wishring_core::scan::RingScanner>,
        Arc::clone(&store) as Arc<dyn KnownDeviceStore>,
    );

    assert!(coordinator.run().await.unwrap());
    assert_eq!(scanner.scan_count(), 1);
    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.address, RING_ADDR);
    assert_eq!(record.connection_count, 1);

    // The scan hit was announced before the connect.
    let mut saw_discovered = false;
    while let Ok(event) = events.try_recv() {
        if let RingEvent::Discovered { device, rssi } = event {
            assert!(!saw_discovered, "device announced more than once");
            assert_eq!(device.address, RING_ADDR);
            assert_eq!(rssi, -55);
            saw_discovered = true;
        } else if matches!(event, RingEvent::Connected { .. }) {
            assert!(saw_discovered, "connected before the discovery event");
        }
    }
    assert!(saw_discovered);
}

#[tokio::test(start_paused = true)]
async fn second_reconnect_sequence_fails_fast() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_secs(5)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = Arc::new(DataChannel::new(Arc::clone(&supervisor)));
    let store = Arc::new(MemoryStore::with_record(KnownDevice::new(
        RING_ADDR,
        "WISH_RING_01",
    )));
    let coordinator = Arc::new(AutoReconnectCoordinator::new(
        supervisor,
        channel,
        Arc::new(MockScanner::new()),
        store,
    ));

    let running = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.run().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(coordinator.run().await, Err(Error::ConnectInProgress)));
    assert!(running.await.unwrap().unwrap());
}

#[tokio::test(start_paused = true)]
async fn manual_connect_supersedes_auto_reconnect() {
    let factory = Arc::new(MockTransportFactory::new());
    factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_secs(20)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = Arc::new(DataChannel::new(Arc::clone(&supervisor)));
    let store = Arc::new(MemoryStore::with_record(KnownDevice::new(
        RING_ADDR,
        "WISH_RING_01",
    )));
    let coordinator = Arc::new(AutoReconnectCoordinator::new(
        Arc::clone(&supervisor),
        channel,
        Arc::new(MockScanner::new()),
        store,
    ));

    let running = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.run().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The user picked a device: cancel the sequence, then connect manually.
    coordinator.cancel();
    assert!(matches!(running.await.unwrap(), Err(Error::Cancelled)));
    supervisor.connect(RING_ADDR).await.unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn superseding_connect_keeps_the_new_link() {
    let factory = Arc::new(MockTransportFactory::new());
    let first = factory.register(MockTransport::wish_ring("AA:BB:CC:DD:EE:01"));
    let second = factory.register(MockTransport::wish_ring("AA:BB:CC:DD:EE:02"));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let mut events = supervisor.events();

    supervisor.connect("AA:BB:CC:DD:EE:01").await.unwrap();
    supervisor.connect("AA:BB:CC:DD:EE:02").await.unwrap();
    // Give any straggler task from the first link a chance to run.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(supervisor.state(), ConnectionState::Connected);
    assert!(!first.is_connected());
    assert!(second.is_connected());
    assert!(supervisor.lease().await.is_ok());

    // The first link ends during its teardown; that end must never surface
    // as a lost connection or tear down the replacement.
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(
            event,
            RingEvent::Disconnected {
                reason: DisconnectReason::ConnectionLost,
                ..
            }
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn gatt_operations_wait_for_the_lease() {
    let (_, supervisor, channel) = ring_setup();
    supervisor.connect(RING_ADDR).await.unwrap();

    let lease = supervisor.lease().await.unwrap();
    let read = tokio::spawn({
        let channel = Arc::clone(&channel);
        async move { channel.read_battery().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The read queues behind the held lease instead of interleaving.
    assert!(!read.is_finished());

    drop(lease);
    let level = read.await.unwrap().unwrap();
    assert_eq!(level.percent(), 87);
}

/// Factory for a host whose radio is gone: every open fails outright.
struct DeadRadioFactory;

#[async_trait::async_trait]
impl wishring_core::transport::TransportFactory for DeadRadioFactory {
    async fn open(
        &self,
        _address: &str,
    ) -> wishring_core::error::Result<Arc<dyn RingTransport>> {
        Err(Error::RadioUnavailable)
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_connect_failure_surfaces_as_error_state() {
    let supervisor = Arc::new(ConnectionSupervisor::new(Arc::new(DeadRadioFactory)));

    let result = supervisor.connect(RING_ADDR).await;
    assert!(matches!(result, Err(Error::RadioUnavailable)));
    // A dead radio is not worth retrying, so the state says Error rather
    // than Disconnected.
    assert_eq!(supervisor.state(), ConnectionState::Error);
    assert_eq!(supervisor.phase(), ConnectionPhase::Idle);
    assert!(supervisor.watch_last_error().borrow().is_some());
}

#[tokio::test(start_paused = true)]
async fn scan_phases_drive_manual_device_selection() {
    let (_, supervisor, _channel) = ring_setup();

    supervisor.scan_started();
    assert_eq!(supervisor.phase(), ConnectionPhase::Scanning);
    // A scan that finds nothing returns to idle.
    supervisor.scan_finished();
    assert_eq!(supervisor.phase(), ConnectionPhase::Idle);

    supervisor.scan_started();
    supervisor.device_selected(&ring_device(RING_ADDR, "WISH_RING_01"));
    assert_eq!(supervisor.phase(), ConnectionPhase::DeviceSelected);

    supervisor.connect(RING_ADDR).await.unwrap();
    assert_eq!(supervisor.state(), ConnectionState::Connected);
    // A stray scan cannot regress an established connection's phase.
    supervisor.scan_started();
    assert_eq!(supervisor.phase(), ConnectionPhase::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_aborts_an_in_flight_connect() {
    let factory = Arc::new(MockTransportFactory::new());
    let transport = factory.register(
        MockTransport::wish_ring(RING_ADDR).with_connect_latency(Duration::from_secs(10)),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));

    let task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.connect(RING_ADDR).await }
    });
    // Let the attempt reach its transport connect, then pull the plug.
    tokio::time::sleep(Duration::from_millis(10)).await;
    supervisor.disconnect().await.unwrap();

    assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    assert!(!transport.is_connected());
    assert!(supervisor.lease().await.is_err());
}
