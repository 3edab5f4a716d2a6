//! Integration tests for wishring-core
//!
//! These tests require a real WISH RING in range and should be run with:
//! `cargo test --package wishring-core -- --ignored --nocapture`
//!
//! Set the WISHRING_ADDRESS environment variable to target a specific ring:
//! `WISHRING_ADDRESS="AA:BB:CC:DD:EE:FF" cargo test --package wishring-core -- --ignored`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use wishring_core::channel::DataChannel;
use wishring_core::scan::{get_adapter, BtleScanner, RingScanner, ScanMode, ScanOptions};
use wishring_core::session;
use wishring_core::supervisor::ConnectionSupervisor;
use wishring_core::transport::BtleTransportFactory;

async fn find_ring_address() -> String {
    if let Ok(address) = env::var("WISHRING_ADDRESS") {
        return address;
    }
    let adapter = get_adapter().await.expect("no bluetooth adapter");
    let scanner = BtleScanner::new(adapter);
    scanner
        .find_any(Duration::from_secs(15))
        .await
        .expect("scan failed")
        .expect("no ring in range")
        .address
}

#[tokio::test]
#[ignore = "requires a WISH RING in range"]
async fn scan_finds_a_ring() {
    let adapter = get_adapter().await.expect("no bluetooth adapter");
    let scanner = BtleScanner::new(adapter);

    let options = ScanOptions::new()
        .with_timeout(Duration::from_secs(15))
        .with_mode(ScanMode::Service);
    let mut stream = scanner.scan(options).await.expect("scan failed to start");

    let mut found = 0;
    while let Some(device) = stream.next().await {
        println!("  {device}");
        found += 1;
    }
    assert!(found > 0, "no ring advertised within 15s");
}

#[tokio::test]
#[ignore = "requires a WISH RING in range"]
async fn connect_and_read_battery() {
    let address = find_ring_address().await;
    println!("Connecting to {address}");

    let adapter = get_adapter().await.expect("no bluetooth adapter");
    let factory = Arc::new(BtleTransportFactory::new(adapter));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = DataChannel::new(Arc::clone(&supervisor));

    let report = session::establish(&supervisor, &channel, &address)
        .await
        .expect("session bring-up failed");
    println!(
        "Subscribed {}/{} characteristics",
        report.succeeded, report.attempted
    );
    assert!(report.any_succeeded());

    let battery = channel.read_battery().await.expect("battery read failed");
    println!("Battery: {battery}");

    supervisor.disconnect().await.expect("disconnect failed");
}

#[tokio::test]
#[ignore = "requires a WISH RING in range"]
async fn button_press_round_trip() {
    let address = find_ring_address().await;
    let adapter = get_adapter().await.expect("no bluetooth adapter");
    let factory = Arc::new(BtleTransportFactory::new(adapter));
    let supervisor = Arc::new(ConnectionSupervisor::new(factory));
    let channel = DataChannel::new(Arc::clone(&supervisor));

    session::establish(&supervisor, &channel, &address)
        .await
        .expect("session bring-up failed");

    println!("Press the ring button within 30 seconds...");
    let mut presses = channel.button_presses();
    let press = tokio::time::timeout(Duration::from_secs(30), presses.recv())
        .await
        .expect("no press within 30s")
        .expect("press stream closed");
    println!("Got {:?} press (count {})", press.press_type, press.press_count);

    supervisor.disconnect().await.expect("disconnect failed");
}
