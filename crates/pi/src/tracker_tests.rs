// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Tracker, FULL_UPDATE_WAIT, MAX_DELETION_EVENTS};
use crate::metrics::Metrics;
use crate::oci::{EventType, Image, ImageEvent};
use crate::test_support::{MockOciClient, MockServiceDiscover};

fn manifest_bytes(config: &str, layers: &[&str]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "config": { "digest": config, "size": 10 },
        "layers": layers.iter().map(|l| json!({ "digest": l, "size": 10 })).collect::<Vec<_>>(),
    }))
    .unwrap()
}

fn image(name: &str, digest: &str) -> Image {
    Image::parse(name, digest).unwrap()
}

struct Fixture {
    oci: Arc<MockOciClient>,
    sd: Arc<MockServiceDiscover>,
    tracker: Arc<Tracker>,
}

fn fixture(resolve_latest_tag: bool) -> Fixture {
    let oci = Arc::new(MockOciClient::default());
    let sd = Arc::new(MockServiceDiscover::default());
    let tracker = Arc::new(Tracker::new(
        Arc::clone(&oci) as Arc<dyn crate::oci::OciClient>,
        Arc::clone(&sd) as Arc<dyn crate::sd::ServiceDiscover>,
        Arc::new(Metrics::new().unwrap()),
        resolve_latest_tag,
        Duration::from_secs(3600),
    ));
    Fixture { oci, sd, tracker }
}

#[tokio::test]
async fn full_sync_collects_tag_and_walked_digests() {
    let f = fixture(true);
    f.oci.put_manifest("sha256:root", manifest_bytes("sha256:cfg", &["sha256:l1"]));
    f.oci.put_image(image("reg.example.com/app:v1", "sha256:root"));

    f.tracker.full_sync().await.unwrap();

    let synced = f.sd.synced.lock().unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(
        synced[0],
        vec![
            "reg.example.com/app:v1".to_owned(),
            "sha256:cfg".to_owned(),
            "sha256:l1".to_owned(),
            "sha256:root".to_owned(),
        ]
    );
}

#[tokio::test]
async fn full_sync_suppresses_latest_tag_when_disabled() {
    let f = fixture(false);
    f.oci.put_manifest("sha256:root", manifest_bytes("sha256:cfg", &[]));
    f.oci.put_image(image("reg.example.com/app:latest", "sha256:root"));

    f.tracker.full_sync().await.unwrap();

    let synced = f.sd.synced.lock().unwrap();
    assert_eq!(synced.len(), 1);
    assert!(
        !synced[0].contains(&"reg.example.com/app:latest".to_owned()),
        "latest tag must not be advertised: {:?}",
        synced[0]
    );
    // The digests are still shared.
    assert!(synced[0].contains(&"sha256:root".to_owned()));
}

#[tokio::test]
async fn full_sync_walks_each_digest_once() {
    let f = fixture(true);
    f.oci.put_manifest("sha256:root", manifest_bytes("sha256:cfg", &["sha256:l1"]));
    // Two tags pointing at the same digest.
    f.oci.put_image(image("reg.example.com/app:v1", "sha256:root"));
    f.oci.put_image(image("reg.example.com/app:v1-alias", "sha256:root"));

    f.tracker.full_sync().await.unwrap();

    let synced = f.sd.synced.lock().unwrap();
    assert_eq!(
        synced[0],
        vec![
            "reg.example.com/app:v1".to_owned(),
            "reg.example.com/app:v1-alias".to_owned(),
            "sha256:cfg".to_owned(),
            "sha256:l1".to_owned(),
            "sha256:root".to_owned(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn burst_of_requests_coalesces_into_one_sync() {
    let f = fixture(true);
    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(MAX_DELETION_EVENTS + 10);

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.full_update_processor(rx, shutdown).await })
    };

    for _ in 0..10 {
        tx.send("delete-event").await.unwrap();
    }
    // Just before the wait window closes: nothing flushed yet.
    tokio::time::sleep(FULL_UPDATE_WAIT - Duration::from_secs(1)).await;
    assert_eq!(f.sd.synced.lock().unwrap().len(), 0);

    // The window closes: exactly one sync.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.sd.synced.lock().unwrap().len(), 1);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn buffer_overflow_triggers_sync_before_the_window_closes() {
    let f = fixture(true);
    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(2 * MAX_DELETION_EVENTS);

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.full_update_processor(rx, shutdown).await })
    };

    for _ in 0..MAX_DELETION_EVENTS {
        tx.send("delete-event").await.unwrap();
    }
    // Give the processor a moment; time is paused so only yields elapse.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.sd.synced.lock().unwrap().len(), 1);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn event_loop_advertises_created_images() {
    let f = fixture(true);
    f.oci.put_manifest("sha256:root", manifest_bytes("sha256:cfg", &["sha256:l1"]));
    let shutdown = CancellationToken::new();
    let (tx, _rx) = mpsc::channel(10);

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.event_loop(tx, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.oci
        .send_event(ImageEvent {
            image: image("reg.example.com/app:v1", "sha256:root"),
            event_type: EventType::Create,
        })
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let advertised = f.sd.advertised.lock().unwrap().clone();
    assert_eq!(advertised.len(), 1);
    assert_eq!(
        advertised[0],
        vec![
            "reg.example.com/app:v1".to_owned(),
            "sha256:cfg".to_owned(),
            "sha256:l1".to_owned(),
            "sha256:root".to_owned(),
        ]
    );

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delete_events_request_a_full_sync_instead_of_advertising() {
    let f = fixture(true);
    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(10);

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.event_loop(tx, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.oci
        .send_event(ImageEvent {
            image: image("reg.example.com/app:v1", "sha256:gone"),
            event_type: EventType::Delete,
        })
        .await;

    let token = rx.recv().await.unwrap();
    assert_eq!(token, "delete-event");
    assert!(f.sd.advertised.lock().unwrap().is_empty());

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn event_loop_resubscribes_after_the_stream_closes() {
    let f = fixture(true);
    let shutdown = CancellationToken::new();
    let (tx, _rx) = mpsc::channel(10);

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.event_loop(tx, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.oci.close_subscription();
    // After the resubscribe delay a fresh subscription must be open.
    tokio::time::sleep(super::RESUBSCRIBE_DELAY + Duration::from_secs(1)).await;

    f.oci
        .send_event(ImageEvent {
            image: image("reg.example.com/app:v1", "sha256:gone"),
            event_type: EventType::Delete,
        })
        .await;

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn keep_alive_fires_on_the_interval() {
    let f = fixture(true);
    let shutdown = CancellationToken::new();

    let tracker = Arc::clone(&f.tracker);
    let worker = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { tracker.keep_alive_loop(shutdown).await })
    };

    // Initial random offset is below one interval, so after two intervals
    // at least two heartbeats must have fired.
    tokio::time::sleep(2 * super::KEEP_ALIVE_INTERVAL).await;
    let count = f.sd.keepalives.load(std::sync::atomic::Ordering::SeqCst);
    assert!(count >= 2, "expected at least two keep-alives, got {count}");

    shutdown.cancel();
    worker.await.unwrap();
}
