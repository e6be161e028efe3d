//! Channel-hop scheduler integration tests: registration, pruning of
//! dropped sources, and that `run()` stops promptly on cancellation.

use std::sync::Arc;
use std::time::Duration;

use captrace::config::{self, DatasourceConfig};
use captrace::drivers::VirtualScanDriver;
use captrace::hop::HopScheduler;
use captrace::packetchain::BoundedPacketChain;
use captrace::source::SourceRuntime;
use captrace::types::SourceDefinition;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn ensure_config() {
    let _ = config::init(DatasourceConfig::default());
}

fn new_runtime() -> Arc<SourceRuntime> {
    let definition = SourceDefinition::parse("scan0").unwrap();
    let (chain, _rx) = BoundedPacketChain::new();
    Arc::new(SourceRuntime::new(definition, Arc::new(VirtualScanDriver), Arc::new(chain)))
}

#[tokio::test]
async fn register_and_unregister_round_trip() {
    ensure_config();
    let scheduler = HopScheduler::new();
    let runtime = new_runtime();
    let uuid = runtime.source.read().await.uuid;

    scheduler.register(uuid, &runtime).await;
    assert_eq!(scheduler.len(), 1);

    scheduler.unregister(&uuid);
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn unregister_of_unknown_uuid_is_a_no_op() {
    ensure_config();
    let scheduler = HopScheduler::new();
    scheduler.unregister(&Uuid::new_v4());
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn run_stops_promptly_once_cancelled() {
    ensure_config();
    let scheduler = Arc::new(HopScheduler::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let scheduler_clone = Arc::clone(&scheduler);
    let cancel_clone = cancel.clone();
    let handle = tokio::spawn(async move { scheduler_clone.run(cancel_clone).await });

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run() should return promptly when already cancelled")
        .expect("task should not panic");
}

#[tokio::test]
async fn dropped_runtime_is_pruned_on_next_tick() {
    ensure_config();
    let scheduler = HopScheduler::new();
    let uuid = {
        let runtime = new_runtime();
        let uuid = runtime.source.read().await.uuid;
        scheduler.register(uuid, &runtime).await;
        uuid
        // `runtime`'s only strong reference drops here; the scheduler
        // only ever holds a `Weak`.
    };
    assert_eq!(scheduler.len(), 1);

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(scheduler);
    let scheduler_clone = Arc::clone(&scheduler);
    let cancel_clone = cancel.clone();
    let handle = tokio::spawn(async move { scheduler_clone.run(cancel_clone).await });

    // Give the tick loop a moment to observe the dead weak ref, then stop it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;

    assert!(scheduler.is_empty(), "a dropped source's weak ref should be pruned on its next due tick");
    let _ = uuid;
}
