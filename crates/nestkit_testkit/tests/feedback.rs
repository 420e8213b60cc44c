//! Asset commits flowing back through change propagation.

use chrono::Duration;
use nestkit_assets::DownloadRequest;
use nestkit_core::{AssetStore, ForegroundHost};
use nestkit_propagation::{CleanupTarget, CursorAdvance, PropagationConfig, PropagationEngine};
use nestkit_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

const AVATAR: &str = "https://pbs.example/profile_images/783214/avatar.png";

async fn fetch(assets: &AssetFixture, body: &'static [u8]) {
    let mut settled = assets.manager.settled();
    let issued = assets
        .manager
        .download(&[DownloadRequest::new(AVATAR)], &CancellationToken::new())
        .await
        .unwrap()
        .issued;
    assets
        .session
        .respond(issued[0], 200, &[("Content-Type", "image/png")], body);
    tokio::time::timeout(StdDuration::from_secs(2), settled.changed())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn new_asset_rows_reach_data_asset_cleanup() {
    let fixture = PropagationFixture::new();
    fixture.cycle().await;
    let assets = AssetFixture::spawn(fixture.store.store.clone());

    fetch(&assets, b"avatar v1").await;
    let result = fixture.cycle().await;
    assert_eq!(result.transactions, 1);

    let stored = fixture.store.latest_asset(AVATAR).unwrap().unwrap();
    assert_eq!(fixture.cleanup.calls_for(CleanupTarget::DataAsset), vec![stored.id]);
}

#[tokio::test]
async fn metadata_updates_do_not_trigger_cleanup() {
    let fixture = PropagationFixture::new();
    fixture.cycle().await;
    let assets = AssetFixture::spawn(fixture.store.store.clone());

    fetch(&assets, b"avatar").await;
    fixture.cycle().await;
    fetch(&assets, b"avatar").await;
    let result = fixture.cycle().await;

    assert_eq!(result.transactions, 1);
    assert_eq!(fixture.store.asset_count(), 1);
    assert_eq!(fixture.cleanup.calls_for(CleanupTarget::DataAsset).len(), 1);

    // The loop is closed: nothing new means nothing to read.
    assert_eq!(fixture.cycle().await.transactions, 0);
}

#[tokio::test]
async fn running_engine_notifies_on_relation_changes() {
    let fixture = PropagationFixture::new();
    fixture.cycle().await;

    let cancel = CancellationToken::new();
    let runner = tokio::spawn(
        Arc::clone(&fixture.engine).run(fixture.store.subscribe(), cancel.clone()),
    );

    fixture.store.insert_snapshot(
        fixture
            .snapshot()
            .aged(Duration::minutes(10))
            .name("Jaehong")
            .username("jaehong")
            .following(&["A", "B"])
            .build(),
    );
    let newest = fixture.store.insert_snapshot(
        fixture
            .snapshot()
            .name("Jaehong")
            .username("jaehong")
            .following(&["A", "C"])
            .build(),
    );

    tokio::time::timeout(StdDuration::from_secs(2), async {
        while fixture.center.delivered_with(&newest.canonical()).is_none() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let request = fixture.center.delivered_with(&newest.canonical()).unwrap();
    assert_eq!(request.content.body, "1 New Following(s), 1 New Unfollowing(s)");

    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test]
async fn at_least_once_cursor_survives_restart() {
    let (store, _seeded) = TestStore::with_account();
    let file = TempCursorFile::new();
    let config = PropagationConfig::default().with_cursor_advance(CursorAdvance::AfterConsumers);

    let first = PropagationEngine::new(
        config.clone(),
        store.history(),
        file.cursors.clone(),
        Arc::new(ForegroundHost),
    );
    let result = first.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.transactions, 0);
    assert!(file.path.exists());

    store.set_preferences(nestkit_core::Preferences::default());

    let restarted = PropagationEngine::new(
        config,
        store.history(),
        file.reopen(),
        Arc::new(ForegroundHost),
    );
    let result = restarted.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.transactions, 1);
    assert_eq!(
        restarted.run_cycle(&CancellationToken::new()).await.unwrap().transactions,
        0
    );
}
