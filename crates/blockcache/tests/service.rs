mod common;

use blockcache::{
    BlockDescriptor, ChainService, ManualClock, MemoryCache, ServiceConfig, ServiceError,
    SqliteStore,
};
use common::{origin_block, receipt, MockOrigin, T0};
use std::sync::Arc;
use std::time::Duration;

fn service() -> (Arc<ManualClock>, Arc<MockOrigin>, ChainService) {
    let clock = Arc::new(ManualClock::new(T0));
    let origin = Arc::new(MockOrigin::default());
    let service = ChainService::new(
        origin.clone(),
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(MemoryCache::new(clock.clone())),
        clock.clone(),
        ServiceConfig::default(),
    );
    (clock, origin, service)
}

#[tokio::test]
async fn sixth_call_in_window_is_rate_limited() {
    let (clock, origin, service) = service();
    origin.set_block(BlockDescriptor::Number(1), origin_block(1, 0));

    for _ in 0..5 {
        service
            .block("10.0.0.1", BlockDescriptor::Number(1), false)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));
    }
    let err = service
        .block("10.0.0.1", BlockDescriptor::Number(1), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RateLimited(_)));

    // other identities are independent
    service
        .block("10.0.0.2", BlockDescriptor::Number(1), false)
        .await
        .unwrap();
    // the window slides
    clock.advance(Duration::from_secs(61));
    service
        .block("10.0.0.1", BlockDescriptor::Number(1), false)
        .await
        .unwrap();
}

#[tokio::test]
async fn errors_map_to_caller_outcomes() {
    let (_clock, origin, service) = service();
    origin.set_receipt(receipt("0xabc", 3));

    let err = service.transaction("a", "0xnothing").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    origin.set_failing(BlockDescriptor::Latest);
    let err = service
        .block("a", BlockDescriptor::Latest, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Server(_)));

    assert_eq!(service.receipt("a", "0xabc").await.unwrap().block_number, 3);
}

#[tokio::test(start_paused = true)]
async fn refresher_warms_pointers_and_stops_on_shutdown() {
    let (_clock, origin, service) = service();
    origin.set_pointer(BlockDescriptor::Latest, origin_block(100, 0));
    origin.set_pointer(BlockDescriptor::Safe, origin_block(98, 0));
    origin.set_pointer(BlockDescriptor::Finalized, origin_block(95, 0));

    service.start_refresher();
    service.start_refresher();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(origin.block_calls(), 3);

    let latest = service
        .block("a", BlockDescriptor::Latest, false)
        .await
        .unwrap();
    assert_eq!(latest.block.number, 100);
    assert_eq!(origin.block_calls(), 3);

    service.shutdown().await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(origin.block_calls(), 3);
}
