use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Disconnects, Starvation & Bad Input
// ══════════════════════════════════════════════════════════════════════════════

/// A worker whose first message is not a handshake is dropped and never
/// becomes schedulable.
#[tokio::test]
async fn test_bad_handshake_closes_connection() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::connect(coord.worker_addr).await?;
    worker.request(1, JobType::A).await?;

    assert!(worker.closed_by_peer().await?);
    assert!(coord.directory.workers().is_empty());
    coord.stop().await
}

/// A worker that disconnects with a job in hand fails that job back to
/// its requester.
#[tokio::test]
async fn test_worker_disconnect_fails_outstanding_job() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;
    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(77, JobType::A).await?;

    worker.next_job().await?;
    drop(worker);

    let result = requester.next_result().await?;
    assert_eq!(result.id, 77);
    assert!(!result.succeeded);
    assert_eq!(&result.result[..], loadstar_services::WORKER_DISCONNECTED.as_bytes());

    coord.wait_for_workers(0).await?;
    assert_eq!(coord.directory.in_flight(), 0);
    coord.stop().await
}

/// With no worker at all, a job is rejected once the starvation timeout
/// passes.
#[tokio::test]
async fn test_no_worker_rejects_after_timeout() -> Result<()> {
    let coord = start_coordinator(|c| c.scheduling.starvation_timeout_ms = 100).await?;
    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(3, JobType::B).await?;

    let result = requester.next_result().await?;
    assert_eq!(result.id, 3);
    assert!(!result.succeeded);
    assert_eq!(&result.result[..], loadstar_services::NO_WORKER_AVAILABLE.as_bytes());
    assert_eq!(coord.stats.snapshot().rejected, 1);
    coord.stop().await
}

/// A job submitted before any worker exists waits and is dispatched to
/// the first one that connects.
#[tokio::test]
async fn test_parked_job_dispatched_on_first_worker() -> Result<()> {
    let coord = start_coordinator(|c| c.scheduling.starvation_timeout_ms = 0).await?;
    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(12, JobType::A).await?;
    wait_for_condition(|| coord.directory.in_flight() == 1).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut worker = Peer::worker(coord.worker_addr, JobType::B).await?;
    let job = worker.next_job().await?;
    worker.answer(&job, true, b"late").await?;

    let result = requester.next_result().await?;
    assert_eq!(result.id, 12);
    assert_eq!(&result.result[..], b"late");
    coord.stop().await
}

/// Garbage on the wire is discarded and the connection stays usable.
#[tokio::test]
async fn test_garbage_is_discarded_connection_survives() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;

    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.send_raw(b"hello(4)XY:1\n(x)").await?;
    requester.request(5, JobType::A).await?;

    let job = worker.next_job().await?;
    worker.answer(&job, true, b"ok").await?;
    let result = requester.next_result().await?;
    assert_eq!(result.id, 5);

    assert!(coord.stats.snapshot().discarded >= 2);
    assert_eq!(coord.directory.requesters().len(), 1);
    coord.stop().await
}

/// A requester that leaves before its result is ready makes the result
/// undeliverable; nobody else receives it.
#[tokio::test]
async fn test_departed_requester_result_is_undeliverable() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;

    let mut leaver = Peer::connect(coord.requester_addr).await?;
    leaver.request(1, JobType::A).await?;
    let job = worker.next_job().await?;
    drop(leaver);
    coord.wait_for_requesters(0).await?;

    let mut stayer = Peer::connect(coord.requester_addr).await?;
    worker.answer(&job, true, b"orphan").await?;
    wait_for_condition(|| coord.stats.snapshot().undeliverable == 1).await?;
    assert_eq!(coord.directory.in_flight(), 0);

    stayer.request(2, JobType::A).await?;
    let job = worker.next_job().await?;
    worker.answer(&job, true, b"mine").await?;
    let result = stayer.next_result().await?;
    assert_eq!(result.id, 2);
    assert_eq!(&result.result[..], b"mine");
    coord.stop().await
}
