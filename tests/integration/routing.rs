use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Dispatch & Routing
// ══════════════════════════════════════════════════════════════════════════════

/// A request travels to the worker under an internal id and comes back to
/// the requester under its own id.
#[tokio::test]
async fn test_result_returns_under_original_id() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;

    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(500, JobType::A).await?;

    let dispatched = worker.next_job().await?;
    assert_eq!(dispatched.job_type, JobType::A);
    let owner = coord
        .directory
        .owner_of(loadstar_core::InternalId(dispatched.id))
        .context("dispatched job has no owner")?;
    assert_eq!(owner.original_id, 500);

    worker.answer(&dispatched, true, b"42").await?;
    let result = requester.next_result().await?;
    assert_eq!(result.id, 500);
    assert!(result.succeeded);
    assert_eq!(&result.result[..], b"42");

    wait_for_condition(|| coord.stats.snapshot().delivered == 1).await?;
    coord.stop().await
}

/// Two requesters reuse the same job id; each gets only its own result.
#[tokio::test]
async fn test_colliding_ids_from_two_requesters() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::B).await?;
    coord.wait_for_workers(1).await?;

    let mut first = Peer::connect(coord.requester_addr).await?;
    let mut second = Peer::connect(coord.requester_addr).await?;
    coord.wait_for_requesters(2).await?;
    first.request(1, JobType::B).await?;
    second.request(1, JobType::B).await?;

    for _ in 0..2 {
        let job = worker.next_job().await?;
        let owner = coord
            .directory
            .owner_of(loadstar_core::InternalId(job.id))
            .context("dispatched job has no owner")?;
        let tag = format!("for-{}", owner.requester_id);
        worker.answer(&job, true, tag.as_bytes()).await?;
    }

    let a = first.next_result().await?;
    let b = second.next_result().await?;
    assert_eq!((a.id, b.id), (1, 1));
    assert_ne!(a.result, b.result);
    assert!(a.result.starts_with(b"for-"));

    coord.stop().await
}

/// Results longer than one chunk are split by the worker and rebuilt
/// exactly on the requester side.
#[tokio::test]
async fn test_long_result_is_chunked_end_to_end() -> Result<()> {
    let coord = start_coordinator(|c| c.protocol.chunk_size = 16).await?;
    let mut worker = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;
    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(9, JobType::A).await?;

    let body: Vec<u8> = (0..1_000u32).map(|i| b"0123456789,:[]()"[i as usize % 16]).collect();
    let job = worker.next_job().await?;
    worker.answer(&job, true, &body).await?;

    let result = requester.next_result().await?;
    assert_eq!(result.id, 9);
    assert_eq!(result.result.len(), body.len());
    assert_eq!(&result.result[..], &body[..]);

    coord.stop().await
}

/// With both specialties connected and idle, each job type goes to its
/// specialist.
#[tokio::test]
async fn test_jobs_go_to_specialists() -> Result<()> {
    let coord = start_coordinator(|_| {}).await?;
    let mut a = Peer::worker(coord.worker_addr, JobType::A).await?;
    coord.wait_for_workers(1).await?;
    let mut b = Peer::worker(coord.worker_addr, JobType::B).await?;
    coord.wait_for_workers(2).await?;

    let mut requester = Peer::connect(coord.requester_addr).await?;
    requester.request(1, JobType::B).await?;
    let on_b = b.next_job().await?;
    assert_eq!(on_b.job_type, JobType::B);

    requester.request(2, JobType::A).await?;
    let on_a = a.next_job().await?;
    assert_eq!(on_a.job_type, JobType::A);

    b.answer(&on_b, true, b"b").await?;
    a.answer(&on_a, true, b"a").await?;
    let mut ids = vec![
        requester.next_result().await?.id,
        requester.next_result().await?.id,
    ];
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);

    coord.stop().await
}
