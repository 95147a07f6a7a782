//! /status, /workers, /requesters, /shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use loadstar_services::StatsSnapshot;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub workers: usize,
    pub requesters: usize,
    pub in_flight: usize,
    pub pending_requests: usize,
    pub pending_completions: usize,
    pub totals: Totals,
}

#[derive(Serialize)]
pub struct Totals {
    pub requested: u64,
    pub delivered: u64,
    pub undeliverable: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub workers_seen: u64,
    pub requesters_seen: u64,
}

impl From<StatsSnapshot> for Totals {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            requested: s.requested,
            delivered: s.delivered,
            undeliverable: s.undeliverable,
            rejected: s.rejected,
            discarded: s.discarded,
            workers_seen: s.workers_seen,
            requesters_seen: s.requesters_seen,
        }
    }
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let dir = &state.directory;
    Json(StatusResponse {
        workers: dir.workers().len(),
        requesters: dir.requesters().len(),
        in_flight: dir.in_flight(),
        pending_requests: dir.pending_requests(),
        pending_completions: dir.pending_completions(),
        totals: state.stats.snapshot().into(),
    })
}

// ── /workers ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerInfo>,
}

#[derive(Serialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub peer: String,
    pub specialty: String,
    pub load: u64,
    pub outstanding: usize,
    pub queued: usize,
    pub completed: u64,
    pub connected_secs: u64,
}

pub async fn handle_workers(State(state): State<ApiState>) -> Json<WorkersResponse> {
    let workers = state
        .directory
        .workers()
        .iter()
        .map(|w| WorkerInfo {
            id: w.id().0,
            peer: w.peer().to_string(),
            specialty: w.specialty().to_string(),
            load: w.total_load(),
            outstanding: w.outstanding_count(),
            queued: w.queued(),
            completed: w.completed_total(),
            connected_secs: w.connected_at().elapsed().as_secs(),
        })
        .collect();

    Json(WorkersResponse { workers })
}

// ── /requesters ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RequestersResponse {
    pub requesters: Vec<RequesterInfo>,
}

#[derive(Serialize)]
pub struct RequesterInfo {
    pub id: u64,
    pub peer: String,
    pub requested: u64,
    pub completed: u64,
    pub queued: usize,
    pub connected_secs: u64,
}

pub async fn handle_requesters(State(state): State<ApiState>) -> Json<RequestersResponse> {
    let requesters = state
        .directory
        .requesters()
        .iter()
        .map(|r| {
            let books = r.books();
            RequesterInfo {
                id: r.id().0,
                peer: r.peer().to_string(),
                requested: books.requested,
                completed: books.completed,
                queued: r.queued(),
                connected_secs: r.connected_at().elapsed().as_secs(),
            }
        })
        .collect();

    Json(RequestersResponse { requesters })
}

// ── /shutdown ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    state.shutdown.cancel();
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
