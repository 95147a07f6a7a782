//! Coordinator status, workers, requesters, shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    workers: usize,
    requesters: usize,
    in_flight: usize,
    pending_requests: usize,
    pending_completions: usize,
    totals: Totals,
}

#[derive(Deserialize)]
struct Totals {
    requested: u64,
    delivered: u64,
    undeliverable: u64,
    rejected: u64,
    discarded: u64,
}

#[derive(Deserialize)]
struct WorkersResponse {
    workers: Vec<WorkerInfo>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct WorkerInfo {
    id: u64,
    peer: String,
    specialty: String,
    load: u64,
    outstanding: usize,
    queued: usize,
    completed: u64,
    connected_secs: u64,
}

#[derive(Deserialize)]
struct RequestersResponse {
    requesters: Vec<RequesterInfo>,
}

#[derive(Deserialize)]
struct RequesterInfo {
    id: u64,
    peer: String,
    requested: u64,
    completed: u64,
    queued: usize,
    connected_secs: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Loadstar Coordinator Status");
    println!("═══════════════════════════════════════");
    println!("  Workers             : {}", resp.workers);
    println!("  Requesters          : {}", resp.requesters);
    println!("  Jobs in flight      : {}", resp.in_flight);
    println!("  Pending requests    : {}", resp.pending_requests);
    println!("  Pending completions : {}", resp.pending_completions);
    println!();
    println!("  Requested     : {}", resp.totals.requested);
    println!("  Delivered     : {}", resp.totals.delivered);
    println!("  Undeliverable : {}", resp.totals.undeliverable);
    println!("  Rejected      : {}", resp.totals.rejected);
    println!("  Discarded     : {}", resp.totals.discarded);

    Ok(())
}

pub async fn cmd_workers(port: u16) -> Result<()> {
    let resp: WorkersResponse = get_json(&format!("{}/workers", base_url(port))).await?;

    if resp.workers.is_empty() {
        println!("No workers connected.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Workers ({})", resp.workers.len());
    println!("═══════════════════════════════════════");

    for w in &resp.workers {
        println!("  ┌─ worker {}", w.id);
        println!("  │  peer        : {}", w.peer);
        println!("  │  specialty   : {}", w.specialty);
        println!("  │  load        : {}", w.load);
        println!("  │  outstanding : {} ({} queued)", w.outstanding, w.queued);
        println!("  │  completed   : {}", w.completed);
        println!("  └─ uptime      : {}s", w.connected_secs);
    }

    Ok(())
}

pub async fn cmd_requesters(port: u16) -> Result<()> {
    let resp: RequestersResponse = get_json(&format!("{}/requesters", base_url(port))).await?;

    if resp.requesters.is_empty() {
        println!("No requesters connected.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Requesters ({})", resp.requesters.len());
    println!("═══════════════════════════════════════");

    for r in &resp.requesters {
        println!("  ┌─ requester {}", r.id);
        println!("  │  peer      : {}", r.peer);
        println!("  │  requested : {}", r.requested);
        println!("  │  completed : {} ({} queued)", r.completed, r.queued);
        println!("  └─ uptime    : {}s", r.connected_secs);
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
