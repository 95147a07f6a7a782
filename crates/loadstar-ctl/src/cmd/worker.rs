//! `worker`: a reference worker.
//!
//! Handshakes with its specialty, then runs dispatched jobs one at a time.
//! "Running" a job means sleeping for the fast or slow duration and
//! answering with a random number.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use loadstar_core::assembler::DEFAULT_CHUNK_SIZE;
use loadstar_core::job::handshake_packet;
use loadstar_core::{Job, JobType};
use loadstar_services::{Inbound, PacketReader, PacketWriter};

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub fast_ms: u64,
    pub slow_ms: u64,
}

impl Timing {
    fn for_job(&self, specialty: JobType, job_type: JobType) -> Duration {
        if specialty == job_type {
            Duration::from_millis(self.fast_ms)
        } else {
            Duration::from_millis(self.slow_ms)
        }
    }
}

pub async fn cmd_worker(host: &str, port: u16, specialty: JobType, timing: Timing) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to worker port {host}:{port}"))?;
    let (read_half, write_half) = stream.into_split();
    let mut writer = PacketWriter::new(write_half, DEFAULT_CHUNK_SIZE);
    writer
        .send_packet(&handshake_packet(specialty))
        .await
        .context("failed to send handshake")?;
    println!("Worker connected to {host}:{port}, optimised for {specialty}.");

    let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
    let receiver = tokio::spawn(async move {
        let mut reader = PacketReader::new(read_half);
        loop {
            match reader.next().await {
                Ok(Inbound::Message(packet)) => match Job::from_request(&packet) {
                    Ok(job) => {
                        if jobs_tx.send(job).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("  ignoring malformed job: {e}"),
                },
                Ok(Inbound::Malformed(e)) => eprintln!("  discarded input: {e}"),
                Ok(Inbound::Closed) => break,
                Err(e) => {
                    eprintln!("  read failed: {e}");
                    break;
                }
            }
        }
    });

    let mut done = 0u64;
    while let Some(job) = jobs_rx.recv().await {
        let took = timing.for_job(specialty, job.job_type);
        tokio::time::sleep(took).await;

        let answer = rand::random::<u32>().to_string();
        let result = job.clone().with_outcome(true, answer.clone());
        writer
            .send_message(&result.result_template(), &result.result)
            .await
            .with_context(|| format!("failed to send result for job {}", job.id))?;
        done += 1;
        println!("  job {:>6}  {}  {:>5}ms  -> {}", job.id, job.job_type, took.as_millis(), answer);
    }

    receiver.await.ok();
    println!("Coordinator closed the connection after {done} job(s).");
    Ok(())
}
