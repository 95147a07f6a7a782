//! `submit`: act as a requester: send jobs, print each result.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use tokio::net::TcpStream;

use loadstar_core::assembler::DEFAULT_CHUNK_SIZE;
use loadstar_core::{Job, JobType};
use loadstar_services::{Inbound, PacketReader, PacketWriter};

pub async fn cmd_submit(host: &str, port: u16, job_type: JobType, count: u64, first_id: u64) -> Result<()> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to requester port {host}:{port}"))?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = PacketReader::new(read_half);
    let mut writer = PacketWriter::new(write_half, DEFAULT_CHUNK_SIZE);

    let started = Instant::now();
    for id in first_id..first_id + count {
        writer
            .send_packet(&Job::new(id, job_type).request_packet())
            .await
            .with_context(|| format!("failed to send job {id}"))?;
    }
    println!("Submitted {count} job(s) of type {job_type}.");

    let mut received = 0;
    let mut failed = 0;
    while received < count {
        match reader.next().await.context("connection failed")? {
            Inbound::Message(packet) => {
                let job = match Job::from_result(&packet) {
                    Ok(j) => j,
                    Err(e) => {
                        eprintln!("  ignoring malformed result: {e}");
                        continue;
                    }
                };
                received += 1;
                let outcome = if job.succeeded {
                    "ok"
                } else {
                    failed += 1;
                    "FAILED"
                };
                println!(
                    "  job {:>6}  {}  {:<6}  {}",
                    job.id,
                    job.job_type,
                    outcome,
                    String::from_utf8_lossy(&job.result)
                );
            }
            Inbound::Malformed(e) => eprintln!("  discarded input: {e}"),
            Inbound::Closed => bail!("coordinator closed the connection after {received} of {count} results"),
        }
    }

    println!(
        "Received {received} result(s), {failed} failed, in {:.2}s.",
        started.elapsed().as_secs_f64()
    );
    writer.shutdown().await.ok();
    Ok(())
}
