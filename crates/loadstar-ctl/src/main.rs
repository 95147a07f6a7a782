//! loadstar-ctl: command-line interface for the loadstar coordinator.

use anyhow::{Context, Result, bail};

use loadstar_core::JobType;

mod cmd;

const DEFAULT_API_PORT: u16 = 30080;
const DEFAULT_WORKER_PORT: u16 = 30000;
const DEFAULT_REQUESTER_PORT: u16 = 30001;

/// Options shared by every subcommand. Unset ones fall back per command.
struct Options {
    api_port: u16,
    host: String,
    port: Option<u16>,
    job_type: JobType,
    count: u64,
    first_id: u64,
    fast_ms: u64,
    slow_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            host: "127.0.0.1".to_string(),
            port: None,
            job_type: JobType::A,
            count: 1,
            first_id: 0,
            fast_ms: 200,
            slow_ms: 1000,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    value(args, i, flag)?
        .parse()
        .map_err(|_| anyhow::anyhow!("{flag} must be a number"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut opts = Options::default();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--api-port" => {
                i += 1;
                opts.api_port = number(&args, i, flag)?;
            }
            "--host" => {
                i += 1;
                opts.host = value(&args, i, flag)?.to_string();
            }
            "--port" => {
                i += 1;
                opts.port = Some(number(&args, i, flag)?);
            }
            "--type" => {
                i += 1;
                let raw = value(&args, i, flag)?;
                opts.job_type = match raw.parse() {
                    Ok(t) => t,
                    Err(_) => bail!("--type must be A or B, got {raw:?}"),
                };
            }
            "--count" => {
                i += 1;
                opts.count = number(&args, i, flag)?;
            }
            "--first-id" => {
                i += 1;
                opts.first_id = number(&args, i, flag)?;
            }
            "--fast-ms" => {
                i += 1;
                opts.fast_ms = number(&args, i, flag)?;
            }
            "--slow-ms" => {
                i += 1;
                opts.slow_ms = number(&args, i, flag)?;
            }
            _ => remaining.push(flag),
        }
        i += 1;
    }

    let api = opts.api_port;
    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(api).await,
        ["workers"] => cmd::status::cmd_workers(api).await,
        ["requesters"] => cmd::status::cmd_requesters(api).await,
        ["shutdown"] => cmd::status::cmd_shutdown(api).await,
        ["submit"] => {
            let port = opts.port.unwrap_or(DEFAULT_REQUESTER_PORT);
            cmd::submit::cmd_submit(&opts.host, port, opts.job_type, opts.count, opts.first_id).await
        }
        ["worker"] => {
            let port = opts.port.unwrap_or(DEFAULT_WORKER_PORT);
            let timing = cmd::worker::Timing {
                fast_ms: opts.fast_ms,
                slow_ms: opts.slow_ms,
            };
            cmd::worker::cmd_worker(&opts.host, port, opts.job_type, timing).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("loadstar-ctl — loadstar coordinator control");
    println!();
    println!("USAGE:");
    println!("  loadstar-ctl [--api-port <port>] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status                 Coordinator totals and queue depths");
    println!("  workers                Connected workers and their load");
    println!("  requesters             Connected requesters");
    println!("  shutdown               Stop the coordinator");
    println!("  submit                 Act as a requester and print each result");
    println!("      --host <host> --port <port> --type <A|B> --count <n> [--first-id <id>]");
    println!("  worker                 Run a reference worker");
    println!("      --host <host> --port <port> --type <A|B> [--fast-ms <ms>] [--slow-ms <ms>]");
    println!();
    println!("OPTIONS:");
    println!("  --api-port <port>      Status API port (default: {})", DEFAULT_API_PORT);
}
