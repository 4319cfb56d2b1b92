use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marionette_core::{Config, ConstantBackoff, Context, Task, TaskManager, TaskOptions};

/// Runs a synthetic flaky workload through the task manager.
#[derive(Debug, Parser)]
#[command(name = "marionette", version)]
struct Args {
    /// Number of concurrent workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Tasks buffered before queueing blocks.
    #[arg(long, default_value_t = 64)]
    queue_size: usize,

    #[arg(long, default_value = "marionette-demo")]
    service_name: String,

    /// Number of tasks to submit.
    #[arg(long, default_value_t = 100)]
    tasks: u32,

    /// Task N fails its first `N % (max_failures + 1)` attempts.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(0..=1000))]
    max_failures: u32,

    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Delay between attempts, in milliseconds.
    #[arg(long, default_value_t = 10)]
    backoff_ms: u64,

    /// Every n-th task is delayed instead of queued (0 disables).
    #[arg(long, default_value_t = 10)]
    delay_every: u32,

    /// Give up waiting for the workload after this many seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU32,
    completed: AtomicU32,
    exhausted: AtomicU32,
}

struct FlakyTask {
    failures: u32,
    retries: u32,
    seen: AtomicU32,
    counters: Arc<Counters>,
}

#[async_trait]
impl Task for FlakyTask {
    async fn run(&self, ctx: Context) -> anyhow::Result<()> {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        let attempt = self.seen.fetch_add(1, Ordering::Relaxed) + 1;

        let result = match ctx.err() {
            Some(err) => Err(anyhow::Error::from(err)),
            None if attempt <= self.failures => {
                Err(anyhow::anyhow!("intentional failure on attempt {attempt}"))
            }
            None => {
                sleep(Duration::from_millis(1)).await;
                Ok(())
            }
        };

        match &result {
            Ok(()) => self.counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) if attempt > self.retries => self.counters.exhausted.fetch_add(1, Ordering::Relaxed),
            Err(_) => 0,
        };
        result
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Number of leading attempts task `n` fails.
fn failures_for(n: u32, max_failures: u32) -> u32 {
    match max_failures.checked_add(1) {
        Some(cycle) => n % cycle,
        None => n,
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    service_name: String,
    workers: usize,
    submitted: u32,
    attempts: u32,
    completed: u32,
    exhausted: u32,
    timed_out: bool,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let conf = Config::new(args.workers, args.queue_size, args.service_name.clone());
    let tm = TaskManager::new(conf).context("creating the task manager")?;

    let counters = Arc::new(Counters::default());
    let started = Instant::now();
    tm.start().await;

    for n in 0..args.tasks {
        let task = FlakyTask {
            failures: failures_for(n, args.max_failures),
            retries: args.retries,
            seen: AtomicU32::new(0),
            counters: Arc::clone(&counters),
        };
        let opts = TaskOptions::new()
            .retries(args.retries)
            .backoff(ConstantBackoff::new(Duration::from_millis(args.backoff_ms)))
            .error_msg(format!("flaky task {n}"));

        if args.delay_every > 0 && n % args.delay_every == 0 {
            tm.delay_with(Duration::from_millis(u64::from(n)), task, opts)
                .await
                .context("delaying a task")?;
        } else {
            tm.queue_with(task, opts).await.context("queueing a task")?;
        }
    }
    info!(tasks = args.tasks, "workload submitted");

    let finished = async {
        loop {
            let done = counters.completed.load(Ordering::Relaxed)
                + counters.exhausted.load(Ordering::Relaxed);
            if done >= args.tasks {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    };

    let timed_out = tokio::select! {
        _ = finished => false,
        _ = sleep(Duration::from_secs(args.timeout_secs)) => {
            warn!(timeout_secs = args.timeout_secs, "workload did not finish in time");
            true
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            true
        }
    };

    tm.stop().await;

    let summary = Summary {
        service_name: args.service_name,
        workers: args.workers,
        submitted: args.tasks,
        attempts: counters.attempts.load(Ordering::Relaxed),
        completed: counters.completed.load(Ordering::Relaxed),
        exhausted: counters.exhausted.load(Ordering::Relaxed),
        timed_out,
        elapsed_ms: started.elapsed().as_millis(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
