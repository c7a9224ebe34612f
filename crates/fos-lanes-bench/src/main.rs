//! fOS Lanes Bench - Main Entry Point
//!
//! Pushes a batch of small tasks through both lanes from several producer
//! threads, waits on a sample of them, drains, and logs per-lane counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use fos_lanes::{Lane, Scheduler, SchedulerConfig};

const PRODUCERS: usize = 4;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("fOS Lanes {} bench starting", fos_lanes::VERSION);

    // Parse command line for task count
    let tasks: usize = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid task count: {arg}"))?,
        None => 10_000,
    };

    let scheduler = Scheduler::new(SchedulerConfig::default())?;
    scheduler
        .initialize_default()
        .context("failed to start lane threads")?;

    let checksum = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let scheduler = Arc::clone(&scheduler);
            let checksum = Arc::clone(&checksum);
            thread::spawn(move || {
                let mut waited = 0usize;
                for i in (p..tasks).step_by(PRODUCERS) {
                    let lane = if i % 4 == 0 { Lane::Critical } else { Lane::Background };
                    let checksum = Arc::clone(&checksum);
                    let id = scheduler.spawn(lane, move || {
                        checksum.fetch_add(i as u64, Ordering::Relaxed);
                    });
                    if i % 100 == 0 && scheduler.wait(lane, id, "bench-sample") {
                        waited += 1;
                    }
                }
                waited
            })
        })
        .collect();

    let mut waited = 0;
    for producer in producers {
        waited += producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }

    if scheduler.wait_for_all(Duration::from_secs(60)) {
        anyhow::bail!("lanes did not drain within 60s");
    }
    let elapsed = started.elapsed();

    let expected: u64 = (0..tasks as u64).sum();
    let actual = checksum.load(Ordering::Relaxed);
    anyhow::ensure!(actual == expected, "checksum mismatch: {actual} != {expected}");

    tracing::info!(
        tasks,
        waited,
        elapsed_ms = elapsed.as_millis() as u64,
        per_sec = (tasks as f64 / elapsed.as_secs_f64()) as u64,
        "drained"
    );
    for lane in Lane::ALL {
        let stats = scheduler.stats(lane);
        tracing::info!(
            %lane,
            enqueued = stats.enqueued,
            executed = stats.executed,
            promoted = stats.promoted,
            panicked = stats.panicked,
            "lane stats"
        );
    }

    scheduler.shutdown();
    Ok(())
}
