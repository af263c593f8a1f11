//! Benchmark client: runs transactions against an in-process shard
//! set as fast as it can for a fixed duration, measuring per-phase and
//! per-transaction latency. A direct descendant of `benchClient.cc`:
//! same flags (minus `-s`/`-e`, which the original declared but never
//! read), same workload generator, same summary line format.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rand::Rng;

use shardkv_client::{Coordinator, LocalShardClient, ShardClient};
use shardkv_core::TxnId;
use shardkv_engine::{LocalExecutor, LockStore, OCCStore, ReplicaShim, TssShim, TxnStore};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
enum Mode {
    VrL,
    SpecL,
    VrOcc,
    SpecOcc,
    FastOcc,
}

impl Mode {
    fn backend(self) -> Box<dyn TxnStore> {
        match self {
            Mode::VrL | Mode::SpecL => Box::new(LockStore::new()),
            Mode::VrOcc | Mode::SpecOcc | Mode::FastOcc => Box::new(OCCStore::new()),
        }
    }
}

/// `shardkv-bench -c <config> -f <keys-file> -N <shards> -d <secs> -l <txn-len> -w <write-pct> -k <nkeys> -m <mode>`
#[derive(Debug, Parser)]
#[command(name = "shardkv-bench")]
struct Args {
    /// Path to the replica group's configuration file (unused by the
    /// in-process backend but kept for CLI fidelity).
    #[arg(short = 'c', value_name = "conf-file")]
    config: Option<PathBuf>,

    /// File of newline-separated keys to draw the workload from.
    #[arg(short = 'f', value_name = "keys-file")]
    keys_file: PathBuf,

    /// Number of shards to spread keys across.
    #[arg(short = 'N', default_value_t = 1)]
    n_shards: usize,

    /// How long to run, in seconds.
    #[arg(short = 'd', default_value_t = 10)]
    duration: u64,

    /// Operations per transaction.
    #[arg(short = 'l', default_value_t = 10)]
    txn_len: u32,

    /// Percentage (0-100) of operations that are writes.
    #[arg(short = 'w', default_value_t = 50)]
    write_pct: u32,

    /// Number of keys to read from the keys file.
    #[arg(short = 'k', default_value_t = 100)]
    n_keys: usize,

    /// Protocol/backend mode.
    #[arg(short = 'm', value_name = "mode")]
    mode: Mode,
}

struct Totals {
    transactions: u64,
    committed: u64,
    commit_latency_us: f64,
    begin_count: u64,
    begin_latency_us: f64,
    get_count: u64,
    get_latency_us: f64,
    put_count: u64,
    put_latency_us: f64,
    total_committed_latency_us: f64,
}

impl Totals {
    fn new() -> Self {
        Totals {
            transactions: 0,
            committed: 0,
            commit_latency_us: 0.0,
            begin_count: 0,
            begin_latency_us: 0.0,
            get_count: 0,
            get_latency_us: 0.0,
            put_count: 0,
            put_latency_us: 0.0,
            total_committed_latency_us: 0.0,
        }
    }
}

fn wall_clock() -> (u64, u32) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (now.as_secs(), now.subsec_micros())
}

fn read_keys(path: &PathBuf, n_keys: usize) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("could not read keys from {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut keys = Vec::with_capacity(n_keys);
    for line in reader.lines().take(n_keys) {
        keys.push(line?);
    }
    if keys.len() < n_keys {
        bail!("keys file {} has fewer than {} lines", path.display(), n_keys);
    }
    Ok(keys)
}

fn build_coordinator(mode: Mode, n_shards: usize) -> Coordinator {
    let shards: Vec<Arc<dyn ShardClient>> = (0..n_shards)
        .map(|_| {
            let exec = LocalExecutor::new(ReplicaShim::new(mode.backend()));
            Arc::new(LocalShardClient::spawn(exec)) as Arc<dyn ShardClient>
        })
        .collect();
    let tss: Arc<dyn ShardClient> =
        Arc::new(LocalShardClient::spawn(LocalExecutor::new(TssShim::new())));
    Coordinator::new(TxnId(rand::thread_rng().gen()), shards, tss)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if let Some(config) = &args.config {
        if !config.exists() {
            bail!("unable to read configuration file: {}", config.display());
        }
    }

    let keys = read_keys(&args.keys_file, args.n_keys)?;
    let coordinator = build_coordinator(args.mode, args.n_shards);
    let mut rng = rand::thread_rng();

    tracing::info!(
        mode = ?args.mode,
        n_shards = args.n_shards,
        duration_secs = args.duration,
        n_keys = keys.len(),
        "benchmark starting"
    );

    let mut totals = Totals::new();
    let run_start = Instant::now();
    let deadline = std::time::Duration::from_secs(args.duration);

    loop {
        let (t1_sec, t1_usec) = wall_clock();
        let begin_t = Instant::now();
        coordinator.begin();
        totals.begin_count += 1;
        totals.begin_latency_us += begin_t.elapsed().as_micros() as f64;

        for _ in 0..args.txn_len {
            let key = &keys[rng.gen_range(0..keys.len())];
            if rng.gen_range(0..100) < args.write_pct {
                let op_t = Instant::now();
                coordinator.put(key.as_bytes(), key.as_bytes());
                totals.put_count += 1;
                totals.put_latency_us += op_t.elapsed().as_micros() as f64;
            } else {
                let op_t = Instant::now();
                let _ = coordinator.get(key.as_bytes());
                totals.get_count += 1;
                totals.get_latency_us += op_t.elapsed().as_micros() as f64;
            }
        }

        let commit_t = Instant::now();
        let committed = coordinator.commit();
        totals.commit_latency_us += commit_t.elapsed().as_micros() as f64;

        let (t2_sec, t2_usec) = wall_clock();
        let latency_us = ((t2_sec as i64 - t1_sec as i64) * 1_000_000
            + (t2_usec as i64 - t1_usec as i64)) as i64;

        eprintln!(
            "{} {}.{:06} {}.{:06} {} {}",
            totals.transactions + 1,
            t1_sec,
            t1_usec,
            t2_sec,
            t2_usec,
            latency_us,
            i32::from(committed)
        );

        if committed {
            totals.committed += 1;
            totals.total_committed_latency_us += latency_us as f64;
        }
        totals.transactions += 1;

        if run_start.elapsed() > deadline {
            break;
        }
    }

    println!("# Commit_Ratio: {}", totals.committed as f64 / totals.transactions as f64);
    println!(
        "# Overall_Latency: {}",
        totals.total_committed_latency_us / totals.committed as f64
    );
    println!("# Begin: {}, {}", totals.begin_count, totals.begin_latency_us / totals.begin_count as f64);
    println!("# Get: {}, {}", totals.get_count, totals.get_latency_us / totals.get_count as f64);
    println!("# Put: {}, {}", totals.put_count, totals.put_latency_us / totals.put_count as f64);
    println!(
        "# Commit: {}, {}",
        totals.transactions,
        totals.commit_latency_us / totals.transactions as f64
    );

    Ok(())
}
