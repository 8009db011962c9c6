use std::sync::Arc;
use std::time::{Duration, Instant};

use studiokeep::clock::SystemClock;
use studiokeep::config::Config;
use studiokeep::engine::{BookingError, Engine};
use studiokeep::model::*;
use studiokeep::notify::NotifyHub;
use studiokeep::schedule::NoopSink;
use studiokeep::store::{MemoryStore, wal_path};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn engine(store: Arc<MemoryStore>) -> Arc<Engine> {
    let mut config = Config::default();
    config.max_commit_attempts = 50;
    Arc::new(Engine::new(
        store,
        Arc::new(SystemClock),
        config,
        Arc::new(NoopSink),
        Arc::new(NotifyHub::new()),
    ))
}

/// Two-hour slot `i`, starting a month out on an hour boundary.
fn slot(i: i64) -> Span {
    let now = chrono::Utc::now().timestamp_millis();
    let base = (now / HOUR + 1) * HOUR + 30 * DAY;
    let start = base + i * 2 * HOUR;
    Span::new(start, start + 2 * HOUR)
}

fn request(span: Span) -> CreateBooking {
    CreateBooking {
        span,
        booking_type: BookingType::Confirmed,
        label: None,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        if let Err(e) = engine.create(Ulid::new(), request(slot(i as i64))).await {
            eprintln!("create failed: {e}");
            continue;
        }
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

/// Many tasks racing for the same few slots: at most three win each.
async fn phase2_contended(engine: Arc<Engine>) {
    let n_tasks = 64;
    let n_slots = 8;
    let offset = 5000;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine.create(Ulid::new(), request(slot(offset + i % n_slots))).await;
            (t.elapsed(), result)
        }));
    }

    let mut latencies = Vec::new();
    let (mut admitted, mut refused, mut conflicts) = (0, 0, 0);
    for h in handles {
        let Ok((latency, result)) = h.await else { continue };
        latencies.push(latency);
        match result {
            Ok(_) => admitted += 1,
            Err(BookingError::KeepLimitExceeded) => refused += 1,
            Err(_) => conflicts += 1,
        }
    }

    println!(
        "  {n_tasks} creates over {n_slots} slots in {:.2}s: {admitted} admitted, {refused} refused, {conflicts} gave up",
        start.elapsed().as_secs_f64()
    );
    assert!(admitted <= 3 * n_slots, "keep limit breached");
    print_latency("contended create latency", &mut latencies);
}

/// Cancel rank 1 of full slots while readers poll keep status.
async fn phase3_cancel_and_promote(engine: Arc<Engine>) {
    let n_slots = 200;
    let offset = 10_000;
    let mut heads = Vec::with_capacity(n_slots as usize);
    for i in 0..n_slots {
        for rank in 0..3 {
            let owner = Ulid::new();
            match engine.create(owner, request(slot(offset + i))).await {
                Ok(b) if rank == 0 => heads.push((owner, b.id)),
                Ok(_) => {}
                Err(e) => eprintln!("setup failed: {e}"),
            }
        }
    }

    let reader_engine = engine.clone();
    let reader = tokio::spawn(async move {
        let mut latencies = Vec::new();
        for i in 0..n_slots {
            let t = Instant::now();
            let _ = reader_engine.keep_status(slot(offset + i)).await;
            latencies.push(t.elapsed());
        }
        latencies
    });

    let mut latencies = Vec::with_capacity(heads.len());
    let mut promoted = 0;
    let start = Instant::now();
    for (owner, id) in heads {
        let t = Instant::now();
        match engine.cancel(Actor::User(owner), id, None).await {
            Ok(release) => promoted += release.promoted().len(),
            Err(e) => eprintln!("cancel failed: {e}"),
        }
        latencies.push(t.elapsed());
    }
    println!(
        "  {} cancels in {:.2}s, {promoted} promotions",
        latencies.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("cancel latency", &mut latencies);
    if let Ok(mut reads) = reader.await {
        print_latency("keep status latency under load", &mut reads);
    }
}

async fn phase4_compaction(store: &MemoryStore) {
    let appends = store.wal_appends_since_compact().await;
    let t = Instant::now();
    match store.compact_wal().await {
        Ok(()) => println!(
            "  compacted {appends} appends in {:.2}ms",
            t.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => eprintln!("compaction failed: {e}"),
    }
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("studiokeep_bench_{}", Ulid::new()));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("cannot create {}: {e}", dir.display());
        return;
    }
    let store = match MemoryStore::open(&wal_path(&dir, "bench")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("cannot open WAL: {e}");
            return;
        }
    };
    let engine = engine(store.clone());

    println!("=== studiokeep stress benchmark ===");
    println!("wal: {}\n", dir.display());

    println!("[phase 1] sequential create throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended creates");
    phase2_contended(engine.clone()).await;

    println!("\n[phase 3] cancel with promotion, reads under load");
    phase3_cancel_and_promote(engine.clone()).await;

    println!("\n[phase 4] WAL compaction");
    phase4_compaction(&store).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== benchmark complete ===");
}
