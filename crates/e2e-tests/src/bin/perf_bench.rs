use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use e2e_tests::{entity, sample_record, TestHarness};
use massindex_types::{JobParameters, JobStatus, PrimaryKey, Record};

const SMALL_RECORD_COUNT: usize = 20_000;
const MEDIUM_RECORD_COUNT: usize = 200_000;
const DEFAULT_ITERATIONS: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "perf_bench", about = "Mass indexer throughput benchmark")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    /// Seed for key gaps
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Write the JSON summary here as well as to stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn record_count(&self) -> usize {
        match self {
            DatasetTier::Small => SMALL_RECORD_COUNT,
            DatasetTier::Medium => MEDIUM_RECORD_COUNT,
        }
    }
}

/// Thread layout of one benchmark step.
#[derive(Clone, Copy, Debug)]
struct Layout {
    name: &'static str,
    loaders: usize,
    max_threads: Option<usize>,
}

const LAYOUTS: [Layout; 3] = [
    Layout {
        name: "serial",
        loaders: 1,
        max_threads: Some(2),
    },
    Layout {
        name: "loaders_4",
        loaders: 4,
        max_threads: Some(8),
    },
    Layout {
        name: "unbounded",
        loaders: 6,
        max_threads: None,
    },
];

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p50_records_per_sec: f64,
    samples: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    records: usize,
    iterations: usize,
    steps: BTreeMap<String, StepMetrics>,
}

/// Sorted keys with random gaps so partitions cover uneven key ranges.
fn sparse_keys(count: usize, rng: &mut StdRng) -> Vec<PrimaryKey> {
    let mut key: PrimaryKey = 0;
    (0..count)
        .map(|_| {
            key += rng.random_range(1..=5);
            key
        })
        .collect()
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn run_step(layout: Layout, keys: &[PrimaryKey], iterations: usize) -> StepMetrics {
    let book = entity("Book");
    let records: Vec<Record> = keys.iter().map(|&k| sample_record(&book, k)).collect();

    let mut samples = Vec::with_capacity(iterations);
    for iteration in 0..iterations {
        let harness = TestHarness::new();
        for batch in records.chunks(5_000) {
            harness
                .storage
                .put_records(batch)
                .expect("Failed to seed records");
        }

        let params = JobParameters::for_types(["Book"])
            .with_rows_per_partition(keys.len().div_ceil(8).max(1))
            .with_threads(1, layout.loaders, layout.max_threads)
            .with_job_name(format!("bench-{}-{}", layout.name, iteration));

        let started = Instant::now();
        let report = harness.job(params).run().expect("Job did not start");
        let elapsed = started.elapsed();
        assert_eq!(report.status, JobStatus::Completed, "{:?}", report.error);
        samples.push(elapsed.as_secs_f64() * 1_000.0);
    }

    samples.sort_by(|a, b| a.total_cmp(b));
    let p50_ms = percentile(&samples, 50.0);
    StepMetrics {
        p50_ms,
        p90_ms: percentile(&samples, 90.0),
        p50_records_per_sec: if p50_ms > 0.0 {
            keys.len() as f64 / (p50_ms / 1_000.0)
        } else {
            0.0
        },
        samples: samples.len(),
    }
}

fn main() {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let keys = sparse_keys(args.tier.record_count(), &mut rng);
    let iterations = args.iterations.max(1);

    let mut steps = BTreeMap::new();
    for layout in LAYOUTS {
        eprintln!("Running {} ({} iterations)...", layout.name, iterations);
        steps.insert(layout.name.to_string(), run_step(layout, &keys, iterations));
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        records: keys.len(),
        iterations,
        steps,
    };
    let json = serde_json::to_string_pretty(&output).expect("Failed to serialize output");
    println!("{}", json);
    if let Some(path) = args.out {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create output directory");
        }
        fs::write(&path, json).expect("Failed to write output");
    }
}
