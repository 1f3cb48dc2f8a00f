//! Simulate one training step of a class-sharded classifier on the CPU.
//!
//! Spawns one thread per rank, each holding its slice of the logits and of
//! the local batch. Labels are gathered and encoded as sparse one-hot
//! shards, accuracy is computed with the distributed merger, and the
//! result is checked against the single-process merger over the same
//! logits.
//!
//! Usage:
//!   cargo run -p fcshard-cpu --example simulate -- --classes 1000 --ranks 4

use std::thread;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use fcshard::{
    compute_batch_acc, compute_batch_acc_dist, report_memory_usage, sparse_onehot_labels_dist,
    BatchLogits, ClassSplit, Comm, DeviceId, Error, ParallelConfig, Result, Tensor,
};
use fcshard_cpu::{CpuBackend, CpuTensor, LocalComm};

/// Compare distributed and single-process accuracy on random logits.
#[derive(Parser)]
#[command(name = "simulate")]
struct Cli {
    /// Total number of classes across all shards
    #[arg(short, long, default_value_t = 1000)]
    classes: usize,

    /// Number of model-parallel ranks
    #[arg(short, long, default_value_t = 4)]
    ranks: usize,

    /// Samples per rank
    #[arg(short, long, default_value_t = 8)]
    batch: usize,

    /// Training step passed to the single-process merger
    #[arg(long, default_value_t = 10)]
    step: u64,

    /// RNG seed for logits and labels
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

struct RankOutput {
    accuracy: f32,
    global_labels: Vec<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let world_size = cli.ranks;
    let split = ClassSplit::even(cli.classes, world_size)?;
    let global_batch = cli.batch * world_size;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let full_logits: Vec<f32> = (0..global_batch * cli.classes)
        .map(|_| rng.gen_range(-4.0f32..4.0))
        .collect();
    let class_bound = u32::try_from(cli.classes)
        .map_err(|_| Error::Config(format!("too many classes: {}", cli.classes)))?;
    let local_labels: Vec<Vec<u32>> = (0..world_size)
        .map(|_| (0..cli.batch).map(|_| rng.gen_range(0..class_bound)).collect())
        .collect();

    println!(
        "=== {world_size} ranks, {} classes, split {:?} ===",
        cli.classes,
        split.sizes()
    );

    let comms = LocalComm::group(world_size)?;
    let outputs: Vec<Result<RankOutput>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let split = split.clone();
                let full_logits = &full_logits;
                let local_labels = &local_labels;
                s.spawn(move || {
                    let rank = comm.rank();
                    let config = ParallelConfig::new(world_size, rank, rank, split)?;
                    run_rank(&config, &comm, full_logits, &local_labels[rank], global_batch)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(Error::Other("rank thread panicked".to_string())))
            })
            .collect()
    });
    let outputs = outputs.into_iter().collect::<Result<Vec<_>>>()?;

    // Single-process merger over the same logits, one tensor per shard.
    let shards: Vec<Vec<CpuTensor>> = split
        .ranges()
        .into_iter()
        .enumerate()
        .map(|(shard, range)| {
            let width = range.len();
            let block = column_block(&full_logits, cli.classes, range);
            vec![CpuTensor::from_slice(
                DeviceId(shard),
                &[global_batch, width],
                &block,
            )]
        })
        .collect();
    let labels = CpuTensor::from_u32(&[global_batch], &outputs[0].global_labels);
    let single = compute_batch_acc::<CpuBackend>(
        BatchLogits::Sharded(&shards),
        &labels,
        global_batch,
        cli.step,
    )?;

    for (rank, out) in outputs.iter().enumerate() {
        println!("rank {rank}: accuracy {:.4}", out.accuracy);
    }
    match single.computed() {
        Some(acc) => {
            println!("single process (step {}): accuracy {acc:.4}", cli.step);
            if outputs.iter().all(|o| (o.accuracy - acc).abs() < 1e-6) {
                println!("PASS: distributed and single-process accuracy agree");
            } else {
                println!("FAIL: distributed and single-process accuracy differ");
            }
        }
        None => println!(
            "single process (step {}): skipped, not an accuracy step",
            cli.step
        ),
    }
    Ok(())
}

fn run_rank(
    config: &ParallelConfig,
    comm: &LocalComm,
    full_logits: &[f32],
    local_labels: &[u32],
    global_batch: usize,
) -> Result<RankOutput> {
    let num_classes = config.class_split.num_classes();
    let range = config.local_classes();
    let width = range.len();
    let logits = CpuTensor::from_slice(
        config.device(),
        &[global_batch, width],
        &column_block(full_logits, num_classes, range),
    );
    let labels = CpuTensor::from_slice(config.device(), &[local_labels.len()], local_labels);

    let (global, sparse) = sparse_onehot_labels_dist::<CpuBackend, _>(config, comm, &labels)?;
    let target = sparse[config.rank].to_tensor::<CpuBackend>()?;
    tracing::debug!(
        rank = config.rank,
        nnz = sparse[config.rank].nnz(),
        shape = ?target.shape(),
        "materialized local target"
    );
    report_memory_usage::<CpuBackend>(config, "after labels")?;

    let accuracy = compute_batch_acc_dist::<CpuBackend, _>(config, comm, &logits, &global)?;
    Ok(RankOutput {
        accuracy,
        global_labels: global.as_u32_slice().to_vec(),
    })
}

fn column_block(full: &[f32], cols: usize, range: std::ops::Range<usize>) -> Vec<f32> {
    full.chunks(cols)
        .flat_map(|row| row[range.clone()].iter().copied())
        .collect()
}
