//! Synthetic workloads: random token ids with normally distributed lengths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map as JsonMap, Value};

use crate::error::{PrepError, Result};
use crate::lengths::{norm_dist_lengths, TaskIds};
use crate::workload::GeneratedRequests;

#[derive(Debug, Clone)]
pub struct NormDistOptions {
    pub num_requests: usize,
    pub input_mean: f64,
    pub input_stdev: f64,
    pub output_mean: f64,
    pub output_stdev: f64,
    pub task_id: i64,
    pub rand_task_id: Option<(i64, i64)>,
    pub random_seed: u64,
}

impl NormDistOptions {
    pub fn metadata_fields(&self) -> JsonMap<String, Value> {
        let mut meta = JsonMap::new();
        meta.insert("input_mean".into(), json!(self.input_mean));
        meta.insert("input_stdev".into(), json!(self.input_stdev));
        meta.insert("output_mean".into(), json!(self.output_mean));
        meta.insert("output_stdev".into(), json!(self.output_stdev));
        meta
    }
}

/// Requests with random ids in `[0, vocab_size)`. Input and output lengths
/// use different seeds so they are not correlated.
pub fn token_norm_dist(opts: &NormDistOptions, vocab_size: usize) -> Result<GeneratedRequests> {
    if vocab_size == 0 {
        return Err(PrepError::Tokenizer("tokenizer reports an empty vocabulary".into()));
    }
    let mut task_ids = TaskIds::new(opts.task_id, opts.rand_task_id, opts.random_seed)?;

    let input_lens = norm_dist_lengths(opts.input_mean, opts.input_stdev, opts.num_requests, opts.random_seed);
    let output_lens = norm_dist_lengths(
        opts.output_mean,
        opts.output_stdev,
        opts.num_requests,
        opts.random_seed.wrapping_add(1),
    );

    let mut rng = StdRng::seed_from_u64(opts.random_seed.wrapping_add(2));
    let input_ids: Vec<Vec<u32>> = input_lens
        .iter()
        .map(|&len| (0..len).map(|_| rng.gen_range(0..vocab_size) as u32).collect())
        .collect();

    Ok(GeneratedRequests {
        input_lens: input_lens.iter().map(|&l| l as usize).collect(),
        input_ids,
        output_lens,
        task_ids: (0..opts.num_requests).map(|_| task_ids.next_id()).collect(),
    })
}
