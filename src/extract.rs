//! Turn dataset records into benchmark requests.

use indicatif::ProgressBar;
use log::{debug, warn};

use crate::config::{DatasetConfig, Record};
use crate::error::Result;
use crate::lengths::{norm_dist_lengths, LenDist, TaskIds};
use crate::tokenize::Tokenizer;
use crate::workload::GeneratedRequests;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Requests whose tokenized prompt is longer are skipped, not truncated.
    pub max_input_len: Option<usize>,
    /// Stop after this many accepted requests.
    pub num_requests: Option<usize>,
    /// Replaces golden output lengths when set.
    pub output_len_dist: Option<LenDist>,
    pub task_id: i64,
    /// Inclusive range for per-request random task ids.
    pub rand_task_id: Option<(i64, i64)>,
    pub random_seed: u64,
}

// same defaults as the command line
impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_input_len: None,
            num_requests: None,
            output_len_dist: None,
            task_id: -1,
            rand_task_id: None,
            random_seed: 420,
        }
    }
}

/// Single pass over `records`. The source is never pulled again once
/// `num_requests` requests have been accepted, and the first error
/// (source, missing key, tokenizer) aborts the run.
pub fn extract_requests<I, R, T>(
    config: &DatasetConfig,
    records: I,
    tokenizer: &T,
    opts: &ExtractOptions,
    progress: &ProgressBar,
) -> Result<GeneratedRequests>
where
    I: IntoIterator<Item = Result<R>>,
    R: Record,
    T: Tokenizer + ?Sized,
{
    let mut task_ids = TaskIds::new(opts.task_id, opts.rand_task_id, opts.random_seed)?;
    let mut out = GeneratedRequests::default();

    if opts.num_requests == Some(0) {
        return Ok(out);
    }

    for record in records {
        let record = record?;

        // input
        let prompt = format!("{} {}", config.resolve_prompt(&record)?, config.resolve_input(&record)?);
        debug!("Input sequence: {prompt}");
        let line = tokenizer.encode(&prompt)?;
        if opts.max_input_len.is_some_and(|max| line.len() > max) {
            continue;
        }
        out.input_lens.push(line.len());
        out.input_ids.push(line);

        // output from the golden answer
        if opts.output_len_dist.is_none() {
            let golden = config.resolve_output(&record)?;
            out.output_lens.push(tokenizer.encode(&golden)?.len() as u64);
        }

        // lora task id
        out.task_ids.push(task_ids.next_id());

        progress.inc(1);
        if opts.num_requests.is_some_and(|n| out.len() >= n) {
            break;
        }
    }

    if let Some(n) = opts.num_requests {
        if out.len() < n {
            warn!(
                "Number of requests ({}) is smaller than the --num-requests user set ({n}).",
                out.len()
            );
        }
    }

    // output if randomized
    if let Some(dist) = opts.output_len_dist {
        out.output_lens = norm_dist_lengths(dist.mean as f64, dist.stdev as f64, out.len(), opts.random_seed);
    }

    debug!("Input lengths: {:?}", out.input_lens);
    debug!("Output lengths: {:?}", out.output_lens);
    Ok(out)
}
