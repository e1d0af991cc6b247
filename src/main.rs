/*
cargo prepare_dataset \
    --tokenizer meta-llama/Llama-2-7b-hf \
    --output bench/cnn_dailymail_100.json \
    dataset \
    --dataset-name ccdv/cnn_dailymail \
    --dataset-config-name 3.0.0 \
    --dataset-split validation \
    --dataset-input-key article \
    --dataset-prompt "Summarize the following article:" \
    --dataset-output-key highlights \
    --num-requests 100 \
    --max-input-len 1024

synthetic, printed instead of written, random LoRA ids 0..=3
cargo prepare_dataset \
    --tokenizer cl100k_base --stdout --rand-task-id 0 3 \
    token-norm-dist \
    --num-requests 50 \
    --input-mean 128 --input-stdev 16 \
    --output-mean 64 --output-stdev 8
*/

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde_json::{json, Map as JsonMap, Value};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::{create_dir_all, File};
use std::io;
use std::path::{Path, PathBuf};

use prepare_dataset::lengths::LenDist;
use prepare_dataset::synthetic::{token_norm_dist, NormDistOptions};
use prepare_dataset::{
    dataset_dump, extract_requests, load_tokenizer, parse_output_len_dist, print_dataset, source, DatasetConfigBuilder,
    ExtractOptions, GeneratedRequests, PrepError, Tokenizer,
};

// CLI parameters shared by every workload type
#[derive(Parser, Debug)]
#[command(version, about = "Prepare benchmark workloads (tokenized prompts + output lengths) from real or synthetic data.")]
struct Cli {
    // tiktoken encoding (cl100k_base, o200k_base, ...), local tokenizer.json / dir, or Hub model repo id
    #[arg(long)]
    tokenizer: String,

    // Output JSON filename
    #[arg(long, value_name = "PATH", default_value = "preprocessed_dataset.json")]
    output: PathBuf,

    // Print requests to stdout instead of writing the output file
    #[arg(long, default_value_t = false)]
    stdout: bool,

    #[arg(long, default_value_t = 420)]
    random_seed: u64,

    // LoRA task id of every request
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    task_id: i64,

    // Draw each task id uniformly from [MIN, MAX]
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    rand_task_id: Option<Vec<i64>>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    // Also write a timestamped log file here
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    // HF access token for gated datasets / tokenizers (falls back to none)
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare dataset from real dataset.
    Dataset(DatasetArgs),
    /// Prepare synthetic dataset with normally distributed lengths.
    TokenNormDist(NormDistArgs),
}

#[derive(Args, Debug)]
struct DatasetArgs {
    // Dataset name in HuggingFace
    #[arg(long)]
    dataset_name: String,

    // Dataset config name in HuggingFace (if exists)
    #[arg(long)]
    dataset_config_name: Option<String>,

    // Split of the dataset to use
    #[arg(long)]
    dataset_split: String,

    // The dataset dictionary key for input
    #[arg(long)]
    dataset_input_key: String,

    // The dataset dictionary key for prompt (exactly one of key / literal)
    #[arg(long)]
    dataset_prompt_key: Option<String>,

    // The prompt string when there is no prompt key for the dataset
    #[arg(long)]
    dataset_prompt: Option<String>,

    // The dataset dictionary key for output (if exists)
    #[arg(long)]
    dataset_output_key: Option<String>,

    // Read records from a local JSON Lines file instead of the Hub
    #[arg(long, value_name = "PATH")]
    dataset_file: Option<PathBuf>,

    // Number of requests to be generated (capped by the dataset size)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    num_requests: Option<u64>,

    // Requests with a longer tokenized input are skipped
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_input_len: Option<u64>,

    // <output_len_mean>,<output_len_stdev>, e.g. 100,10. Default: golden output length
    #[arg(long, value_parser = parse_output_len_dist)]
    output_len_dist: Option<LenDist>,
}

#[derive(Args, Debug)]
struct NormDistArgs {
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    num_requests: u64,
    #[arg(long)]
    input_mean: f64,
    #[arg(long)]
    input_stdev: f64,
    #[arg(long)]
    output_mean: f64,
    #[arg(long)]
    output_stdev: f64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging setup (stderr only, stdout may carry the workload)
    let log_path = init_logging(cli.log_level.into(), cli.log_dir.as_deref())?;
    if let Some(p) = &log_path {
        info!("Logging to {:?}", p);
    }

    let rand_task_id = rand_task_range(cli.rand_task_id.as_deref())?;
    let tokenizer = load_tokenizer(&cli.tokenizer, cli.hf_token.clone())?;

    let (requests, metadata) = match &cli.command {
        Command::Dataset(args) => run_dataset(&cli, args, rand_task_id, tokenizer.as_ref())?,
        Command::TokenNormDist(args) => run_token_norm_dist(&cli, args, rand_task_id, tokenizer.as_ref())?,
    };

    if cli.stdout {
        print_dataset(&mut io::stdout().lock(), &requests.input_ids, &requests.output_lens)?;
    } else {
        dataset_dump(&requests, &metadata, &cli.output)
            .with_context(|| format!("cannot write {}", cli.output.display()))?;
        info!("Wrote {} requests → {:?}", requests.len(), cli.output);
    }
    Ok(())
}

fn init_logging(level: LevelFilter, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    // keep HTTP / tokenizer crates quiet at debug level
    let config = ConfigBuilder::new().add_filter_allow_str("prepare_dataset").build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    let mut log_path = None;
    if let Some(dir) = log_dir {
        create_dir_all(dir)?;
        let ts = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("prepare_dataset_{ts}.log"));
        loggers.push(WriteLogger::new(level, config, File::create(&path)?));
        log_path = Some(path);
    }

    CombinedLogger::init(loggers)?;
    Ok(log_path)
}

fn rand_task_range(values: Option<&[i64]>) -> Result<Option<(i64, i64)>, PrepError> {
    match values {
        None => Ok(None),
        Some(&[min, max]) if min <= max => Ok(Some((min, max))),
        Some(v) => Err(PrepError::Usage(format!(
            "Incorrect specification for --rand-task-id {v:?}. Correct format: --rand-task-id <min> <max> with min <= max"
        ))),
    }
}

fn progress_bar(len: Option<u64>) -> ProgressBar {
    match len {
        Some(n) => {
            let bar = ProgressBar::new(n);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} requests")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    }
}

fn run_dataset(
    cli: &Cli,
    args: &DatasetArgs,
    rand_task_id: Option<(i64, i64)>,
    tokenizer: &dyn Tokenizer,
) -> Result<(GeneratedRequests, JsonMap<String, Value>)> {
    let config = DatasetConfigBuilder {
        name: args.dataset_name.clone(),
        config_name: args.dataset_config_name.clone(),
        split: Some(args.dataset_split.clone()),
        input_key: args.dataset_input_key.clone(),
        prompt_key: args.dataset_prompt_key.clone(),
        prompt: args.dataset_prompt.clone(),
        output_key: args.dataset_output_key.clone(),
    }
    .build()?;

    let opts = ExtractOptions {
        max_input_len: args.max_input_len.map(|n| n as usize),
        num_requests: args.num_requests.map(|n| n as usize),
        output_len_dist: args.output_len_dist,
        task_id: cli.task_id,
        rand_task_id,
        random_seed: cli.random_seed,
    };

    let records = source::open_source(&config, args.dataset_file.as_deref(), cli.hf_token.clone())?;
    let bar = progress_bar(args.num_requests);
    let requests = extract_requests(&config, records, tokenizer, &opts, &bar)?;
    bar.finish_and_clear();

    if requests.is_empty() {
        warn!("No request was accepted from dataset {}", config.name());
    }
    let metadata = requests.metadata("dataset", tokenizer.name());
    Ok((requests, metadata))
}

fn run_token_norm_dist(
    cli: &Cli,
    args: &NormDistArgs,
    rand_task_id: Option<(i64, i64)>,
    tokenizer: &dyn Tokenizer,
) -> Result<(GeneratedRequests, JsonMap<String, Value>)> {
    for (flag, v) in [
        ("--input-mean", args.input_mean),
        ("--input-stdev", args.input_stdev),
        ("--output-mean", args.output_mean),
        ("--output-stdev", args.output_stdev),
    ] {
        if !v.is_finite() || v < 0.0 {
            return Err(PrepError::Usage(format!("{flag} must be a non-negative number, got {v}")).into());
        }
    }

    let opts = NormDistOptions {
        num_requests: args.num_requests as usize,
        input_mean: args.input_mean,
        input_stdev: args.input_stdev,
        output_mean: args.output_mean,
        output_stdev: args.output_stdev,
        task_id: cli.task_id,
        rand_task_id,
        random_seed: cli.random_seed,
    };
    let requests = token_norm_dist(&opts, tokenizer.vocab_size())?;

    let mut metadata = requests.metadata("token-norm-dist", tokenizer.name());
    metadata.extend(opts.metadata_fields());
    metadata.insert("random_seed".into(), json!(cli.random_seed));
    Ok((requests, metadata))
}
