//! Build benchmark workload files (tokenized prompts + target output
//! lengths + task ids) from Hugging Face datasets or from synthetic
//! length distributions.

pub mod config;
pub mod error;
pub mod extract;
pub mod lengths;
pub mod source;
pub mod synthetic;
pub mod tokenize;
pub mod workload;

pub use config::{DatasetConfig, DatasetConfigBuilder, Record};
pub use error::{PrepError, Result};
pub use extract::{extract_requests, ExtractOptions};
pub use lengths::{norm_dist_lengths, parse_output_len_dist, LenDist};
pub use tokenize::{load_tokenizer, Tokenizer};
pub use workload::{dataset_dump, print_dataset, GeneratedRequests};
