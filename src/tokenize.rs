//! Tokenizer backends.
//!
//! `--tokenizer` accepts a tiktoken encoding name, a local `tokenizer.json`
//! (or a directory holding one), or a Hugging Face model repo id whose
//! `tokenizer.json` is pulled through the Hub cache.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use log::{debug, info};
use tiktoken_rs::CoreBPE;

use crate::error::{PrepError, Result};

pub trait Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Recorded in the workload metadata.
    fn name(&self) -> &str;

    /// Number of ids the tokenizer can produce; used for synthetic prompts.
    fn vocab_size(&self) -> usize;
}

// Encodings bundled with tiktoken-rs and their regular-token counts
const TIKTOKEN_ENCODINGS: &[(&str, usize)] = &[
    ("cl100k_base", 100_256),
    ("o200k_base", 199_998),
    ("p50k_base", 50_281),
    ("p50k_edit", 50_281),
    ("r50k_base", 50_257),
];

pub struct TiktokenTokenizer {
    name: String,
    bpe: CoreBPE,
    vocab_size: usize,
}

impl TiktokenTokenizer {
    pub fn from_encoding(encoding: &str) -> Result<Self> {
        let vocab_size = TIKTOKEN_ENCODINGS
            .iter()
            .find(|(n, _)| *n == encoding)
            .map(|(_, v)| *v)
            .ok_or_else(|| PrepError::Tokenizer(format!("unknown tiktoken encoding {encoding}")))?;
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            _ => tiktoken_rs::r50k_base(),
        }
        .map_err(|e| PrepError::Tokenizer(format!("load {encoding}: {e}")))?;
        Ok(Self {
            name: encoding.to_string(),
            bpe,
            vocab_size,
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self
            .bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|t| t as u32)
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// A Hugging Face `tokenizers` JSON tokenizer. Special tokens are added on
/// encode, the same ids a served model would see.
pub struct HfTokenizer {
    name: String,
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path, name: impl Into<String>) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| PrepError::Tokenizer(format!("load {}: {e}", path.display())))?;
        Ok(Self {
            name: name.into(),
            inner,
        })
    }

    /// Fetch `tokenizer.json` of a model repo (reusing the local Hub cache).
    pub fn from_hub(repo_id: &str, token: Option<String>) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_token(token)
            .with_progress(false)
            .build()
            .map_err(|e| PrepError::Tokenizer(format!("Hub client: {e}")))?;
        let path = api
            .model(repo_id.to_string())
            .get("tokenizer.json")
            .map_err(|e| PrepError::Tokenizer(format!("fetch tokenizer.json of {repo_id}: {e}")))?;
        debug!("tokenizer.json of {repo_id} cached at {}", path.display());
        Self::from_file(&path, repo_id)
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .inner
            .encode(text, true)
            .map_err(|e| PrepError::Tokenizer(format!("encode: {e}")))?;
        Ok(enc.get_ids().to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Resolve `--tokenizer` to a backend.
pub fn load_tokenizer(spec: &str, hf_token: Option<String>) -> Result<Box<dyn Tokenizer>> {
    if TIKTOKEN_ENCODINGS.iter().any(|(n, _)| *n == spec) {
        info!("Using tiktoken encoding {spec}");
        return Ok(Box::new(TiktokenTokenizer::from_encoding(spec)?));
    }

    let local = PathBuf::from(spec);
    if local.is_dir() {
        let file = local.join("tokenizer.json");
        info!("Loading tokenizer from {}", file.display());
        return Ok(Box::new(HfTokenizer::from_file(&file, spec)?));
    }
    if local.is_file() {
        info!("Loading tokenizer from {}", local.display());
        return Ok(Box::new(HfTokenizer::from_file(&local, spec)?));
    }

    info!("Fetching tokenizer of {spec} from the Hub");
    Ok(Box::new(HfTokenizer::from_hub(spec, hf_token)?))
}
