use serde_json::{Map as JsonMap, Value};

use crate::error::{PrepError, Result};

/// Read-only view of one dataset row. The schema is only known at run time,
/// so lookups go by field name.
pub trait Record {
    fn contains(&self, key: &str) -> bool;

    /// Field value rendered as text. `None` when the key is absent.
    fn get(&self, key: &str) -> Option<String>;

    fn keys(&self) -> Vec<String>;
}

impl Record for JsonMap<String, Value> {
    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<String> {
        JsonMap::get(self, key).map(value_text)
    }

    fn keys(&self) -> Vec<String> {
        JsonMap::keys(self).cloned().collect()
    }
}

// strings verbatim, null as empty, anything else as compact JSON
fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rules mapping dataset fields to prompt / input / golden output.
/// Validated once in [`DatasetConfig::new`], immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConfig {
    name: String,
    config_name: Option<String>,
    split: Option<String>,
    input_key: String,
    prompt: PromptSource,
    output_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PromptSource {
    // per-record field
    Key(String),
    // same literal for every record
    Static(String),
}

/// Unvalidated fields, as they come off the command line.
#[derive(Debug, Clone, Default)]
pub struct DatasetConfigBuilder {
    pub name: String,
    pub config_name: Option<String>,
    pub split: Option<String>,
    pub input_key: String,
    pub prompt_key: Option<String>,
    pub prompt: Option<String>,
    pub output_key: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

impl DatasetConfigBuilder {
    pub fn build(self) -> Result<DatasetConfig> {
        DatasetConfig::new(self)
    }
}

impl DatasetConfig {
    pub fn new(raw: DatasetConfigBuilder) -> Result<Self> {
        if raw.name.is_empty() {
            return Err(PrepError::Configuration("--dataset-name must be set.".into()));
        }
        if raw.input_key.is_empty() {
            return Err(PrepError::Configuration("--dataset-input-key must be set.".into()));
        }

        let prompt = match (non_empty(raw.prompt_key), non_empty(raw.prompt)) {
            (Some(_), Some(_)) => {
                return Err(PrepError::Configuration(
                    "--dataset-prompt-key and --dataset-prompt cannot be set at the same time.".into(),
                ))
            }
            (None, None) => {
                return Err(PrepError::Configuration(
                    "Either --dataset-prompt-key or --dataset-prompt must be set.".into(),
                ))
            }
            (Some(key), None) => PromptSource::Key(key),
            (None, Some(text)) => PromptSource::Static(text),
        };

        Ok(Self {
            name: raw.name,
            config_name: non_empty(raw.config_name),
            split: non_empty(raw.split),
            input_key: raw.input_key,
            prompt,
            output_key: non_empty(raw.output_key),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_name(&self) -> Option<&str> {
        self.config_name.as_deref()
    }

    pub fn split(&self) -> Option<&str> {
        self.split.as_deref()
    }

    /// Address of the dataset: `[name]` or `[name, config_name]`.
    pub fn query(&self) -> Vec<&str> {
        let mut q = vec![self.name.as_str()];
        if let Some(cfg) = &self.config_name {
            q.push(cfg);
        }
        q
    }

    pub fn resolve_prompt<R: Record + ?Sized>(&self, record: &R) -> Result<String> {
        match &self.prompt {
            PromptSource::Key(key) => self.lookup(record, key, "--dataset-prompt-key"),
            PromptSource::Static(text) => Ok(text.clone()),
        }
    }

    pub fn resolve_input<R: Record + ?Sized>(&self, record: &R) -> Result<String> {
        self.lookup(record, &self.input_key, "--dataset-input-key")
    }

    /// Golden output text. Asking for it without an output key is a usage
    /// mistake rather than a bad record, hence a configuration error.
    pub fn resolve_output<R: Record + ?Sized>(&self, record: &R) -> Result<String> {
        let key = self.output_key.as_deref().ok_or_else(|| {
            PrepError::Configuration(format!(
                "--dataset-output-key is not set. Please either:\n\
                 1. Define output length through --output-len-dist.\n\
                 2. If the dataset {} has key for golden output and you wish to set \
                 output length to the length of the golden output, set --dataset-output-key.",
                self.name
            ))
        })?;
        self.lookup(record, key, "--dataset-output-key")
    }

    fn lookup<R: Record + ?Sized>(&self, record: &R, key: &str, flag: &'static str) -> Result<String> {
        if !record.contains(key) {
            return Err(PrepError::MissingField {
                dataset: self.name.clone(),
                key: key.to_string(),
                flag,
                available: record.keys(),
            });
        }
        Ok(record.get(key).unwrap_or_default())
    }
}
