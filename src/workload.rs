use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value};

use crate::error::Result;

/// Four index-aligned sequences, one entry per accepted request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedRequests {
    pub input_lens: Vec<usize>,
    pub input_ids: Vec<Vec<u32>>,
    pub output_lens: Vec<u64>,
    pub task_ids: Vec<i64>,
}

impl GeneratedRequests {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn max_input_len(&self) -> usize {
        self.input_lens.iter().copied().max().unwrap_or(0)
    }

    pub fn max_output_len(&self) -> u64 {
        self.output_lens.iter().copied().max().unwrap_or(0)
    }

    /// Header shared by every workload type; callers add their own fields.
    pub fn metadata(&self, workload_type: &str, tokenizer: &str) -> JsonMap<String, Value> {
        let mut meta = JsonMap::new();
        meta.insert("workload_type".into(), json!(workload_type));
        meta.insert("tokenizer".into(), json!(tokenizer));
        meta.insert("num_requests".into(), json!(self.len()));
        meta.insert("max_input_len".into(), json!(self.max_input_len()));
        meta.insert("max_output_len".into(), json!(self.max_output_len()));
        meta
    }
}

#[derive(Debug, Serialize)]
struct Sample<'a> {
    input_len: usize,
    input_ids: &'a [u32],
    output_len: u64,
    task_id: i64,
}

#[derive(Debug, Serialize)]
struct Workload<'a> {
    metadata: &'a JsonMap<String, Value>,
    samples: Vec<Sample<'a>>,
}

/// Write the workload file: `{"metadata": {...}, "samples": [...]}`.
pub fn dataset_dump(requests: &GeneratedRequests, metadata: &JsonMap<String, Value>, path: &Path) -> Result<()> {
    let samples = requests
        .input_ids
        .iter()
        .enumerate()
        .map(|(i, ids)| Sample {
            input_len: requests.input_lens[i],
            input_ids: ids,
            output_len: requests.output_lens[i],
            task_id: requests.task_ids[i],
        })
        .collect();
    let workload = Workload { metadata, samples };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, &workload)?;
    writer.flush()?;
    Ok(())
}

/// One compact JSON line per request, in request order.
pub fn print_dataset<W: Write>(out: &mut W, input_ids: &[Vec<u32>], output_lens: &[u64]) -> Result<()> {
    for (i, (ids, olen)) in input_ids.iter().zip(output_lens).enumerate() {
        let line = json!({
            "task_id": i,
            "input_ids": ids,
            "output_tokens": olen,
        });
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }
    out.flush()?;
    Ok(())
}
