//! Record sources.
//!
//! Both sources are lazy: the Hub source fetches one page of rows from the
//! datasets-server API only when the buffered rows run out, the JSON Lines
//! source reads one line per record.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value};

use crate::config::DatasetConfig;
use crate::error::{PrepError, Result};

pub type RecordMap = JsonMap<String, Value>;
pub type RecordStream = Box<dyn Iterator<Item = Result<RecordMap>>>;

const DATASETS_SERVER: &str = "https://datasets-server.huggingface.co";
// datasets-server caps `length` at 100
const PAGE_LEN: u64 = 100;

const CONFIG_HINT: &str = "Please add the config name with --dataset-config-name.";
const SPLIT_HINT: &str = "Please specify a supported split with --dataset-split.";

/// Open the records named by `config`: a local JSON Lines file when given,
/// otherwise the dataset on the Hugging Face Hub.
pub fn open_source(config: &DatasetConfig, dataset_file: Option<&Path>, token: Option<String>) -> Result<RecordStream> {
    match dataset_file {
        Some(path) => {
            info!("Reading records of {} from {}", config.name(), path.display());
            Ok(Box::new(JsonlSource::open(path)?))
        }
        None => {
            info!("Streaming {:?} (split {:?}) from the Hub", config.query(), config.split());
            Ok(Box::new(HubRowsSource::open(config, token)?))
        }
    }
}

// JSON Lines

pub struct JsonlSource {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl JsonlSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

impl Iterator for JsonlSource {
    type Item = Result<RecordMap>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(obj)) => Ok(obj),
                Ok(_) => Err(PrepError::source_error(format!(
                    "line {} is not a JSON object",
                    self.line_no
                ))),
                Err(e) => Err(PrepError::source_error(format!("line {}: {e}", self.line_no))),
            });
        }
    }
}

// datasets-server

#[derive(Debug, Deserialize)]
struct SplitListing {
    splits: Vec<SplitEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SplitEntry {
    config: String,
    split: String,
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: RecordMap,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

/// Pick the `(config, split)` pairs to stream, the way `load_dataset` would
/// resolve a config name and split.
fn plan_splits(
    dataset: &str,
    listing: &[SplitEntry],
    config_name: Option<&str>,
    split: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let mut configs: Vec<&str> = Vec::new();
    for e in listing {
        if !configs.contains(&e.config.as_str()) {
            configs.push(&e.config);
        }
    }

    let config = match config_name {
        Some(c) if configs.contains(&c) => c,
        Some(c) => {
            return Err(PrepError::source_error_with_hint(
                format!("Config {c:?} not found for dataset {dataset}. Available configs: {configs:?}"),
                CONFIG_HINT,
            ))
        }
        None => match configs.as_slice() {
            [only] => *only,
            [] => return Err(PrepError::source_error(format!("Dataset {dataset} has no splits"))),
            _ => {
                return Err(PrepError::source_error_with_hint(
                    format!("Config name is missing for dataset {dataset}. Available configs: {configs:?}"),
                    CONFIG_HINT,
                ))
            }
        },
    };

    let splits: Vec<&str> = listing
        .iter()
        .filter(|e| e.config == config)
        .map(|e| e.split.as_str())
        .collect();

    match split {
        Some(s) if splits.contains(&s) => Ok(vec![(config.to_string(), s.to_string())]),
        Some(s) => Err(PrepError::source_error_with_hint(
            format!("Unknown split {s:?}. Should be one of {splits:?}"),
            SPLIT_HINT,
        )),
        None => Ok(splits
            .into_iter()
            .map(|s| (config.to_string(), s.to_string()))
            .collect()),
    }
}

/// Rows of a Hub dataset, pulled page by page from datasets-server.
pub struct HubRowsSource {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
    dataset: String,
    pending: VecDeque<(String, String)>,
    current: Option<(String, String)>,
    offset: u64,
    total: Option<u64>,
    buffer: VecDeque<RecordMap>,
    done: bool,
}

impl HubRowsSource {
    pub fn open(config: &DatasetConfig, token: Option<String>) -> Result<Self> {
        Self::open_at(DATASETS_SERVER, config, token)
    }

    /// Same as [`HubRowsSource::open`] against another datasets-server
    /// deployment (mirror, proxy).
    pub fn open_at(base_url: &str, config: &DatasetConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("prepare_dataset/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PrepError::source_error(format!("Failed to create HTTP client: {e}")))?;

        let mut source = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            dataset: config.name().to_string(),
            pending: VecDeque::new(),
            current: None,
            offset: 0,
            total: None,
            buffer: VecDeque::new(),
            done: false,
        };

        let listing: SplitListing = source.get_json("splits", &[("dataset", config.name().to_string())])?;
        let plan = plan_splits(config.name(), &listing.splits, config.config_name(), config.split())?;
        debug!("Streaming splits {plan:?}");
        source.pending = plan.into();
        Ok(source)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{endpoint}", self.base_url);
        let mut request = self.client.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| PrepError::source_error(format!("{endpoint} request for {} failed: {e}", self.dataset)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PrepError::source_error(format!("read {endpoint} response: {e}")))?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(PrepError::source_error(format!(
                "datasets-server returned {status} for {}: {detail}",
                self.dataset
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| PrepError::source_error(format!("parse {endpoint} response: {e}")))
    }

    // Refill the buffer. Ok(false) once every split is exhausted.
    fn fill(&mut self) -> Result<bool> {
        loop {
            let Some((config, split)) = self.current.clone() else {
                match self.pending.pop_front() {
                    Some(next) => {
                        info!("Reading split {}/{}", next.0, next.1);
                        self.current = Some(next);
                        self.offset = 0;
                        self.total = None;
                        continue;
                    }
                    None => return Ok(false),
                }
            };

            if matches!(self.total, Some(total) if self.offset >= total) {
                self.current = None;
                continue;
            }

            let page: RowsPage = self.get_json(
                "rows",
                &[
                    ("dataset", self.dataset.clone()),
                    ("config", config),
                    ("split", split),
                    ("offset", self.offset.to_string()),
                    ("length", PAGE_LEN.to_string()),
                ],
            )?;
            if page.rows.is_empty() {
                self.current = None;
                continue;
            }
            self.offset += page.rows.len() as u64;
            self.total = page.num_rows_total.or(self.total);
            self.buffer.extend(page.rows.into_iter().map(|r| r.row));
            return Ok(true);
        }
    }
}

impl Iterator for HubRowsSource {
    type Item = Result<RecordMap>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rec) = self.buffer.pop_front() {
            return Some(Ok(rec));
        }
        if self.done {
            return None;
        }
        match self.fill() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfigBuilder;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn listing() -> Vec<SplitEntry> {
        let body = r#"{"splits":[
            {"dataset":"cnn_dailymail","config":"1.0.0","split":"train"},
            {"dataset":"cnn_dailymail","config":"3.0.0","split":"train"},
            {"dataset":"cnn_dailymail","config":"3.0.0","split":"validation"},
            {"dataset":"cnn_dailymail","config":"3.0.0","split":"test"}
        ],"pending":[],"failed":[]}"#;
        serde_json::from_str::<SplitListing>(body).unwrap().splits
    }

    #[test]
    fn plan_with_config_and_split() {
        let plan = plan_splits("cnn_dailymail", &listing(), Some("3.0.0"), Some("test")).unwrap();
        assert_eq!(plan, vec![("3.0.0".to_string(), "test".to_string())]);
    }

    #[test]
    fn plan_without_split_streams_every_split() {
        let plan = plan_splits("cnn_dailymail", &listing(), Some("3.0.0"), None).unwrap();
        let splits: Vec<&str> = plan.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(splits, vec!["train", "validation", "test"]);
    }

    #[test]
    fn missing_config_name_gets_hint() {
        let err = plan_splits("cnn_dailymail", &listing(), None, Some("train")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Config name is missing"));
        assert!(msg.contains("--dataset-config-name"));
    }

    #[test]
    fn unknown_config_gets_hint() {
        let err = plan_splits("cnn_dailymail", &listing(), Some("9.9.9"), Some("train")).unwrap_err();
        assert!(matches!(err, PrepError::DatasetSource { hint: Some(_), .. }));
    }

    #[test]
    fn unknown_split_gets_hint() {
        let err = plan_splits("cnn_dailymail", &listing(), Some("1.0.0"), Some("test")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unknown split \"test\""));
        assert!(msg.contains("--dataset-split"));
    }

    #[test]
    fn single_config_is_implicit() {
        let only: Vec<SplitEntry> = listing().into_iter().filter(|e| e.config == "1.0.0").collect();
        let plan = plan_splits("cnn_dailymail", &only, None, Some("train")).unwrap();
        assert_eq!(plan, vec![("1.0.0".to_string(), "train".to_string())]);
    }

    #[test]
    fn rows_page_parses() {
        let body = r#"{"features":[],"rows":[
            {"row_idx":0,"row":{"article":"a","highlights":"x"},"truncated_cells":[]},
            {"row_idx":1,"row":{"article":"bb","highlights":"yy"},"truncated_cells":[]}
        ],"num_rows_total":2,"num_rows_per_page":100,"partial":false}"#;
        let page: RowsPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.num_rows_total, Some(2));
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[1].row["article"], "bb");
    }

    #[test]
    fn jsonl_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"in": "a", "out": "x"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"in": "bb", "out": "yy"}}"#).unwrap();

        let records: Vec<RecordMap> = JsonlSource::open(file.path())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["in"], "a");
        assert_eq!(records[1]["out"], "yy");
    }

    #[test]
    fn jsonl_rejects_non_objects() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[1, 2, 3]").unwrap();
        let mut src = JsonlSource::open(file.path()).unwrap();
        assert!(matches!(src.next(), Some(Err(PrepError::DatasetSource { .. }))));
    }

    #[test]
    fn jsonl_parse_error_names_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"in": "a"}}"#).unwrap();
        writeln!(file, "{{bad").unwrap();

        let mut src = JsonlSource::open(file.path()).unwrap();
        assert!(src.next().unwrap().is_ok());
        match src.next() {
            Some(Err(PrepError::DatasetSource { message, .. })) => assert!(message.starts_with("line 2:")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn jsonl_missing_file_is_io_error() {
        assert!(matches!(
            JsonlSource::open(Path::new("/nonexistent/records.jsonl")),
            Err(PrepError::Io(_))
        ));
    }

    type Requests = Arc<Mutex<Vec<(String, HashMap<String, String>)>>>;

    // Local datasets-server stand-in. One request per connection; every
    // request is recorded before it is answered.
    fn serve<F>(route: F) -> (String, Requests)
    where
        F: Fn(&str, &HashMap<String, String>) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Requests::default();
        let log = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = stream.unwrap();
                let mut reader = BufReader::new(&stream);
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header.trim().is_empty() {
                        break;
                    }
                }

                let target = request_line.split_whitespace().nth(1).unwrap_or("/");
                let (path, query) = target.split_once('?').unwrap_or((target, ""));
                let params: HashMap<String, String> = query
                    .split('&')
                    .filter_map(|kv| kv.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();

                let (code, body) = route(path, &params);
                log.lock().unwrap().push((path.to_string(), params));

                let reason = if code == 200 { "OK" } else { "Not Found" };
                let mut out = &stream;
                write!(
                    out,
                    "HTTP/1.1 {code} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
                out.flush().unwrap();
            }
        });
        (base, requests)
    }

    fn rows_body(values: &[&str], total: Option<u64>) -> String {
        let rows: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| json!({"row_idx": i, "row": {"in": v}, "truncated_cells": []}))
            .collect();
        let mut body = json!({"rows": rows});
        if let Some(total) = total {
            body["num_rows_total"] = json!(total);
        }
        body.to_string()
    }

    fn toy_config() -> DatasetConfig {
        DatasetConfigBuilder {
            name: "toy".into(),
            input_key: "in".into(),
            prompt: Some("P".into()),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[test]
    fn hub_rows_follow_pages_and_splits() {
        let (base, requests) = serve(|path, q| {
            let split = q.get("split").map(String::as_str);
            let offset = q.get("offset").map(String::as_str);
            match (path, split, offset) {
                ("/splits", _, _) => (
                    200,
                    r#"{"splits":[
                        {"dataset":"toy","config":"default","split":"train"},
                        {"dataset":"toy","config":"default","split":"test"}
                    ]}"#
                    .to_string(),
                ),
                ("/rows", Some("train"), Some("0")) => (200, rows_body(&["a", "b"], Some(3))),
                ("/rows", Some("train"), Some("2")) => (200, rows_body(&["c"], Some(3))),
                // no total reported: paging stops at the first empty page
                ("/rows", Some("test"), Some("0")) => (200, rows_body(&["d"], None)),
                ("/rows", Some("test"), Some("1")) => (200, rows_body(&[], None)),
                _ => (404, r#"{"error":"unexpected request"}"#.to_string()),
            }
        });

        let records: Vec<RecordMap> = HubRowsSource::open_at(&base, &toy_config(), None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let inputs: Vec<&str> = records.iter().map(|r| r["in"].as_str().unwrap()).collect();
        assert_eq!(inputs, vec!["a", "b", "c", "d"]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].0, "/splits");
        assert_eq!(requests[0].1["dataset"], "toy");
        let pages: Vec<String> = requests
            .iter()
            .filter(|(path, _)| path == "/rows")
            .map(|(_, q)| format!("{}@{}", q["split"], q["offset"]))
            .collect();
        // train@3 would be past num_rows_total
        assert_eq!(pages, vec!["train@0", "train@2", "test@0", "test@1"]);
    }

    #[test]
    fn hub_error_body_becomes_source_error() {
        let (base, _) = serve(|_, _| (404, r#"{"error":"The dataset does not exist."}"#.to_string()));
        match HubRowsSource::open_at(&base, &toy_config(), None) {
            Err(PrepError::DatasetSource { message, .. }) => {
                assert!(message.contains("404"));
                assert!(message.contains("The dataset does not exist."));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an error for a missing dataset"),
        }
    }
}
