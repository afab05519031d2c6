use crate::backend::{
    BackendStats, BackfillReport, DocType, ObservationSync, PromptSync, QueryFilters, QueryHit,
    SharedStore, SummarySync, VectorBackend,
};
use crate::document::{DocumentSeed, observation_documents, prompt_documents, summary_documents};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use tracing::{info, warn};

// Client side of the collection service protocol: JSON-RPC 2.0, one request
// per line on the child's stdin, one response per line on its stdout. The
// service owns its own embedding model; this backend only ships text and
// filters across the pipe.

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

struct ServiceClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl ServiceClient {
    fn spawn(command: &str, args: &[String], data_dir: &Path) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .env("COLLECTION_DATA_DIR", data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::Service(format!("failed to spawn '{}': {}", command, err)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Service("service stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| Error::Service("service stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            next_id: 1,
        })
    }

    fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let line = serde_json::to_string(&request)
            .map_err(|err| Error::Service(format!("request encode failed: {}", err)))?;
        writeln!(self.stdin, "{}", line)?;
        self.stdin.flush()?;

        // responses arrive in order; skip notifications and stale ids
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line)?;
            if read == 0 {
                return Err(Error::Service("service closed its stdout".to_string()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response: RpcResponse = match serde_json::from_str(trimmed) {
                Ok(response) => response,
                Err(_) => continue,
            };
            if response.id != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(Error::Service(format!(
                    "service error {}: {}",
                    error.code, error.message
                )));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Backend delegating to an external collection service over stdio.
///
/// Spawning the service opens a visible console window per process on
/// Windows, so the backend constructs disabled there and every operation is
/// a successful no-op.
pub struct CollectionServiceBackend {
    service: Option<Mutex<ServiceClient>>,
    collection: String,
}

impl CollectionServiceBackend {
    pub fn new(command: &str, args: &[String], data_dir: &Path, collection: &str) -> Result<Self> {
        if cfg!(target_os = "windows") {
            warn!("collection service backend disabled on windows; vector sync is a no-op");
            return Ok(Self {
                service: None,
                collection: collection.to_string(),
            });
        }

        std::fs::create_dir_all(data_dir)?;
        let client = ServiceClient::spawn(command, args, data_dir)?;
        info!("collection service started: {}", command);
        Ok(Self {
            service: Some(Mutex::new(client)),
            collection: collection.to_string(),
        })
    }

    pub fn is_disabled(&self) -> bool {
        self.service.is_none()
    }

    fn call(&self, method: &str, params: Value) -> Result<Option<Value>> {
        match &self.service {
            None => Ok(None),
            Some(service) => {
                let mut client = service.lock().unwrap();
                client.call(method, params).map(Some)
            }
        }
    }

    fn upsert(&self, seeds: Vec<DocumentSeed>) -> Result<()> {
        if seeds.is_empty() {
            return Ok(());
        }
        let documents: Vec<Value> = seeds
            .iter()
            .map(|seed| {
                json!({
                    "id": seed.doc_id,
                    "content": seed.content,
                    "metadata": {
                        "sqlite_id": seed.sqlite_id,
                        "doc_type": seed.doc_type.as_str(),
                        "memory_session_id": seed.memory_session_id,
                        "project": seed.project,
                        "created_at_epoch": seed.created_at_epoch,
                        "extra": seed.metadata,
                    },
                })
            })
            .collect();

        self.call(
            "documents/upsert",
            json!({ "collection": self.collection, "documents": documents }),
        )?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for CollectionServiceBackend {
    fn name(&self) -> &'static str {
        "chroma"
    }

    async fn initialize(&self) -> Result<()> {
        self.call("initialize", json!({}))?;
        self.call(
            "collections/ensure",
            json!({ "collection": self.collection }),
        )?;
        Ok(())
    }

    async fn sync_observation(&self, record: &ObservationSync) -> Result<()> {
        self.upsert(observation_documents(record))
    }

    async fn sync_summary(&self, record: &SummarySync) -> Result<()> {
        self.upsert(summary_documents(record))
    }

    async fn sync_user_prompt(&self, record: &PromptSync) -> Result<()> {
        self.upsert(prompt_documents(record))
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryHit>> {
        let Some(result) = self.call(
            "documents/query",
            json!({
                "collection": self.collection,
                "text": text,
                "limit": limit,
                "filters": filters,
            }),
        )?
        else {
            return Ok(Vec::new());
        };

        let hits = result
            .get("hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut parsed = Vec::new();
        for hit in hits {
            let metadata = hit.get("metadata").cloned().unwrap_or(Value::Null);
            let doc_type = metadata
                .get("doc_type")
                .and_then(Value::as_str)
                .and_then(DocType::parse)
                .unwrap_or(DocType::Observation);
            parsed.push(QueryHit {
                doc_id: hit
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                sqlite_id: metadata.get("sqlite_id").and_then(Value::as_i64).unwrap_or(0),
                doc_type,
                distance: hit.get("distance").and_then(Value::as_f64).unwrap_or(2.0),
                metadata,
                content: hit
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        // best document per owning row wins
        let mut best: std::collections::HashMap<(DocType, i64), QueryHit> =
            std::collections::HashMap::new();
        for hit in parsed {
            let key = (hit.doc_type, hit.sqlite_id);
            match best.get(&key) {
                Some(existing) if existing.distance <= hit.distance => {}
                _ => {
                    best.insert(key, hit);
                }
            }
        }
        let mut ranked: Vec<QueryHit> = best.into_values().collect();
        ranked.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn ensure_backfilled(&self, store: &SharedStore) -> Result<BackfillReport> {
        if self.is_disabled() {
            return Ok(BackfillReport::default());
        }

        let (observations, summaries, prompts) = {
            let store = store.lock().unwrap();
            let observations: Vec<ObservationSync> = store
                .list_observation_ids()?
                .into_iter()
                .filter_map(|id| store.get_observation(id).ok().flatten())
                .map(|row| ObservationSync::from(&row))
                .collect();
            let summaries: Vec<SummarySync> = store
                .list_summary_ids()?
                .into_iter()
                .filter_map(|id| store.get_summary(id).ok().flatten())
                .map(|row| SummarySync::from(&row))
                .collect();
            let prompts: Vec<PromptSync> = store
                .list_prompt_ids()?
                .into_iter()
                .filter_map(|id| store.get_user_prompt(id).ok().flatten())
                .map(|row| PromptSync::from(&row))
                .collect();
            (observations, summaries, prompts)
        };

        let mut report = BackfillReport {
            scanned: observations.len() + summaries.len() + prompts.len(),
            ..Default::default()
        };

        // ask the service which expected ids it is missing, then sync those
        let expected_first_ids: Vec<Value> = observations
            .iter()
            .flat_map(|record| observation_documents(record))
            .chain(summaries.iter().flat_map(|record| summary_documents(record)))
            .chain(prompts.iter().flat_map(|record| prompt_documents(record)))
            .map(|seed| Value::String(seed.doc_id))
            .collect();

        let missing: std::collections::HashSet<String> = match self.call(
            "documents/missing",
            json!({ "collection": self.collection, "ids": expected_first_ids }),
        )? {
            None => return Ok(report),
            Some(result) => result
                .get("missing")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        for record in &observations {
            let seeds: Vec<DocumentSeed> = observation_documents(record)
                .into_iter()
                .filter(|seed| missing.contains(&seed.doc_id))
                .collect();
            if seeds.is_empty() {
                continue;
            }
            match self.upsert(seeds) {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for observation {}: {}", record.sqlite_id, err);
                }
            }
        }
        for record in &summaries {
            let seeds: Vec<DocumentSeed> = summary_documents(record)
                .into_iter()
                .filter(|seed| missing.contains(&seed.doc_id))
                .collect();
            if seeds.is_empty() {
                continue;
            }
            match self.upsert(seeds) {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for summary {}: {}", record.sqlite_id, err);
                }
            }
        }
        for record in &prompts {
            let seeds: Vec<DocumentSeed> = prompt_documents(record)
                .into_iter()
                .filter(|seed| missing.contains(&seed.doc_id))
                .collect();
            if seeds.is_empty() {
                continue;
            }
            match self.upsert(seeds) {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for prompt {}: {}", record.sqlite_id, err);
                }
            }
        }

        Ok(report)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let result = self.call("collections/stats", json!({ "collection": self.collection }))?;
        let (count, dimensions) = match &result {
            Some(value) => (
                value.get("count").and_then(Value::as_u64).unwrap_or(0),
                value
                    .get("dimensions")
                    .and_then(Value::as_u64)
                    .map(|d| d as usize),
            ),
            None => (0, None),
        };

        Ok(BackendStats {
            backend: if self.is_disabled() {
                "chroma (disabled)".to_string()
            } else {
                self.name().to_string()
            },
            document_count: count,
            collection: self.collection.clone(),
            dimensions,
            last_sync_epoch: None,
        })
    }
}
