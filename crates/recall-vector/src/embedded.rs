use crate::backend::{
    BackendStats, BackfillReport, DocType, FederationOps, MaintenanceOps, ObservationSync,
    PromptSync, QueryFilters, QueryHit, RemoteInfo, SharedStore, SummarySync, VectorBackend,
};
use crate::document::{DocumentSeed, observation_documents, prompt_documents, summary_documents};
use crate::embedding::Embedder;
use crate::encoding::{cosine_distance, decode_embedding, encode_embedding};
use crate::federation::{FederatedHit, FederationConfig, MAX_REMOTES, merge_federated};
use crate::{Error, Result};
use async_trait::async_trait;
use recall_types::util;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Once};
use tracing::{debug, warn};

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec as an auto extension so every subsequent connection
/// (including attached remotes) sees the vec0 module.
fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

// NOTE: ANN degradation contract
//
// The vec0 virtual table is an accelerator, not a source of truth. Every
// document row carries its embedding blob in vector_documents, so when the
// extension fails to load (or the virtual table was created by a newer
// module version) queries fall back to a full cosine scan over the filtered
// rows. Correctness is identical; only latency changes.

pub struct EmbeddedVecBackend {
    conn: Mutex<Connection>,
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
    ann_available: AtomicBool,
    remotes: Mutex<Vec<RemoteInfo>>,
    last_sync_epoch: AtomicI64,
}

impl EmbeddedVecBackend {
    pub fn new(path: &Path, embedder: Arc<dyn Embedder>, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::Config("embedding dimensions must be non-zero".to_string()));
        }
        register_vec_extension();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            embedder,
            dimensions,
            ann_available: AtomicBool::new(false),
            remotes: Mutex::new(Vec::new()),
            last_sync_epoch: AtomicI64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn upsert_documents(&self, seeds: Vec<DocumentSeed>) -> Result<()> {
        if seeds.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = seeds.iter().map(|s| s.content.clone()).collect();
        let batch = self.embedder.embed(&texts).await?;
        if batch.dimensions != self.dimensions {
            return Err(Error::Config(format!(
                "embedder produced {}-dim vectors, backend configured for {}",
                batch.dimensions, self.dimensions
            )));
        }

        let ann = self.ann_available.load(Ordering::Relaxed);
        let conn = self.conn.lock().unwrap();
        for (seed, vector) in seeds.iter().zip(&batch.vectors) {
            let blob = encode_embedding(vector);
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM vector_documents WHERE doc_id = ?1",
                    [&seed.doc_id],
                    |row| row.get(0),
                )
                .optional()?;

            let rowid = match existing {
                Some(rowid) => {
                    conn.execute(
                        r#"
                        UPDATE vector_documents SET
                            sqlite_id = ?2, doc_type = ?3, content = ?4,
                            memory_session_id = ?5, project = ?6,
                            created_at_epoch = ?7, metadata = ?8, embedding = ?9
                        WHERE rowid = ?1
                        "#,
                        params![
                            rowid,
                            seed.sqlite_id,
                            seed.doc_type.as_str(),
                            seed.content,
                            seed.memory_session_id,
                            seed.project,
                            seed.created_at_epoch,
                            seed.metadata.to_string(),
                            blob,
                        ],
                    )?;
                    if ann {
                        conn.execute("DELETE FROM vec_index WHERE rowid = ?1", [rowid])?;
                    }
                    rowid
                }
                None => {
                    conn.execute(
                        r#"
                        INSERT INTO vector_documents
                            (doc_id, sqlite_id, doc_type, content, memory_session_id,
                             project, created_at_epoch, metadata, embedding)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        "#,
                        params![
                            seed.doc_id,
                            seed.sqlite_id,
                            seed.doc_type.as_str(),
                            seed.content,
                            seed.memory_session_id,
                            seed.project,
                            seed.created_at_epoch,
                            seed.metadata.to_string(),
                            blob,
                        ],
                    )?;
                    conn.last_insert_rowid()
                }
            };

            if ann {
                conn.execute(
                    "INSERT INTO vec_index (rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, blob],
                )?;
            }
        }
        drop(conn);

        self.last_sync_epoch.store(util::now_epoch_ms(), Ordering::Relaxed);
        Ok(())
    }

    fn query_with_vector(
        &self,
        conn: &Connection,
        vector: &[f32],
        limit: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryHit>> {
        if self.ann_available.load(Ordering::Relaxed) {
            match ann_query(conn, vector, limit, filters) {
                Ok(hits) => return Ok(hits),
                Err(err) => {
                    warn!("ANN query failed, falling back to brute force: {}", err);
                }
            }
        }
        brute_force_query(conn, vector, limit, filters)
    }
}

#[async_trait]
impl VectorBackend for EmbeddedVecBackend {
    fn name(&self) -> &'static str {
        "sqlite-vec"
    }

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vector_documents (
                doc_id TEXT PRIMARY KEY,
                sqlite_id INTEGER NOT NULL,
                doc_type TEXT NOT NULL,
                content TEXT NOT NULL,
                memory_session_id TEXT,
                project TEXT,
                created_at_epoch INTEGER NOT NULL,
                metadata TEXT,
                embedding BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_docs_owner ON vector_documents(doc_type, sqlite_id);
            CREATE INDEX IF NOT EXISTS idx_docs_project ON vector_documents(project);
            "#,
        )?;

        let ann = conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_index USING vec0(embedding float[{}])",
            self.dimensions
        ));
        match ann {
            Ok(()) => {
                self.ann_available.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                self.ann_available.store(false, Ordering::Relaxed);
                warn!(
                    "vec0 virtual table unavailable ({}); queries will brute-force scan",
                    err
                );
            }
        }
        Ok(())
    }

    async fn sync_observation(&self, record: &ObservationSync) -> Result<()> {
        self.upsert_documents(observation_documents(record)).await
    }

    async fn sync_summary(&self, record: &SummarySync) -> Result<()> {
        self.upsert_documents(summary_documents(record)).await
    }

    async fn sync_user_prompt(&self, record: &PromptSync) -> Result<()> {
        self.upsert_documents(prompt_documents(record)).await
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryHit>> {
        let batch = self.embedder.embed(&[text.to_string()]).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding batch for query".to_string()))?;

        let conn = self.conn.lock().unwrap();
        self.query_with_vector(&conn, &vector, limit, filters)
    }

    async fn ensure_backfilled(&self, store: &SharedStore) -> Result<BackfillReport> {
        let existing: HashSet<(String, i64)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT DISTINCT doc_type, sqlite_id FROM vector_documents")?;
            let pairs = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            pairs
        };

        // Collect the missing rows under the store lock, sync after releasing
        // it: embedding calls must not serialize against the writer.
        let (observations, summaries, prompts) = {
            let store = store.lock().unwrap();
            let mut observations = Vec::new();
            for id in store.list_observation_ids()? {
                if !existing.contains(&(DocType::Observation.as_str().to_string(), id))
                    && let Some(row) = store.get_observation(id)?
                {
                    observations.push(ObservationSync::from(&row));
                }
            }
            let mut summaries = Vec::new();
            for id in store.list_summary_ids()? {
                if !existing.contains(&(DocType::SessionSummary.as_str().to_string(), id))
                    && let Some(row) = store.get_summary(id)?
                {
                    summaries.push(SummarySync::from(&row));
                }
            }
            let mut prompts = Vec::new();
            for id in store.list_prompt_ids()? {
                if !existing.contains(&(DocType::UserPrompt.as_str().to_string(), id))
                    && let Some(row) = store.get_user_prompt(id)?
                {
                    prompts.push(PromptSync::from(&row));
                }
            }
            (observations, summaries, prompts)
        };

        let mut report = BackfillReport {
            scanned: existing.len() + observations.len() + summaries.len() + prompts.len(),
            ..Default::default()
        };

        for record in &observations {
            match self.sync_observation(record).await {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for observation {}: {}", record.sqlite_id, err);
                }
            }
        }
        for record in &summaries {
            match self.sync_summary(record).await {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for summary {}: {}", record.sqlite_id, err);
                }
            }
        }
        for record in &prompts {
            match self.sync_user_prompt(record).await {
                Ok(()) => report.synced += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!("backfill failed for prompt {}: {}", record.sqlite_id, err);
                }
            }
        }

        debug!(
            "backfill: {} synced, {} failed, {} scanned",
            report.synced, report.failed, report.scanned
        );
        Ok(report)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let conn = self.conn.lock().unwrap();
        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM vector_documents", [], |row| row.get(0))?;
        let last_sync = self.last_sync_epoch.load(Ordering::Relaxed);

        Ok(BackendStats {
            backend: self.name().to_string(),
            document_count: document_count as u64,
            collection: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "vectors.db".to_string()),
            dimensions: Some(self.dimensions),
            last_sync_epoch: (last_sync > 0).then_some(last_sync),
        })
    }

    fn federation(&self) -> Option<&dyn FederationOps> {
        Some(self)
    }

    fn maintenance(&self) -> Option<&dyn MaintenanceOps> {
        Some(self)
    }
}

#[async_trait]
impl FederationOps for EmbeddedVecBackend {
    fn attach_remote(&self, path: &Path, position: usize) -> Result<()> {
        if position == 0 || position > MAX_REMOTES {
            return Err(Error::Config(format!(
                "remote position must be 1..={}, got {}",
                MAX_REMOTES, position
            )));
        }
        if !path.exists() {
            return Err(Error::Config(format!(
                "remote snapshot does not exist: {}",
                path.display()
            )));
        }

        // open once, read-only, to verify the snapshot shape
        let remote = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        remote
            .query_row("SELECT COUNT(*) FROM vector_documents", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|err| {
                Error::Config(format!(
                    "remote {} has no vector_documents table: {}",
                    path.display(),
                    err
                ))
            })?;

        let mut remotes = self.remotes.lock().unwrap();
        remotes.retain(|r| r.position != position);
        remotes.push(RemoteInfo {
            path: path.to_path_buf(),
            position,
        });
        remotes.sort_by_key(|r| r.position);
        Ok(())
    }

    fn attached_remotes(&self) -> Vec<RemoteInfo> {
        self.remotes.lock().unwrap().clone()
    }

    async fn query_federated(
        &self,
        text: &str,
        limit: usize,
        config: &FederationConfig,
    ) -> Result<Vec<FederatedHit>> {
        config.validate()?;

        let batch = self.embedder.embed(&[text.to_string()]).await?;
        let vector = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding batch for query".to_string()))?;

        let local = {
            let conn = self.conn.lock().unwrap();
            self.query_with_vector(&conn, &vector, limit, &QueryFilters::default())?
        };

        let remotes = self.attached_remotes();
        let per_remote_timeout = config.per_remote_timeout;
        let tasks: Vec<_> = remotes
            .into_iter()
            .map(|remote| {
                let vector = vector.clone();
                tokio::spawn(async move {
                    let scan = tokio::task::spawn_blocking(move || {
                        scan_snapshot(&remote.path, &vector, limit)
                            .map(|hits| (remote.position, hits))
                    });
                    match tokio::time::timeout(per_remote_timeout, scan).await {
                        Ok(Ok(Ok(result))) => Some(result),
                        Ok(Ok(Err(err))) => {
                            warn!("federated remote scan failed: {}", err);
                            None
                        }
                        Ok(Err(join_err)) => {
                            warn!("federated remote scan panicked: {}", join_err);
                            None
                        }
                        Err(_) => {
                            warn!("federated remote scan timed out");
                            None
                        }
                    }
                })
            })
            .collect();

        // Laggards past the overall budget are dropped, not awaited.
        let remote_hits =
            match tokio::time::timeout(config.overall_budget, futures::future::join_all(tasks))
                .await
            {
                Ok(results) => results
                    .into_iter()
                    .filter_map(|joined| joined.ok().flatten())
                    .collect(),
                Err(_) => {
                    warn!("federated query exceeded overall budget; returning local results only");
                    Vec::new()
                }
            };

        Ok(merge_federated(local, remote_hits, config.decay, limit))
    }
}

#[async_trait]
impl MaintenanceOps for EmbeddedVecBackend {
    async fn delete_documents(&self, doc_ids: &[String]) -> Result<usize> {
        let ann = self.ann_available.load(Ordering::Relaxed);
        let conn = self.conn.lock().unwrap();
        let mut removed = 0;
        for doc_id in doc_ids {
            let rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM vector_documents WHERE doc_id = ?1",
                    [doc_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(rowid) = rowid {
                if ann {
                    conn.execute("DELETE FROM vec_index WHERE rowid = ?1", [rowid])?;
                }
                conn.execute("DELETE FROM vector_documents WHERE rowid = ?1", [rowid])?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn filters_clause(filters: &QueryFilters) -> (String, Vec<rusqlite::types::Value>) {
    let mut clauses = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(project) = &filters.project {
        clauses.push(format!("d.project = ?{}", params.len() + 1));
        params.push(project.clone().into());
    }
    if let Some(doc_type) = &filters.doc_type {
        clauses.push(format!("d.doc_type = ?{}", params.len() + 1));
        params.push(doc_type.as_str().to_string().into());
    }
    if let Some(memory_session_id) = &filters.memory_session_id {
        clauses.push(format!("d.memory_session_id = ?{}", params.len() + 1));
        params.push(memory_session_id.clone().into());
    }
    if let Some(min_epoch) = filters.min_epoch {
        clauses.push(format!("d.created_at_epoch >= ?{}", params.len() + 1));
        params.push(min_epoch.into());
    }
    if let Some(max_epoch) = filters.max_epoch {
        clauses.push(format!("d.created_at_epoch <= ?{}", params.len() + 1));
        params.push(max_epoch.into());
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn hit_from_parts(
    doc_id: String,
    sqlite_id: i64,
    doc_type: &str,
    content: String,
    metadata_raw: Option<String>,
    memory_session_id: Option<String>,
    project: Option<String>,
    created_at_epoch: i64,
    distance: f64,
) -> QueryHit {
    let mut metadata = metadata_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .unwrap_or(Value::Null);
    if let Value::Object(map) = &mut metadata {
        if let Some(project) = &project {
            map.insert("project".to_string(), Value::String(project.clone()));
        }
        if let Some(memory_session_id) = &memory_session_id {
            map.insert(
                "memory_session_id".to_string(),
                Value::String(memory_session_id.clone()),
            );
        }
        map.insert("created_at_epoch".to_string(), created_at_epoch.into());
    }

    QueryHit {
        doc_id,
        sqlite_id,
        doc_type: DocType::parse(doc_type).unwrap_or(DocType::Observation),
        distance,
        metadata,
        content: Some(content),
    }
}

/// Keep the best-scoring document per owning row, ranked by distance.
fn dedup_by_owner(hits: Vec<QueryHit>, limit: usize) -> Vec<QueryHit> {
    let mut best: HashMap<(DocType, i64), QueryHit> = HashMap::new();
    for hit in hits {
        let key = (hit.doc_type, hit.sqlite_id);
        match best.get(&key) {
            Some(existing) if existing.distance <= hit.distance => {}
            _ => {
                best.insert(key, hit);
            }
        }
    }
    let mut ranked: Vec<QueryHit> = best.into_values().collect();
    ranked.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}

fn ann_query(
    conn: &Connection,
    vector: &[f32],
    limit: usize,
    filters: &QueryFilters,
) -> Result<Vec<QueryHit>> {
    // Over-fetch before filtering and owner dedup so a post-filter pass can
    // still fill the requested limit.
    let candidates = (limit * 8).clamp(limit.max(1), 512) as i64;
    let blob = encode_embedding(vector);

    let mut stmt = conn.prepare(
        r#"
        SELECT d.doc_id, d.sqlite_id, d.doc_type, d.content, d.metadata,
               d.memory_session_id, d.project, d.created_at_epoch, v.distance
        FROM (
            SELECT rowid, distance FROM vec_index
            WHERE embedding MATCH ?1 AND k = ?2
            ORDER BY distance
        ) v
        JOIN vector_documents d ON d.rowid = v.rowid
        ORDER BY v.distance
        "#,
    )?;

    let rows = stmt.query_map(params![blob, candidates], |row| {
        Ok(hit_from_parts(
            row.get(0)?,
            row.get(1)?,
            &row.get::<_, String>(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let hit = row?;
        if matches_filters(&hit, filters) {
            hits.push(hit);
        }
    }
    Ok(dedup_by_owner(hits, limit))
}

fn matches_filters(hit: &QueryHit, filters: &QueryFilters) -> bool {
    if let Some(doc_type) = &filters.doc_type
        && hit.doc_type != *doc_type
    {
        return false;
    }
    let metadata = &hit.metadata;
    if let Some(project) = &filters.project
        && metadata.get("project").and_then(Value::as_str) != Some(project.as_str())
    {
        return false;
    }
    if let Some(memory_session_id) = &filters.memory_session_id
        && metadata.get("memory_session_id").and_then(Value::as_str)
            != Some(memory_session_id.as_str())
    {
        return false;
    }
    let epoch = metadata.get("created_at_epoch").and_then(Value::as_i64);
    if let Some(min_epoch) = filters.min_epoch
        && epoch.is_none_or(|e| e < min_epoch)
    {
        return false;
    }
    if let Some(max_epoch) = filters.max_epoch
        && epoch.is_none_or(|e| e > max_epoch)
    {
        return false;
    }
    true
}

fn brute_force_query(
    conn: &Connection,
    vector: &[f32],
    limit: usize,
    filters: &QueryFilters,
) -> Result<Vec<QueryHit>> {
    let (clause, params) = filters_clause(filters);
    let sql = format!(
        "SELECT d.doc_id, d.sqlite_id, d.doc_type, d.content, d.metadata, \
                d.memory_session_id, d.project, d.created_at_epoch, d.embedding \
         FROM vector_documents d{}",
        clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, i64>(7)?,
            row.get::<_, Option<Vec<u8>>>(8)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (doc_id, sqlite_id, doc_type, content, metadata, memory_session_id, project, epoch, blob) =
            row?;
        let Some(blob) = blob else { continue };
        let embedding = decode_embedding(&blob)?;
        let distance = cosine_distance(vector, &embedding);
        hits.push(hit_from_parts(
            doc_id,
            sqlite_id,
            &doc_type,
            content,
            metadata,
            memory_session_id,
            project,
            epoch,
            distance,
        ));
    }
    Ok(dedup_by_owner(hits, limit))
}

/// Brute-force scan of a replicated snapshot, opened read-only.
fn scan_snapshot(path: &Path, vector: &[f32], limit: usize) -> Result<Vec<QueryHit>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    brute_force_query(&conn, vector, limit, &QueryFilters::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use recall_types::{ParsedObservation, ParsedSummary};
    use tempfile::TempDir;

    const DIMS: usize = 32;

    fn backend(dir: &TempDir, name: &str) -> EmbeddedVecBackend {
        EmbeddedVecBackend::new(
            &dir.path().join(name),
            Arc::new(HashEmbedder::new(DIMS)),
            DIMS,
        )
        .unwrap()
    }

    fn observation(id: i64, narrative: &str, facts: &[&str], project: &str) -> ObservationSync {
        ObservationSync {
            sqlite_id: id,
            memory_session_id: "mem-1".to_string(),
            project: project.to_string(),
            observation: ParsedObservation {
                title: format!("obs {id}"),
                narrative: Some(narrative.to_string()),
                facts: facts.iter().map(|f| f.to_string()).collect(),
                ..Default::default()
            },
            prompt_number: 1,
            created_at_epoch: 1_000 + id,
        }
    }

    #[tokio::test]
    async fn test_sync_and_query_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        backend
            .sync_observation(&observation(1, "reaper prunes dead pids", &[], "recall"))
            .await
            .unwrap();
        backend
            .sync_observation(&observation(2, "cooking pasta with tomatoes", &[], "recall"))
            .await
            .unwrap();

        let hits = backend
            .query("dead pid pruning", 5, &QueryFilters::default())
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].sqlite_id, 1);
        assert_eq!(hits[0].doc_id, "obs_1_narrative");
    }

    #[tokio::test]
    async fn test_query_dedups_by_owning_row() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        backend
            .sync_observation(&observation(
                1,
                "sqlite writer discipline",
                &["sqlite writer is single", "sqlite WAL mode"],
                "recall",
            ))
            .await
            .unwrap();

        let hits = backend
            .query("sqlite writer", 10, &QueryFilters::default())
            .await
            .unwrap();
        // three documents exist for the row, one hit survives
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sqlite_id, 1);
    }

    #[tokio::test]
    async fn test_filters_are_conjunctive() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        backend
            .sync_observation(&observation(1, "alpha work", &[], "alpha"))
            .await
            .unwrap();
        backend
            .sync_observation(&observation(2, "alpha work elsewhere", &[], "beta"))
            .await
            .unwrap();

        let filters = QueryFilters {
            project: Some("alpha".to_string()),
            ..Default::default()
        };
        let hits = backend.query("alpha work", 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sqlite_id, 1);

        let filters = QueryFilters {
            project: Some("alpha".to_string()),
            min_epoch: Some(999_999),
            ..Default::default()
        };
        let hits = backend.query("alpha work", 10, &filters).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_resync_is_upsert() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        let record = observation(1, "first narrative", &[], "recall");
        backend.sync_observation(&record).await.unwrap();
        backend.sync_observation(&record).await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.dimensions, Some(DIMS));
    }

    #[tokio::test]
    async fn test_backfill_syncs_missing_rows() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        let store: SharedStore =
            Arc::new(Mutex::new(recall_store::Database::open_in_memory().unwrap()));
        {
            let db = store.lock().unwrap();
            for i in 0..3 {
                db.store_observation(&recall_store::NewObservation {
                    session_id: None,
                    content_session_id: None,
                    memory_session_id: "mem-1".to_string(),
                    project: "recall".to_string(),
                    observation: ParsedObservation {
                        title: format!("title {i}"),
                        narrative: Some(format!("narrative {i}")),
                        ..Default::default()
                    },
                    prompt_number: 0,
                    created_at_epoch: i,
                })
                .unwrap();
            }
            db.store_summary(
                None,
                "mem-1",
                "recall",
                &ParsedSummary {
                    completed: Some("done".to_string()),
                    ..Default::default()
                },
                9,
            )
            .unwrap();
        }

        let report = backend.ensure_backfilled(&store).await.unwrap();
        assert_eq!(report.synced, 4);
        assert_eq!(report.failed, 0);

        // second pass is a no-op
        let report = backend.ensure_backfilled(&store).await.unwrap();
        assert_eq!(report.synced, 0);
    }

    #[tokio::test]
    async fn test_delete_documents() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        backend
            .sync_observation(&observation(1, "to be deleted", &["keep me"], "recall"))
            .await
            .unwrap();

        let maintenance = backend.maintenance().unwrap();
        let removed = maintenance
            .delete_documents(&["obs_1_narrative".to_string(), "obs_1_missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
    }

    #[tokio::test]
    async fn test_federated_query_merges_remote_snapshot() {
        let dir = TempDir::new().unwrap();

        // build a "remote" snapshot file
        let remote = backend(&dir, "remote.db");
        remote.initialize().await.unwrap();
        remote
            .sync_observation(&observation(10, "remote only finding", &[], "recall"))
            .await
            .unwrap();
        let remote_path = remote.path().to_path_buf();
        drop(remote);

        let local = backend(&dir, "vectors.db");
        local.initialize().await.unwrap();
        local
            .sync_observation(&observation(1, "local finding", &[], "recall"))
            .await
            .unwrap();

        let federation = local.federation().unwrap();
        federation.attach_remote(&remote_path, 1).unwrap();
        assert_eq!(federation.attached_remotes().len(), 1);

        let hits = federation
            .query_federated("finding", 10, &FederationConfig::default())
            .await
            .unwrap();

        assert!(hits.iter().any(|h| h.sources == vec!["local".to_string()]));
        assert!(hits.iter().any(|h| h.sources == vec!["remote1".to_string()]));
        // a local hit at equal distance outranks a weighted remote hit
        let local_hit = hits.iter().find(|h| h.sources[0] == "local").unwrap();
        let remote_hit = hits.iter().find(|h| h.sources[0] == "remote1").unwrap();
        assert!(local_hit.combined_score > remote_hit.combined_score * 0.9);
    }

    #[tokio::test]
    async fn test_attach_remote_rejects_bad_positions() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "vectors.db");
        backend.initialize().await.unwrap();

        let federation = backend.federation().unwrap();
        assert!(federation.attach_remote(Path::new("/nonexistent"), 1).is_err());
        assert!(
            federation
                .attach_remote(&dir.path().join("vectors.db"), 0)
                .is_err()
        );
        assert!(
            federation
                .attach_remote(&dir.path().join("vectors.db"), 4)
                .is_err()
        );
    }
}
