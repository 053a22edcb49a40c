//! SQLite store adapter.
//!
//! Persists the full schema in a single database file, WAL mode. One
//! pooled write connection is guarded by a mutex; every call holds the
//! lock for one short statement or transaction. ANN queries decode the
//! BLOB-encoded vectors and score cosine similarity over the candidate
//! rows, returning the top-k above the floor.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AtlasError, AtlasResult};
use crate::store::{SearchFilter, Store, StoreCounts};
use crate::types::{
    ApiEndpoint, ChunkHit, ChunkKind, CodeChunk, CodeFile, CodeSymbol, CrossRepoDependency,
    ExportRecord, FileHit, ImportRecord, Language, ProjectRefs, RepoType, Repository, Service,
    SymbolScope, Workspace, WorkspaceAlias,
};

/// SQLite-backed [`Store`] implementation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `db_path`.
    pub fn open(db_path: &Path) -> AtlasResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path).map_err(|e| AtlasError::StoreUnavailable {
            reason: format!("{}: {e}", db_path.display()),
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> AtlasResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn now_millis() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(i64::MAX)
}

fn encode_vec(vector: &[f32]) -> AtlasResult<Option<Vec<u8>>> {
    if vector.is_empty() {
        return Ok(None);
    }
    bincode::serialize(vector)
        .map(Some)
        .map_err(|e| AtlasError::Internal(format!("vector encode: {e}")))
}

fn decode_vec(blob: Option<Vec<u8>>) -> Vec<f32> {
    match blob {
        Some(bytes) => bincode::deserialize(&bytes).unwrap_or_default(),
        None => Vec::new(),
    }
}

fn json_or_default<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn refs_from_row(
    repo_id: Option<String>,
    workspace_id: Option<String>,
    package_name: Option<String>,
    service_id: Option<String>,
) -> ProjectRefs {
    ProjectRefs { repo_id, workspace_id, package_name, service_id }
}

impl Store for SqliteStore {
    fn healthcheck(&self, expected_dimension: usize) -> AtlasResult<()> {
        let conn = self.conn.lock();

        let table_count: usize = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('repositories', 'workspaces', 'services', 'code_files', 'code_chunks', 'code_symbols')",
            [],
            |row| row.get(0),
        )?;
        if table_count != 6 {
            return Err(AtlasError::SchemaMismatch {
                details: format!("expected 6 core tables, found {table_count}"),
            });
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(AtlasError::StoreUnavailable {
                reason: format!("integrity check failed: {integrity}"),
            });
        }

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM atlas_meta WHERE key = 'embedding_dimension'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored.and_then(|s| s.parse::<usize>().ok()) {
            Some(dim) if dim != expected_dimension => Err(AtlasError::SchemaMismatch {
                details: format!("store has dimension {dim}, configuration requests {expected_dimension}"),
            }),
            Some(_) => Ok(()),
            None => {
                // Fresh store: probe an existing vector before recording the
                // dimension, in case rows predate the meta table.
                let probe: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT embedding FROM code_chunks WHERE embedding IS NOT NULL LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();
                if let Some(bytes) = probe {
                    let vector: Vec<f32> = bincode::deserialize(&bytes).unwrap_or_default();
                    if vector.len() != expected_dimension {
                        return Err(AtlasError::SchemaMismatch {
                            details: format!(
                                "store has dimension {}, configuration requests {expected_dimension}",
                                vector.len()
                            ),
                        });
                    }
                }
                conn.execute(
                    "INSERT OR REPLACE INTO atlas_meta (key, value) VALUES ('embedding_dimension', ?1)",
                    params![expected_dimension.to_string()],
                )?;
                Ok(())
            }
        }
    }

    fn upsert_repository(&self, repo: &Repository) -> AtlasResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repositories \
             (repo_id, repo_name, repo_path, repo_type, metadata_json, indexed_at, last_updated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (repo_id) DO UPDATE SET \
               repo_name = excluded.repo_name, \
               repo_path = excluded.repo_path, \
               repo_type = excluded.repo_type, \
               metadata_json = excluded.metadata_json, \
               last_updated = excluded.last_updated",
            params![
                repo.repo_id,
                repo.repo_name,
                repo.repo_path,
                repo.repo_type.as_str(),
                serde_json::to_string(&repo.metadata)?,
                repo.indexed_at,
                repo.last_updated,
            ],
        )?;
        Ok(())
    }

    fn get_repository(&self, repo_id: &str) -> AtlasResult<Option<Repository>> {
        let conn = self.conn.lock();
        let repo = conn
            .query_row(
                "SELECT repo_id, repo_name, repo_path, repo_type, metadata_json, indexed_at, last_updated \
                 FROM repositories WHERE repo_id = ?1",
                params![repo_id],
                row_to_repository,
            )
            .optional()?;
        Ok(repo)
    }

    fn list_repositories(&self) -> AtlasResult<Vec<Repository>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repo_id, repo_name, repo_path, repo_type, metadata_json, indexed_at, last_updated \
             FROM repositories ORDER BY repo_id",
        )?;
        let rows = stmt.query_map([], row_to_repository)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_repository_cascade(&self, repo_id: &str) -> AtlasResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let files = tx.execute("DELETE FROM code_files WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM code_chunks WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM code_symbols WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM workspaces WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM workspace_aliases WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM workspace_dependencies WHERE repo_id = ?1", params![repo_id])?;
        tx.execute("DELETE FROM services WHERE repo_id = ?1", params![repo_id])?;
        tx.execute(
            "DELETE FROM cross_repo_dependencies WHERE source_repo_id = ?1 OR target_repo_id = ?1",
            params![repo_id],
        )?;
        tx.execute("DELETE FROM repositories WHERE repo_id = ?1", params![repo_id])?;
        tx.commit()?;
        Ok(files)
    }

    fn upsert_workspaces(&self, workspaces: &[Workspace]) -> AtlasResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for ws in workspaces {
            tx.execute(
                "INSERT INTO workspaces (repo_id, workspace_id, package_name, workspace_path, dependencies_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (repo_id, workspace_id) DO UPDATE SET \
                   package_name = excluded.package_name, \
                   workspace_path = excluded.workspace_path, \
                   dependencies_json = excluded.dependencies_json",
                params![
                    ws.repo_id,
                    ws.workspace_id,
                    ws.package_name,
                    ws.workspace_path,
                    serde_json::to_string(&ws.dependencies)?,
                ],
            )?;
            tx.execute(
                "DELETE FROM workspace_dependencies WHERE repo_id = ?1 AND source_workspace_id = ?2",
                params![ws.repo_id, ws.workspace_id],
            )?;
            for target in &ws.dependencies {
                tx.execute(
                    "INSERT INTO workspace_dependencies (repo_id, source_workspace_id, target_workspace_id, dependency_type) \
                     VALUES (?1, ?2, ?3, 'runtime')",
                    params![ws.repo_id, ws.workspace_id, target],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_workspaces(&self, repo_id: Option<&str>) -> AtlasResult<Vec<Workspace>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repo_id, workspace_id, package_name, workspace_path, dependencies_json \
             FROM workspaces WHERE (?1 IS NULL OR repo_id = ?1) ORDER BY repo_id, workspace_id",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(Workspace {
                repo_id: row.get(0)?,
                workspace_id: row.get(1)?,
                package_name: row.get(2)?,
                workspace_path: row.get(3)?,
                dependencies: json_or_default(row.get(4)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_workspace_aliases(&self, aliases: &[WorkspaceAlias]) -> AtlasResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for alias in aliases {
            tx.execute(
                "INSERT INTO workspace_aliases (repo_id, workspace_id, alias_type, alias_pattern, resolved_path) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (repo_id, workspace_id, alias_pattern) DO UPDATE SET \
                   alias_type = excluded.alias_type, \
                   resolved_path = excluded.resolved_path",
                params![
                    alias.repo_id,
                    alias.workspace_id,
                    alias.alias_type,
                    alias.alias_pattern,
                    alias.resolved_path,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn workspace_aliases(&self, repo_id: &str) -> AtlasResult<Vec<WorkspaceAlias>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repo_id, workspace_id, alias_type, alias_pattern, resolved_path \
             FROM workspace_aliases WHERE repo_id = ?1 ORDER BY workspace_id, alias_pattern",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            Ok(WorkspaceAlias {
                repo_id: row.get(0)?,
                workspace_id: row.get(1)?,
                alias_type: row.get(2)?,
                alias_pattern: row.get(3)?,
                resolved_path: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_services(&self, services: &[Service]) -> AtlasResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for service in services {
            tx.execute(
                "INSERT INTO services (service_id, service_name, repo_id, service_path, service_type, api_endpoints_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (repo_id, service_id) DO UPDATE SET \
                   service_name = excluded.service_name, \
                   service_path = excluded.service_path, \
                   service_type = excluded.service_type, \
                   api_endpoints_json = excluded.api_endpoints_json",
                params![
                    service.service_id,
                    service.service_name,
                    service.repo_id,
                    service.service_path,
                    service.service_type,
                    serde_json::to_string(&service.endpoints)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_services(&self, repo_id: Option<&str>) -> AtlasResult<Vec<Service>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repo_id, service_id, service_name, service_type, service_path, api_endpoints_json \
             FROM services WHERE (?1 IS NULL OR repo_id = ?1) ORDER BY repo_id, service_id",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            let endpoints_json: Option<String> = row.get(5)?;
            Ok(Service {
                repo_id: row.get(0)?,
                service_id: row.get(1)?,
                service_name: row.get(2)?,
                service_type: row.get(3)?,
                service_path: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                endpoints: endpoints_json
                    .and_then(|s| serde_json::from_str::<Vec<ApiEndpoint>>(&s).ok())
                    .unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_cross_repo_dependency(&self, dep: &CrossRepoDependency) -> AtlasResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cross_repo_dependencies (source_repo_id, target_repo_id, dependency_type, api_contracts_json) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                dep.source_repo_id,
                dep.target_repo_id,
                dep.dependency_type,
                dep.api_contracts.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    fn cross_repo_dependencies(&self, repo_id: &str) -> AtlasResult<Vec<CrossRepoDependency>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_repo_id, target_repo_id, dependency_type, api_contracts_json \
             FROM cross_repo_dependencies WHERE source_repo_id = ?1 OR target_repo_id = ?1",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| {
            let contracts: Option<String> = row.get(3)?;
            Ok(CrossRepoDependency {
                source_repo_id: row.get(0)?,
                target_repo_id: row.get(1)?,
                dependency_type: row.get(2)?,
                api_contracts: contracts.and_then(|s| serde_json::from_str(&s).ok()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn lookup_hashes(&self, repo_path: &str) -> AtlasResult<HashMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT file_path, file_hash FROM code_files WHERE repo_path = ?1")?;
        let rows = stmt.query_map(params![repo_path], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
    }

    fn persist_file(
        &self,
        file: &CodeFile,
        chunks: &[CodeChunk],
        symbols: &[CodeSymbol],
    ) -> AtlasResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_millis();

        tx.execute(
            "DELETE FROM code_files WHERE repo_path = ?1 AND file_path = ?2",
            params![file.repo_path, file.file_path],
        )?;
        tx.execute(
            "DELETE FROM code_chunks WHERE repo_path = ?1 AND file_path = ?2",
            params![file.repo_path, file.file_path],
        )?;
        tx.execute(
            "DELETE FROM code_symbols WHERE repo_path = ?1 AND file_path = ?2",
            params![file.repo_path, file.file_path],
        )?;

        tx.execute(
            "INSERT INTO code_files \
             (repo_path, file_path, file_summary, summary_embedding, language, total_lines, \
              imports_json, exports_json, file_hash, last_modified, \
              repo_id, workspace_id, package_name, service_id, indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                file.repo_path,
                file.file_path,
                file.summary,
                encode_vec(&file.summary_embedding)?,
                file.language.as_str(),
                file.total_lines,
                serde_json::to_string(&file.imports)?,
                serde_json::to_string(&file.exports)?,
                file.file_hash,
                file.last_modified,
                file.refs.repo_id,
                file.refs.workspace_id,
                file.refs.package_name,
                file.refs.service_id,
                now,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO code_chunks \
                 (chunk_id, repo_path, file_path, chunk_type, chunk_content, start_line, end_line, \
                  language, embedding, token_count, metadata_json, \
                  repo_id, workspace_id, package_name, service_id, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.chunk_id,
                    chunk.repo_path,
                    chunk.file_path,
                    chunk.kind.as_str(),
                    chunk.content,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.language.as_str(),
                    encode_vec(&chunk.embedding)?,
                    chunk.token_count,
                    serde_json::to_string(&chunk.metadata)?,
                    chunk.refs.repo_id,
                    chunk.refs.workspace_id,
                    chunk.refs.package_name,
                    chunk.refs.service_id,
                    now,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO code_symbols \
                 (repo_path, symbol_name, symbol_type, file_path, line_number, definition, \
                  embedding, scope, repo_id, workspace_id, package_name, service_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for symbol in symbols {
                stmt.execute(params![
                    symbol.repo_path,
                    symbol.symbol_name,
                    symbol.symbol_type,
                    symbol.file_path,
                    symbol.line_number,
                    symbol.definition,
                    encode_vec(&symbol.embedding)?,
                    symbol.scope.as_str(),
                    symbol.refs.repo_id,
                    symbol.refs.workspace_id,
                    symbol.refs.package_name,
                    symbol.refs.service_id,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_file_cascade(&self, repo_path: &str, file_path: &str) -> AtlasResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0usize;
        removed += tx.execute(
            "DELETE FROM code_files WHERE repo_path = ?1 AND file_path = ?2",
            params![repo_path, file_path],
        )?;
        removed += tx.execute(
            "DELETE FROM code_chunks WHERE repo_path = ?1 AND file_path = ?2",
            params![repo_path, file_path],
        )?;
        removed += tx.execute(
            "DELETE FROM code_symbols WHERE repo_path = ?1 AND file_path = ?2",
            params![repo_path, file_path],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn get_file(&self, repo_path: &str, file_path: &str) -> AtlasResult<Option<CodeFile>> {
        let conn = self.conn.lock();
        let file = conn
            .query_row(
                "SELECT repo_path, file_path, file_summary, summary_embedding, language, total_lines, \
                        imports_json, exports_json, file_hash, last_modified, \
                        repo_id, workspace_id, package_name, service_id \
                 FROM code_files WHERE repo_path = ?1 AND file_path = ?2",
                params![repo_path, file_path],
                row_to_file,
            )
            .optional()?;
        Ok(file)
    }

    fn list_file_paths(&self, repo_path: &str) -> AtlasResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT file_path FROM code_files WHERE repo_path = ?1 ORDER BY file_path")?;
        let rows = stmt.query_map(params![repo_path], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn file_indexed_at(&self, repo_path: &str, file_path: &str) -> AtlasResult<Option<i64>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT indexed_at FROM code_files WHERE repo_path = ?1 AND file_path = ?2",
                params![repo_path, file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn chunks_for_file(&self, repo_path: &str, file_path: &str) -> AtlasResult<Vec<CodeChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, repo_path, file_path, chunk_type, chunk_content, start_line, end_line, \
                    language, embedding, token_count, metadata_json, \
                    repo_id, workspace_id, package_name, service_id \
             FROM code_chunks WHERE repo_path = ?1 AND file_path = ?2 \
             ORDER BY start_line, end_line",
        )?;
        let rows = stmt.query_map(params![repo_path, file_path], chunk_from_columns)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn files_for_workspace(
        &self,
        repo_id: &str,
        workspace_id: &str,
    ) -> AtlasResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT repo_path, file_path FROM code_files \
             WHERE repo_id = ?1 AND workspace_id = ?2 ORDER BY file_path",
        )?;
        let rows = stmt.query_map(params![repo_id, workspace_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn chunks_for_service(
        &self,
        repo_id: &str,
        service_id: &str,
        limit: usize,
    ) -> AtlasResult<Vec<CodeChunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, repo_path, file_path, chunk_type, chunk_content, start_line, end_line, \
                    language, embedding, token_count, metadata_json, \
                    repo_id, workspace_id, package_name, service_id \
             FROM code_chunks WHERE repo_id = ?1 AND service_id = ?2 \
             ORDER BY file_path, start_line LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![repo_id, service_id, i64::try_from(limit).unwrap_or(i64::MAX)],
            chunk_from_columns,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn ann_files(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<FileHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.repo_path, f.file_path, f.file_summary, f.summary_embedding, f.language, \
                    f.repo_id, f.workspace_id, f.package_name, f.service_id, \
                    r.repo_type, s.service_type \
             FROM code_files f \
             LEFT JOIN repositories r ON r.repo_id = f.repo_id \
             LEFT JOIN services s ON s.repo_id = f.repo_id AND s.service_id = f.service_id \
             WHERE f.summary_embedding IS NOT NULL",
        )?;

        let mut hits: Vec<FileHit> = Vec::new();
        let rows = stmt.query_map([], |row| {
            let embedding = decode_vec(row.get(3)?);
            let refs = refs_from_row(row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?);
            let repo_type: Option<String> = row.get(9)?;
            let service_type: Option<String> = row.get(10)?;
            Ok((
                FileHit {
                    repo_path: row.get(0)?,
                    file_path: row.get(1)?,
                    summary: row.get(2)?,
                    language: Language::from_str_lossy(&row.get::<_, String>(4)?),
                    similarity: 0.0,
                    repo_type: repo_type.as_deref().map(RepoType::from_str_lossy),
                    refs,
                },
                embedding,
                service_type,
            ))
        })?;

        for row in rows {
            let (mut hit, embedding, service_type) = row?;
            if !filter.matches(&hit.refs, hit.repo_type, service_type.as_deref()) {
                continue;
            }
            let similarity = crate::embedder::cosine_similarity(query, &embedding);
            if similarity >= min_similarity {
                hit.similarity = similarity;
                hits.push(hit);
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn ann_chunks(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<ChunkHit>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id, c.repo_path, c.file_path, c.chunk_type, c.chunk_content, \
                    c.start_line, c.end_line, c.language, c.embedding, c.token_count, c.metadata_json, \
                    c.repo_id, c.workspace_id, c.package_name, c.service_id, \
                    r.repo_type, s.service_type \
             FROM code_chunks c \
             LEFT JOIN repositories r ON r.repo_id = c.repo_id \
             LEFT JOIN services s ON s.repo_id = c.repo_id AND s.service_id = c.service_id \
             WHERE c.embedding IS NOT NULL",
        )?;

        let rows = stmt.query_map([], |row| {
            let chunk = chunk_from_columns(row)?;
            let repo_type: Option<String> = row.get(15)?;
            let service_type: Option<String> = row.get(16)?;
            Ok((chunk, repo_type, service_type))
        })?;

        let mut hits: Vec<ChunkHit> = Vec::new();
        for row in rows {
            let (chunk, repo_type, service_type) = row?;
            let repo_type = repo_type.as_deref().map(RepoType::from_str_lossy);
            if !filter.matches(&chunk.refs, repo_type, service_type.as_deref()) {
                continue;
            }
            let similarity = crate::embedder::cosine_similarity(query, &chunk.embedding);
            if similarity >= min_similarity {
                hits.push(ChunkHit { chunk, similarity, repo_type });
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn find_symbols(
        &self,
        name: &str,
        scope: Option<SymbolScope>,
        limit: usize,
        filter: &SearchFilter,
    ) -> AtlasResult<Vec<CodeSymbol>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.repo_path, s.symbol_name, s.symbol_type, s.file_path, s.line_number, \
                    s.definition, s.embedding, s.scope, \
                    s.repo_id, s.workspace_id, s.package_name, s.service_id, \
                    r.repo_type \
             FROM code_symbols s \
             LEFT JOIN repositories r ON r.repo_id = s.repo_id \
             WHERE s.symbol_name = ?1 AND (?2 IS NULL OR s.scope = ?2) \
             ORDER BY s.repo_path, s.file_path, s.line_number",
        )?;

        let rows = stmt.query_map(params![name, scope.map(|s| s.as_str())], |row| {
            let refs = refs_from_row(row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?);
            let repo_type: Option<String> = row.get(12)?;
            Ok((
                CodeSymbol {
                    repo_path: row.get(0)?,
                    symbol_name: row.get(1)?,
                    symbol_type: row.get(2)?,
                    file_path: row.get(3)?,
                    line_number: row.get(4)?,
                    definition: row.get(5)?,
                    embedding: decode_vec(row.get(6)?),
                    scope: SymbolScope::from_str_lossy(&row.get::<_, String>(7)?),
                    refs,
                },
                repo_type,
            ))
        })?;

        let mut symbols = Vec::new();
        for row in rows {
            let (symbol, repo_type) = row?;
            let repo_type = repo_type.as_deref().map(RepoType::from_str_lossy);
            if !filter.matches(&symbol.refs, repo_type, None) {
                continue;
            }
            symbols.push(symbol);
            if symbols.len() >= limit {
                break;
            }
        }
        Ok(symbols)
    }

    fn counts(&self) -> AtlasResult<StoreCounts> {
        let conn = self.conn.lock();
        let count = |table: &str| -> AtlasResult<usize> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
        };
        Ok(StoreCounts {
            repositories: count("repositories")?,
            files: count("code_files")?,
            chunks: count("code_chunks")?,
            symbols: count("code_symbols")?,
        })
    }
}

fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<Repository> {
    let metadata: Option<String> = row.get(4)?;
    Ok(Repository {
        repo_id: row.get(0)?,
        repo_name: row.get(1)?,
        repo_path: row.get(2)?,
        repo_type: RepoType::from_str_lossy(&row.get::<_, String>(3)?),
        metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        indexed_at: row.get(5)?,
        last_updated: row.get(6)?,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeFile> {
    let imports: Vec<ImportRecord> = json_or_default(row.get(6)?);
    let exports: Vec<ExportRecord> = json_or_default(row.get(7)?);
    Ok(CodeFile {
        repo_path: row.get(0)?,
        file_path: row.get(1)?,
        summary: row.get(2)?,
        summary_embedding: decode_vec(row.get(3)?),
        language: Language::from_str_lossy(&row.get::<_, String>(4)?),
        total_lines: row.get(5)?,
        imports,
        exports,
        file_hash: row.get(8)?,
        last_modified: row.get(9)?,
        refs: refs_from_row(row.get(10)?, row.get(11)?, row.get(12)?, row.get(13)?),
    })
}

fn chunk_from_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<CodeChunk> {
    let metadata: Option<String> = row.get(10)?;
    Ok(CodeChunk {
        chunk_id: row.get(0)?,
        repo_path: row.get(1)?,
        file_path: row.get(2)?,
        kind: ChunkKind::from_str_lossy(&row.get::<_, String>(3)?),
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        content: row.get(4)?,
        language: Language::from_str_lossy(&row.get::<_, String>(7)?),
        token_count: row.get(9)?,
        embedding: decode_vec(row.get(8)?),
        metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        refs: refs_from_row(row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?),
    })
}
