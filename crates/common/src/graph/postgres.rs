//! Postgres-backed graph store
//!
//! Tables (created by ingestion):
//! - `documents(file_name, url, status, created_at, updated_at, node_count, relationship_count)`
//! - `chunks(id, document_name, position, length, content, embedding vector)`
//! - `entities(element_id, id, labels text[], description, embedding vector)`
//! - `chunk_entities(chunk_id, entity_element_id)`
//! - `relationships(element_id, rel_type, start_element_id, end_element_id)`
//!
//! Vectors travel as pgvector text literals and are cast with `::vector`.

use super::{
    Adjacency, ChunkHit, ChunkRecord, DocumentFilter, DocumentInfo, EntityOccurrence, GraphNode,
    GraphRelationship, GraphStore, NodeLabel,
};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement, Value,
};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Graph store over the ingestion tables
#[derive(Clone)]
pub struct PgGraphStore {
    db: DatabaseConnection,
    vector_index: String,
    keyword_index: String,
    retry: RetryPolicy,
    indexes_checked: std::sync::Arc<OnceCell<()>>,
}

impl PgGraphStore {
    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| AppError::configuration("database.url is not set"))?;

        info!("Connecting to graph database...");

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let db = Database::connect(opts)
            .await
            .map_err(|e| AppError::upstream("graph-store", format!("connect failed: {}", e)))?;

        info!("Graph database connection established");

        Ok(Self::from_connection(db, config))
    }

    /// Wrap an existing connection
    pub fn from_connection(db: DatabaseConnection, config: &DatabaseConfig) -> Self {
        Self {
            db,
            vector_index: config.vector_index.clone(),
            keyword_index: config.keyword_index.clone(),
            retry: config.retry.clone(),
            indexes_checked: std::sync::Arc::new(OnceCell::new()),
        }
    }

    async fn query(
        &self,
        operation: &str,
        sql: &str,
        values: Vec<Value>,
    ) -> Result<Vec<QueryResult>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        with_retry(&self.retry, operation, || {
            let stmt = stmt.clone();
            let db = &self.db;
            async move { db.query_all(stmt).await.map_err(AppError::from) }
        })
        .await
    }

    /// Searches require both indexes; checked once per store
    async fn ensure_indexes(&self) -> Result<()> {
        self.indexes_checked
            .get_or_try_init(|| self.verify_indexes())
            .await
            .map(|_| ())
    }
}

fn filter_values(filter: &DocumentFilter) -> Value {
    filter.document_names.clone().into()
}

/// Parse a pgvector text literal, "[1.0,2.0,...]"
fn parse_embedding(raw: &str) -> Option<Vec<f32>> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.is_empty() {
        return None;
    }
    inner
        .split(',')
        .map(|v| v.trim().parse::<f32>().ok())
        .collect()
}

/// Normalization flag 32 already maps `ts_rank_cd` to `rank / (rank + 1)`
fn keyword_score(rank: f64) -> f32 {
    rank.clamp(0.0, 1.0) as f32
}

fn to_utc(ts: Option<DateTime<FixedOffset>>) -> Option<DateTime<Utc>> {
    ts.map(|t| t.with_timezone(&Utc))
}

fn chunk_hit(row: &QueryResult, score: f32) -> Result<ChunkHit> {
    let document_name: String = row.try_get("", "document_name")?;
    let chunk = ChunkRecord {
        id: row.try_get("", "chunk_id")?,
        text: row.try_get("", "content")?,
        position: row.try_get("", "position")?,
        length: row.try_get("", "length")?,
        document: document_name.clone(),
    };
    let document = DocumentInfo {
        name: document_name,
        url: row.try_get("", "url")?,
        status: row
            .try_get::<Option<String>>("", "status")?
            .unwrap_or_default(),
        created_at: to_utc(row.try_get("", "created_at")?),
        updated_at: to_utc(row.try_get("", "updated_at")?),
        node_count: row.try_get::<Option<i64>>("", "node_count")?.unwrap_or(0),
        relationship_count: row
            .try_get::<Option<i64>>("", "relationship_count")?
            .unwrap_or(0),
    };
    Ok(ChunkHit {
        chunk,
        document,
        score: score.clamp(0.0, 1.0),
    })
}

/// Read a node whose columns carry `prefix`
fn node(row: &QueryResult, prefix: &str) -> Result<GraphNode> {
    let col = |name: &str| format!("{}{}", prefix, name);
    let labels: Vec<String> = row.try_get("", &col("labels"))?;
    let embedding: Option<String> = row.try_get("", &col("embedding"))?;
    Ok(GraphNode {
        element_id: row.try_get("", &col("element_id"))?,
        id: row.try_get("", &col("id"))?,
        labels: labels.iter().map(|l| NodeLabel::parse(l)).collect(),
        description: row.try_get("", &col("description"))?,
        embedding: embedding.as_deref().and_then(parse_embedding),
    })
}

const CHUNK_COLUMNS: &str = r#"
    c.id AS chunk_id, c.content, c.position, c.length,
    d.file_name AS document_name, d.url, d.status, d.created_at, d.updated_at,
    d.node_count, d.relationship_count
"#;

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>> {
        self.ensure_indexes().await?;

        let embedding_str = format!(
            "[{}]",
            embedding
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );

        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS},
                1 - (c.embedding <=> $1::vector) AS similarity
            FROM chunks c
            INNER JOIN documents d ON d.file_name = c.document_name
            WHERE c.embedding IS NOT NULL
              AND (cardinality($2::text[]) = 0 OR c.document_name = ANY($2::text[]))
            ORDER BY c.embedding <=> $1::vector, c.id
            LIMIT $3
            "#
        );

        let rows = self
            .query(
                "graph.vector_search",
                &sql,
                vec![
                    embedding_str.into(),
                    filter_values(filter),
                    (limit as i64).into(),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let cosine: f64 = row.try_get("", "similarity")?;
                chunk_hit(row, ((1.0 + cosine) / 2.0) as f32)
            })
            .collect()
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &DocumentFilter,
    ) -> Result<Vec<ChunkHit>> {
        self.ensure_indexes().await?;

        let sql = format!(
            r#"
            SELECT {CHUNK_COLUMNS},
                ts_rank_cd(
                    to_tsvector('english', c.content),
                    plainto_tsquery('english', $1),
                    32
                ) AS rank
            FROM chunks c
            INNER JOIN documents d ON d.file_name = c.document_name
            WHERE to_tsvector('english', c.content) @@ plainto_tsquery('english', $1)
              AND (cardinality($2::text[]) = 0 OR c.document_name = ANY($2::text[]))
            ORDER BY rank DESC, c.id
            LIMIT $3
            "#
        );

        let rows = self
            .query(
                "graph.keyword_search",
                &sql,
                vec![
                    query.to_string().into(),
                    filter_values(filter),
                    (limit as i64).into(),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.try_get("", "rank")?;
                chunk_hit(row, keyword_score(rank))
            })
            .collect()
    }

    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<EntityOccurrence>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = r#"
            SELECT ce.chunk_id,
                e.element_id, e.id, e.labels, e.description,
                e.embedding::text AS embedding
            FROM chunk_entities ce
            INNER JOIN entities e ON e.element_id = ce.entity_element_id
            WHERE ce.chunk_id = ANY($1::text[])
            ORDER BY ce.chunk_id, e.element_id
        "#;

        let rows = self
            .query("graph.entities_for_chunks", sql, vec![chunk_ids.to_vec().into()])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(EntityOccurrence {
                    chunk_id: row.try_get("", "chunk_id")?,
                    entity: node(row, "")?,
                })
            })
            .collect()
    }

    async fn neighborhood(
        &self,
        element_ids: &[String],
        excluded_relationship_types: &[String],
    ) -> Result<Vec<Adjacency>> {
        if element_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = r#"
            SELECT r.element_id AS rel_element_id, r.rel_type,
                s.element_id AS s_element_id, s.id AS s_id, s.labels AS s_labels,
                s.description AS s_description, NULL::text AS s_embedding,
                t.element_id AS t_element_id, t.id AS t_id, t.labels AS t_labels,
                t.description AS t_description, NULL::text AS t_embedding
            FROM relationships r
            INNER JOIN entities s ON s.element_id = r.start_element_id
            INNER JOIN entities t ON t.element_id = r.end_element_id
            WHERE (r.start_element_id = ANY($1::text[]) OR r.end_element_id = ANY($1::text[]))
              AND NOT (r.rel_type = ANY($2::text[]))
            ORDER BY r.element_id
        "#;

        let rows = self
            .query(
                "graph.neighborhood",
                sql,
                vec![
                    element_ids.to_vec().into(),
                    excluded_relationship_types.to_vec().into(),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let start = node(row, "s_")?;
                let end = node(row, "t_")?;
                Ok(Adjacency {
                    relationship: GraphRelationship {
                        element_id: row.try_get("", "rel_element_id")?,
                        rel_type: row.try_get("", "rel_type")?,
                        start: start.element_id.clone(),
                        end: end.element_id.clone(),
                    },
                    start,
                    end,
                })
            })
            .collect()
    }

    async fn verify_indexes(&self) -> Result<()> {
        let required = vec![self.vector_index.clone(), self.keyword_index.clone()];
        let rows = self
            .query(
                "graph.verify_indexes",
                "SELECT indexname FROM pg_indexes WHERE indexname = ANY($1::text[])",
                vec![required.clone().into()],
            )
            .await?;

        let present: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String>("", "indexname"))
            .collect::<std::result::Result<_, _>>()?;

        for index in &required {
            if !present.contains(index) {
                return Err(AppError::configuration(format!(
                    "required index '{}' does not exist",
                    index
                )));
            }
        }

        debug!(indexes = ?required, "Graph indexes verified");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await.map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding() {
        assert_eq!(parse_embedding("[1,2.5,-3]"), Some(vec![1.0, 2.5, -3.0]));
        assert_eq!(parse_embedding("[]"), None);
        assert_eq!(parse_embedding("[1,x]"), None);
    }

    #[test]
    fn test_keyword_score_keeps_normalized_rank() {
        assert_eq!(keyword_score(0.5), 0.5);
        assert_eq!(keyword_score(0.0), 0.0);
        assert_eq!(keyword_score(1.2), 1.0);
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let config = DatabaseConfig::default();
        let err = PgGraphStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
