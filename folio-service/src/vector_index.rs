//! Per-document vector collections.
//!
//! Each document owns exactly one collection. Point ids are derived from
//! `{doc_id}:{chunk_index}`, so re-indexing a document overwrites its points
//! instead of duplicating them.

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Metadata stored alongside every indexed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointMetadata {
    pub page: u32,
    pub doc_id: String,
    pub owner_id: String,
    /// Text came from OCR rather than the PDF text layer
    pub ocr: bool,
    pub chunk_index: u32,
}

/// One embedded chunk
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: PointMetadata,
}

impl VectorPoint {
    pub fn point_id(doc_id: &str, chunk_index: u32) -> String {
        format!("{}:{}", doc_id, chunk_index)
    }
}

/// Storage for embedded chunks, partitioned into collections
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the contents of `collection` with `points`.
    ///
    /// Points with matching ids are overwritten; points the collection held
    /// before that are not in `points` are removed.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> ServiceResult<usize>;

    async fn point_count(&self, collection: &str) -> ServiceResult<u64>;

    /// Drop every point in `collection`. Returns `false` if it was empty.
    async fn drop_collection(&self, collection: &str) -> ServiceResult<bool>;
}

/// SQLite-backed vector index
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(path: &Path) -> ServiceResult<Self> {
        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(DatabaseError::Query)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ServiceResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vector_points (
                collection TEXT NOT NULL,
                point_id TEXT NOT NULL,
                generation TEXT NOT NULL,
                embedding BLOB NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (collection, point_id)
            );
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: e.to_string(),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write_points(
        &self,
        collection: &str,
        points: &[VectorPoint],
    ) -> Result<usize, DatabaseError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;
        let generation = uuid::Uuid::new_v4().to_string();

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO vector_points (collection, point_id, generation, embedding, text, metadata) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(DatabaseError::Query)?;

            for point in points {
                let embedding: Vec<u8> = point.vector.iter().flat_map(|f| f.to_le_bytes()).collect();
                let metadata =
                    serde_json::to_string(&point.metadata).map_err(DatabaseError::Serialization)?;
                stmt.execute(params![
                    collection,
                    point.id,
                    generation,
                    embedding,
                    point.text,
                    metadata
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        tx.execute(
            "DELETE FROM vector_points WHERE collection = ?1 AND generation != ?2",
            params![collection, generation],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(points.len())
    }

    /// Stored points of a collection ordered by chunk index
    #[cfg(test)]
    pub fn points(&self, collection: &str) -> Vec<VectorPoint> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT point_id, embedding, text, metadata FROM vector_points WHERE collection = ?1",
            )
            .unwrap();
        let mut points: Vec<VectorPoint> = stmt
            .query_map(params![collection], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                let metadata: String = row.get(3)?;
                Ok(VectorPoint {
                    id: row.get(0)?,
                    vector: bytes
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect(),
                    text: row.get(2)?,
                    metadata: serde_json::from_str(&metadata).unwrap(),
                })
            })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        points.sort_by_key(|p| p.metadata.chunk_index);
        points
    }

    /// Names of collections holding at least one point
    #[cfg(test)]
    pub fn collections(&self) -> Vec<String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT collection FROM vector_points ORDER BY collection")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> ServiceResult<usize> {
        self.write_points(collection, &points)
            .map_err(|source| ServiceError::IndexWriteFailed {
                collection: collection.to_string(),
                source,
            })
    }

    async fn point_count(&self, collection: &str) -> ServiceResult<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vector_points WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count.max(0) as u64)
    }

    async fn drop_collection(&self, collection: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "DELETE FROM vector_points WHERE collection = ?1",
                params![collection],
            )
            .map_err(DatabaseError::Query)?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(doc_id: &str, index: u32, text: &str) -> VectorPoint {
        VectorPoint {
            id: VectorPoint::point_id(doc_id, index),
            vector: vec![index as f32, 0.5, -1.25],
            text: text.to_string(),
            metadata: PointMetadata {
                page: 1,
                doc_id: doc_id.to_string(),
                owner_id: "alice".to_string(),
                ocr: false,
                chunk_index: index,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_prunes() {
        let index = SqliteVectorIndex::open_in_memory().unwrap();

        index
            .upsert("col-a", vec![point("d", 0, "a"), point("d", 1, "b"), point("d", 2, "c")])
            .await
            .unwrap();
        assert_eq!(index.point_count("col-a").await.unwrap(), 3);

        index
            .upsert("col-a", vec![point("d", 0, "x"), point("d", 1, "y")])
            .await
            .unwrap();
        let stored = index.points("col-a");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].text, "x");
        assert_eq!(stored[1].vector, vec![1.0, 0.5, -1.25]);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let index = SqliteVectorIndex::open_in_memory().unwrap();
        index.upsert("col-a", vec![point("a", 0, "a")]).await.unwrap();
        index.upsert("col-b", vec![point("b", 0, "b")]).await.unwrap();

        assert!(index.drop_collection("col-a").await.unwrap());
        assert!(!index.drop_collection("col-a").await.unwrap());
        assert_eq!(index.point_count("col-a").await.unwrap(), 0);
        assert_eq!(index.point_count("col-b").await.unwrap(), 1);
    }
}
