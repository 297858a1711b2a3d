use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// What a memory record is, used as the nearest-neighbor metadata filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Insight,
    UserDirective,
    SelfPosted,
    ResearchMemo,
    SentimentSummary,
}

impl MemoryKind {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MemoryKind::Insight => "insight",
            MemoryKind::UserDirective => "user_directive",
            MemoryKind::SelfPosted => "self_posted",
            MemoryKind::ResearchMemo => "research_memo",
            MemoryKind::SentimentSummary => "sentiment_summary",
        }
    }
}

/// Append-only semantic memory. Embeddings are stored as little-endian f32
/// BLOBs and queried with a brute-force cosine scan; the corpus grows
/// unboundedly by design (no pruning or eviction).
pub struct VectorMemory {
    conn: Mutex<Connection>,
}

impl VectorMemory {
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory lock poisoned: {}", e))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let memory = Self {
            conn: Mutex::new(conn),
        };
        memory.ensure_schema()?;
        Ok(memory)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS memory_records (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                subject TEXT,
                document TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memory_kind ON memory_records(kind, created_at)",
            [],
        )?;
        Ok(())
    }

    pub fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        kind: MemoryKind,
        subject: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO memory_records (id, kind, subject, document, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                kind.as_db_str(),
                subject,
                document,
                encode_embedding(embedding),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Up to `k` documents nearest to `query`, restricted to the given kinds
    pub fn query(&self, query: &[f32], k: usize, kinds: &[MemoryKind]) -> Result<Vec<String>> {
        if kinds.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT document, embedding FROM memory_records WHERE kind IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let kind_params: Vec<&str> = kinds.iter().map(|kind| kind.as_db_str()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(kind_params), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut scored: Vec<(f32, String)> = Vec::new();
        for row in rows {
            let (document, blob) = row?;
            let embedding = decode_embedding(&blob);
            if embedding.len() != query.len() {
                continue;
            }
            scored.push((cosine_distance(query, &embedding), document));
        }

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, doc)| doc).collect())
    }

    /// Most recent documents of a kind, no similarity involved
    pub fn get(&self, kind: MemoryKind, limit: usize) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT document FROM memory_records WHERE kind = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![kind.as_db_str(), limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM memory_records", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance (1 - cosine similarity); 0.0 means identical direction.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_memory() -> (tempfile::TempDir, VectorMemory) {
        let dir = tempdir().expect("tempdir");
        let memory = VectorMemory::open(dir.path().join("memory.db")).expect("memory init");
        (dir, memory)
    }

    #[test]
    fn cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn query_returns_nearest_first_and_respects_kind_filter() {
        let (_dir, memory) = open_memory();
        memory
            .add("a", &[1.0, 0.0], "close insight", MemoryKind::Insight, None)
            .expect("add");
        memory
            .add("b", &[0.0, 1.0], "far insight", MemoryKind::Insight, None)
            .expect("add");
        memory
            .add("c", &[1.0, 0.0], "own post", MemoryKind::SelfPosted, None)
            .expect("add");

        let hits = memory
            .query(&[1.0, 0.1], 2, &[MemoryKind::Insight])
            .expect("query");
        assert_eq!(hits[0], "close insight");
        assert!(!hits.contains(&"own post".to_string()));
    }

    #[test]
    fn query_tolerates_dimension_mismatch() {
        let (_dir, memory) = open_memory();
        memory
            .add("a", &[1.0, 0.0, 0.0], "three dims", MemoryKind::Insight, None)
            .expect("add");
        let hits = memory
            .query(&[1.0, 0.0], 5, &[MemoryKind::Insight])
            .expect("query");
        assert!(hits.is_empty());
    }

    #[test]
    fn get_returns_most_recent_of_kind() {
        let (_dir, memory) = open_memory();
        memory
            .add("m1", &[1.0], "memo one", MemoryKind::ResearchMemo, Some("@proto"))
            .expect("add");
        memory
            .add("d1", &[1.0], "directive", MemoryKind::UserDirective, None)
            .expect("add");

        let memos = memory.get(MemoryKind::ResearchMemo, 10).expect("get");
        assert_eq!(memos, vec!["memo one".to_string()]);
        assert_eq!(memory.count().expect("count"), 2);
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let (_dir, memory) = open_memory();
        memory
            .add("same", &[1.0], "first", MemoryKind::Insight, None)
            .expect("add");
        memory
            .add("same", &[1.0], "second", MemoryKind::Insight, None)
            .expect("add");
        assert_eq!(memory.count().expect("count"), 1);
    }
}
