//! The memory store: a `memories` table with an FTS5 index kept in sync by
//! triggers, and a `conversation_history` table bucketed by session id.
//!
//! All access goes through one `Mutex<Connection>` — safe to share across
//! async tasks via `Arc<MemoryStore>` since every operation takes the lock
//! synchronously (rusqlite `Connection` is `Send` but not `Sync`).

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use aeon_core::utils::truncate_chars;

/// History content is truncated to this many characters before storage.
const HISTORY_CONTENT_LIMIT: usize = 2000;

/// Words ignored by the keyword fallback search.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with", "what", "when", "how", "do", "does", "did",
    "my", "me", "i", "you", "your",
];

// ─────────────────────────────────────────────
// Categories and entries
// ─────────────────────────────────────────────

/// Memory category. Determines the default importance of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryCategory {
    Core,
    Daily,
    Conversation,
    Custom,
    Lesson,
    Correction,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Core => "core",
            MemoryCategory::Daily => "daily",
            MemoryCategory::Conversation => "conversation",
            MemoryCategory::Custom => "custom",
            MemoryCategory::Lesson => "lesson",
            MemoryCategory::Correction => "correction",
        }
    }

    /// Parse a category string; unknown values map to `Custom`.
    pub fn parse(s: &str) -> Self {
        match s {
            "core" => MemoryCategory::Core,
            "daily" => MemoryCategory::Daily,
            "conversation" => MemoryCategory::Conversation,
            "lesson" => MemoryCategory::Lesson,
            "correction" => MemoryCategory::Correction,
            _ => MemoryCategory::Custom,
        }
    }

    /// Canonical importance applied when the caller passes none.
    pub fn default_importance(&self) -> f64 {
        match self {
            MemoryCategory::Correction => 0.9,
            MemoryCategory::Lesson => 0.85,
            MemoryCategory::Core => 0.8,
            MemoryCategory::Daily => 0.5,
            MemoryCategory::Custom => 0.5,
            MemoryCategory::Conversation => 0.3,
        }
    }
}

/// A stored memory entry.
#[derive(Clone, Debug)]
pub struct MemoryEntry {
    pub id: i64,
    pub category: MemoryCategory,
    pub content: String,
    pub tags: String,
    pub importance: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

/// One persisted conversation turn.
#[derive(Clone, Debug)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

// ─────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────

/// Persistent SQLite store for memories and conversation history.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening {}", path.display()))?;

        // WAL + NORMAL sync: durable writes without fsync on every commit.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and the REPL's throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                category     TEXT    NOT NULL,
                content      TEXT    NOT NULL,
                tags         TEXT    NOT NULL DEFAULT '',
                importance   REAL    NOT NULL DEFAULT 0.5,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT    NOT NULL,
                accessed_at  TEXT    NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                content, tags,
                content=memories,
                content_rowid=id
            );

            -- Triggers: keep memories_fts in sync with memories
            CREATE TRIGGER IF NOT EXISTS memories_ai
                AFTER INSERT ON memories BEGIN
                    INSERT INTO memories_fts(rowid, content, tags)
                    VALUES (new.id, new.content, new.tags);
                END;
            CREATE TRIGGER IF NOT EXISTS memories_ad
                AFTER DELETE ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, content, tags)
                    VALUES ('delete', old.id, old.content, old.tags);
                END;
            CREATE TRIGGER IF NOT EXISTS memories_au
                AFTER UPDATE OF content, tags ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, content, tags)
                    VALUES ('delete', old.id, old.content, old.tags);
                    INSERT INTO memories_fts(rowid, content, tags)
                    VALUES (new.id, new.content, new.tags);
                END;

            CREATE TABLE IF NOT EXISTS conversation_history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_session
                ON conversation_history(session_id, id);",
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────
    // Memories
    // ─────────────────────────────────────────

    /// Store a memory. A non-positive importance takes the category default.
    pub fn store(
        &self,
        category: MemoryCategory,
        content: &str,
        tags: &str,
        importance: f64,
    ) -> Result<i64> {
        let importance = if importance > 0.0 {
            importance.min(1.0)
        } else {
            category.default_importance()
        };
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memories (category, content, tags, importance, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![category.as_str(), content, tags, importance, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Recall the best-matching entries for `query`.
    ///
    /// Ranking blends full-text relevance, recency decay and importance:
    /// `0.4·fts + 0.3·exp(−0.05·days)·(1 + 0.02·access_count) + 0.3·importance`.
    /// Each returned entry's access count is bumped and its `accessed_at`
    /// refreshed atomically with the read. A query the FTS dialect rejects
    /// falls back to keyword substring matching.
    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let now = Utc::now();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let fts = Self::fts_candidates(&tx, query);
        let mut entries = match fts {
            Ok(mut candidates) => {
                candidates.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.into_iter().map(|(e, _)| e).take(limit).collect()
            }
            Err(e) => {
                debug!(query = %query, error = %e, "FTS query rejected, keyword fallback");
                Self::keyword_candidates(&tx, query, limit)?
            }
        };

        Self::touch(&tx, &mut entries, now)?;
        tx.commit()?;
        Ok(entries)
    }

    /// FTS5 candidates with their combined scores.
    fn fts_candidates(
        conn: &Connection,
        query: &str,
    ) -> rusqlite::Result<Vec<(MemoryEntry, f64)>> {
        let now = Utc::now();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.category, m.content, m.tags, m.importance,
                    m.access_count, m.created_at, m.accessed_at,
                    bm25(memories_fts)
             FROM memories_fts
             JOIN memories m ON m.id = memories_fts.rowid
             WHERE memories_fts MATCH ?1",
        )?;

        let rows = stmt.query_map(params![query], |row| {
            let entry = row_to_entry(row)?;
            let bm25: f64 = row.get(8)?;
            Ok((entry, bm25))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entry, bm25) = row?;
            // FTS5 bm25: more negative is a better match.
            let strength = (-bm25).max(0.0);
            let fts_score = strength / (1.0 + strength);
            let score =
                0.4 * fts_score + 0.3 * recency_decay(&entry, now) + 0.3 * entry.importance;
            out.push((entry, score));
        }
        Ok(out)
    }

    /// Keyword fallback: whitespace tokens (stop words removed) matched as
    /// substrings against content and tags, most recently accessed first.
    fn keyword_candidates(
        conn: &Connection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| t.len() > 1 && !STOP_WORDS.contains(&t.as_str()))
            .collect();

        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let clauses: Vec<String> = (0..tokens.len())
            .map(|i| {
                format!(
                    "lower(content) LIKE ?{n} OR lower(tags) LIKE ?{n}",
                    n = i + 1
                )
            })
            .collect();
        let sql = format!(
            "SELECT id, category, content, tags, importance, access_count, created_at, accessed_at
             FROM memories WHERE {} ORDER BY accessed_at DESC LIMIT {}",
            clauses.join(" OR "),
            limit
        );

        let patterns: Vec<String> = tokens.iter().map(|t| format!("%{t}%")).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(patterns.iter()),
            row_to_entry,
        )?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Bump access counters for `entries` and refresh their `accessed_at`.
    /// The in-memory copies are updated to match what was written.
    fn touch(conn: &Connection, entries: &mut [MemoryEntry], now: DateTime<Utc>) -> Result<()> {
        let now_str = now.to_rfc3339();
        for entry in entries.iter_mut() {
            conn.execute(
                "UPDATE memories SET access_count = access_count + 1, accessed_at = ?1
                 WHERE id = ?2",
                params![now_str, entry.id],
            )?;
            entry.access_count += 1;
            entry.accessed_at = now;
        }
        Ok(())
    }

    /// Build the system-prompt memory fragment for `query`.
    ///
    /// Up to 10 core entries merged (deduped by id) with up to 5 recall
    /// hits; when both are empty, the 5 most recent entries stand in.
    /// Returns an empty string when nothing qualifies.
    pub fn build_context(&self, query: &str) -> String {
        let core = self.core_entries(10).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load core memories");
            Vec::new()
        });
        let recalled = self.recall(query, 5).unwrap_or_else(|e| {
            warn!(error = %e, "memory recall failed");
            Vec::new()
        });

        let mut merged = core;
        for entry in recalled {
            if !merged.iter().any(|e| e.id == entry.id) {
                merged.push(entry);
            }
        }

        if merged.is_empty() {
            merged = self.recent_entries(5).unwrap_or_default();
        }

        if merged.is_empty() {
            return String::new();
        }

        let mut block = String::from("<relevant_memories>\n");
        for entry in &merged {
            block.push_str(&format!(
                "- [{}] {}\n",
                entry.category.as_str(),
                entry.content
            ));
        }
        block.push_str("</relevant_memories>");
        block
    }

    fn core_entries(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category, content, tags, importance, access_count, created_at, accessed_at
             FROM memories WHERE category = 'core'
             ORDER BY importance DESC, id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn recent_entries(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category, content, tags, importance, access_count, created_at, accessed_at
             FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete stale low-value entries: older than `older_than_days`, in
    /// {daily, conversation, custom}, with access_count < 2 and
    /// importance < 0.5. Returns the number removed.
    pub fn consolidate(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(older_than_days)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM memories
             WHERE category IN ('daily', 'conversation', 'custom')
               AND access_count < 2
               AND importance < 0.5
               AND created_at < ?1",
            params![cutoff],
        )?;
        debug!(removed, "memory consolidation pass");
        Ok(removed)
    }

    /// Total number of stored memories.
    pub fn memory_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?)
    }

    // ─────────────────────────────────────────
    // Conversation history
    // ─────────────────────────────────────────

    /// Persist one conversation turn. Content is truncated to 2000 chars.
    pub fn save_history(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        let content = truncate_chars(content, HISTORY_CONTENT_LIMIT);
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversation_history (session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role, content, now],
        )?;
        Ok(())
    }

    /// The most recent `limit` turns of a session, in chronological order.
    pub fn get_history(&self, session_id: &str, limit: usize) -> Result<Vec<HistoryTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT role, content FROM (
                 SELECT id, role, content FROM conversation_history
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok(HistoryTurn {
                role: row.get(0)?,
                content: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The session id of the most recently written turn, for resuming
    /// the conversation after a restart.
    pub fn latest_session_id(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT session_id FROM conversation_history ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let category: String = row.get(1)?;
    let created_at: String = row.get(6)?;
    let accessed_at: String = row.get(7)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        category: MemoryCategory::parse(&category),
        content: row.get(2)?,
        tags: row.get(3)?,
        importance: row.get(4)?,
        access_count: row.get(5)?,
        created_at: parse_ts(&created_at),
        accessed_at: parse_ts(&accessed_at),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn recency_decay(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
    let days = (now - entry.accessed_at).num_seconds().max(0) as f64 / 86_400.0;
    (-0.05 * days).exp() * (1.0 + 0.02 * entry.access_count as f64)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
