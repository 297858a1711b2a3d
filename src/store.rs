use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

pub const LAST_SEEN_KEY: &str = "last_seen_at";
pub const LAST_REFLECTION_KEY: &str = "last_reflection_at";
pub const LAST_MENTIONS_CHECK_KEY: &str = "last_mentions_check_at";
pub const RESEARCH_WEIGHTS_KEY: &str = "research_weights";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Published,
    Reviewed,
}

impl ObservationStatus {
    fn as_db_str(self) -> &'static str {
        match self {
            ObservationStatus::Published => "published",
            ObservationStatus::Reviewed => "reviewed",
        }
    }

    fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reviewed" => ObservationStatus::Reviewed,
            _ => ObservationStatus::Published,
        }
    }
}

/// A self-authored post and its later-observed performance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub tweet_id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub content: String,
    pub status: ObservationStatus,
    pub likes: Option<i64>,
    pub retweets: Option<i64>,
}

/// One outbound interaction attempt; the append-only dedup log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub timestamp: DateTime<Utc>,
    pub engagement_type: String,
    pub target_tweet_id: String,
    pub content: String,
    pub status: String,
}

/// Audit-trail row, independent of business data. Rate limits (the daily
/// vetting cap) count these rows, so a STARTED entry with no terminal row is
/// an acceptable crash artifact and still counts against the cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action_name: String,
    pub target: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Discovered,
    Vetting,
    Vetted,
    Archived,
    DeepDiveCandidate,
    DeepDive,
    PriorityAlpha,
    Monitoring,
}

impl PartnerStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            PartnerStatus::Discovered => "discovered",
            PartnerStatus::Vetting => "vetting",
            PartnerStatus::Vetted => "vetted",
            PartnerStatus::Archived => "archived",
            PartnerStatus::DeepDiveCandidate => "deep_dive_candidate",
            PartnerStatus::DeepDive => "deep_dive",
            PartnerStatus::PriorityAlpha => "priority_alpha",
            PartnerStatus::Monitoring => "monitoring",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vetting" => PartnerStatus::Vetting,
            "vetted" => PartnerStatus::Vetted,
            "archived" => PartnerStatus::Archived,
            "deep_dive_candidate" => PartnerStatus::DeepDiveCandidate,
            "deep_dive" => PartnerStatus::DeepDive,
            "priority_alpha" => PartnerStatus::PriorityAlpha,
            "monitoring" => PartnerStatus::Monitoring,
            _ => PartnerStatus::Discovered,
        }
    }
}

/// An externally discovered account moving through the partner funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentialPartner {
    pub screen_name: String,
    pub discovery_date: DateTime<Utc>,
    pub status: PartnerStatus,
    pub relevance_score: Option<i64>,
    pub activity_score: Option<i64>,
    pub legitimacy_score: Option<i64>,
    pub llm_summary: Option<String>,
    pub last_vetted_date: Option<DateTime<Utc>>,
    pub strategic_recommendation: Option<String>,
}

pub struct AgentStore {
    conn: Mutex<Connection>,
}

impl AgentStore {
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }

    /// Create or open the durable store
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS observations (
                timestamp TEXT NOT NULL,
                tweet_id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                likes INTEGER,
                retweets INTEGER
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS engagements (
                timestamp TEXT NOT NULL,
                engagement_type TEXT NOT NULL,
                target_tweet_id TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS potential_partners (
                screen_name TEXT PRIMARY KEY,
                discovery_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'discovered',
                relevance_score INTEGER,
                activity_score INTEGER,
                legitimacy_score INTEGER,
                llm_summary TEXT,
                last_vetted_date TEXT,
                strategic_recommendation TEXT
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS action_log (
                timestamp TEXT NOT NULL,
                action_name TEXT NOT NULL,
                target TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_engagements_target ON engagements(target_tweet_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_action_log_name ON action_log(action_name, timestamp)",
            [],
        )?;

        Ok(())
    }

    // --- Action log ---

    pub fn log_action(&self, action_name: &str, target: &str, status: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO action_log (timestamp, action_name, target, status) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().to_rfc3339(), action_name, target, status],
        )?;
        Ok(())
    }

    /// Count action-log rows for `action_name` dated today (UTC)
    pub fn actions_today(&self, action_name: &str) -> Result<u32> {
        let conn = self.lock_conn()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM action_log
             WHERE action_name = ?1 AND DATE(timestamp) = DATE('now')",
            params![action_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn recent_actions(&self, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, action_name, target, status FROM action_log
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (timestamp, action_name, target, status) = row?;
            entries.push(ActionLogEntry {
                timestamp: parse_timestamp(&timestamp),
                action_name,
                target,
                status,
            });
        }
        Ok(entries)
    }

    // --- Observations ---

    /// Record a successful post. Idempotent: the same content id observed
    /// twice is ignored.
    pub fn insert_observation(&self, tweet_id: &str, subject: &str, content: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO observations (timestamp, tweet_id, subject, content, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                tweet_id,
                subject,
                content,
                ObservationStatus::Published.as_db_str()
            ],
        )?;
        Ok(())
    }

    /// Backfill observed performance and mark the row reviewed
    pub fn review_observation(&self, tweet_id: &str, likes: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE observations SET likes = ?1, status = ?2 WHERE tweet_id = ?3",
            params![likes, ObservationStatus::Reviewed.as_db_str(), tweet_id],
        )?;
        Ok(())
    }

    pub fn recent_observations(&self, limit: usize) -> Result<Vec<Observation>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, tweet_id, subject, content, status, likes, retweets
             FROM observations
             WHERE status IN ('published', 'reviewed')
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(Observation {
                timestamp: parse_timestamp(&row.get::<_, String>(0)?),
                tweet_id: row.get(1)?,
                subject: row.get(2)?,
                content: row.get(3)?,
                status: ObservationStatus::from_db(&row.get::<_, String>(4)?),
                likes: row.get(5)?,
                retweets: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_observation(&self, tweet_id: &str) -> Result<Option<Observation>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT timestamp, tweet_id, subject, content, status, likes, retweets
                 FROM observations WHERE tweet_id = ?1",
                params![tweet_id],
                |row| {
                    Ok(Observation {
                        timestamp: parse_timestamp(&row.get::<_, String>(0)?),
                        tweet_id: row.get(1)?,
                        subject: row.get(2)?,
                        content: row.get(3)?,
                        status: ObservationStatus::from_db(&row.get::<_, String>(4)?),
                        likes: row.get(5)?,
                        retweets: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn latest_post_time(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM observations ORDER BY timestamp DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|t| parse_timestamp(&t)))
    }

    // --- Engagements ---

    pub fn insert_engagement(
        &self,
        engagement_type: &str,
        target_tweet_id: &str,
        content: &str,
        status: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO engagements (timestamp, engagement_type, target_tweet_id, content, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                engagement_type,
                target_tweet_id,
                content,
                status
            ],
        )?;
        Ok(())
    }

    pub fn has_engaged(&self, target_tweet_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM engagements WHERE target_tweet_id = ?1 LIMIT 1",
                params![target_tweet_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn engaged_target_ids(&self) -> Result<HashSet<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT target_tweet_id FROM engagements")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(ids.collect::<std::result::Result<HashSet<_>, _>>()?)
    }

    /// Targets we have replied to (any reply flavor)
    pub fn replied_target_ids(&self) -> Result<HashSet<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_tweet_id FROM engagements WHERE engagement_type LIKE '%reply%'",
        )?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(ids.collect::<std::result::Result<HashSet<_>, _>>()?)
    }

    // --- Potential partners ---

    /// Insert a newly discovered handle; returns true if the row is new
    pub fn insert_discovered_partner(&self, screen_name: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO potential_partners (screen_name, discovery_date, status)
             VALUES (?1, ?2, ?3)",
            params![
                screen_name,
                Utc::now().to_rfc3339(),
                PartnerStatus::Discovered.as_db_str()
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn partner_exists(&self, screen_name: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM potential_partners WHERE screen_name = ?1",
                params![screen_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_partner(&self, screen_name: &str) -> Result<Option<PotentialPartner>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT screen_name, discovery_date, status, relevance_score, activity_score,
                        legitimacy_score, llm_summary, last_vetted_date, strategic_recommendation
                 FROM potential_partners WHERE screen_name = ?1",
                params![screen_name],
                partner_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn any_partner_with_status(&self, status: PartnerStatus) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM potential_partners WHERE status = ?1 LIMIT 1",
                params![status.as_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn random_partner_with_status(&self, status: PartnerStatus) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT screen_name FROM potential_partners
                 WHERE status = ?1 ORDER BY RANDOM() LIMIT 1",
                params![status.as_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Least-recently-vetted partner whose composite score clears the
    /// proactive-networking bar
    pub fn high_value_vetted_partner(&self) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let name: Option<String> = conn
            .query_row(
                "SELECT screen_name FROM potential_partners
                 WHERE status = 'vetted'
                   AND (relevance_score + activity_score + legitimacy_score) >= 22
                 ORDER BY last_vetted_date ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub fn set_partner_status(&self, screen_name: &str, status: PartnerStatus) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE potential_partners SET status = ?1 WHERE screen_name = ?2",
            params![status.as_db_str(), screen_name],
        )?;
        Ok(())
    }

    /// Persist a completed vetting pass
    pub fn record_vetting(
        &self,
        screen_name: &str,
        status: PartnerStatus,
        relevance: i64,
        activity: i64,
        legitimacy: i64,
        summary: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE potential_partners
             SET status = ?1, relevance_score = ?2, activity_score = ?3,
                 legitimacy_score = ?4, llm_summary = ?5, last_vetted_date = ?6
             WHERE screen_name = ?7",
            params![
                status.as_db_str(),
                relevance,
                activity,
                legitimacy,
                summary,
                Utc::now().to_rfc3339(),
                screen_name
            ],
        )?;
        Ok(())
    }

    /// Persist a deep-dive outcome
    pub fn record_recommendation(
        &self,
        screen_name: &str,
        status: PartnerStatus,
        next_step: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE potential_partners SET status = ?1, strategic_recommendation = ?2
             WHERE screen_name = ?3",
            params![status.as_db_str(), next_step, screen_name],
        )?;
        Ok(())
    }

    // --- Agent state (timer markers, adapted weights) ---

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM agent_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO agent_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Stamp a timer marker with the current instant
    pub fn touch_marker(&self, key: &str) -> Result<()> {
        self.set_state(key, &Utc::now().to_rfc3339())
    }

    /// True when the marker is absent, unparseable, or older than `threshold`
    pub fn marker_elapsed(&self, key: &str, threshold: Duration) -> Result<bool> {
        match self.get_state(key)? {
            None => Ok(true),
            Some(raw) => match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(then) => Ok(Utc::now() - then.with_timezone(&Utc) > threshold),
                Err(_) => Ok(true),
            },
        }
    }
}

fn partner_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PotentialPartner> {
    Ok(PotentialPartner {
        screen_name: row.get(0)?,
        discovery_date: parse_timestamp(&row.get::<_, String>(1)?),
        status: PartnerStatus::from_db(&row.get::<_, String>(2)?),
        relevance_score: row.get(3)?,
        activity_score: row.get(4)?,
        legitimacy_score: row.get(5)?,
        llm_summary: row.get(6)?,
        last_vetted_date: row
            .get::<_, Option<String>>(7)?
            .map(|t| parse_timestamp(&t)),
        strategic_recommendation: row.get(8)?,
    })
}

// Rows written by older builds may carry timestamps without offsets; fall
// back to epoch rather than failing the whole query.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, AgentStore) {
        let dir = tempdir().expect("tempdir");
        let store = AgentStore::new(dir.path().join("state.db")).expect("store init");
        (dir, store)
    }

    #[test]
    fn observation_review_round_trip() {
        let (_dir, store) = open_store();
        store
            .insert_observation("100", "market structure", "a post")
            .expect("insert");

        let obs = store.get_observation("100").expect("get").expect("row");
        assert_eq!(obs.status, ObservationStatus::Published);
        assert_eq!(obs.likes, None);

        store.review_observation("100", 7).expect("review");
        let obs = store.get_observation("100").expect("get").expect("row");
        assert_eq!(obs.status, ObservationStatus::Reviewed);
        assert_eq!(obs.likes, Some(7));
    }

    #[test]
    fn duplicate_observation_is_ignored() {
        let (_dir, store) = open_store();
        store
            .insert_observation("1", "subject", "first")
            .expect("insert");
        store
            .insert_observation("1", "subject", "second sighting")
            .expect("insert again");
        let obs = store.get_observation("1").expect("get").expect("row");
        assert_eq!(obs.content, "first");
    }

    #[test]
    fn engagement_dedup_lookup() {
        let (_dir, store) = open_store();
        assert!(!store.has_engaged("55").expect("check"));
        store
            .insert_engagement("reply", "55", "hello", "success")
            .expect("insert");
        assert!(store.has_engaged("55").expect("check"));
        assert!(store.engaged_target_ids().expect("ids").contains("55"));
    }

    #[test]
    fn replied_targets_filter_by_type() {
        let (_dir, store) = open_store();
        store
            .insert_engagement("mention_reply", "1", "hi", "success")
            .expect("insert");
        store
            .insert_engagement("like", "2", "", "success")
            .expect("insert");
        let replied = store.replied_target_ids().expect("ids");
        assert!(replied.contains("1"));
        assert!(!replied.contains("2"));
    }

    #[test]
    fn partner_discovery_is_idempotent() {
        let (_dir, store) = open_store();
        assert!(store.insert_discovered_partner("@proto").expect("insert"));
        assert!(!store.insert_discovered_partner("@proto").expect("again"));
        let partner = store.get_partner("@proto").expect("get").expect("row");
        assert_eq!(partner.status, PartnerStatus::Discovered);
    }

    #[test]
    fn partner_status_queries() {
        let (_dir, store) = open_store();
        store.insert_discovered_partner("@a").expect("insert");
        assert!(store
            .any_partner_with_status(PartnerStatus::Discovered)
            .expect("any"));
        assert!(!store
            .any_partner_with_status(PartnerStatus::DeepDiveCandidate)
            .expect("any"));

        store
            .set_partner_status("@a", PartnerStatus::DeepDiveCandidate)
            .expect("set");
        assert_eq!(
            store
                .random_partner_with_status(PartnerStatus::DeepDiveCandidate)
                .expect("pick"),
            Some("@a".to_string())
        );
    }

    #[test]
    fn vetting_record_updates_scores_and_status() {
        let (_dir, store) = open_store();
        store.insert_discovered_partner("@b").expect("insert");
        store
            .record_vetting("@b", PartnerStatus::Vetted, 8, 7, 9, "credible infra project")
            .expect("record");
        let partner = store.get_partner("@b").expect("get").expect("row");
        assert_eq!(partner.status, PartnerStatus::Vetted);
        assert_eq!(partner.relevance_score, Some(8));
        assert!(partner.last_vetted_date.is_some());
    }

    #[test]
    fn high_value_vetted_partner_requires_score_threshold() {
        let (_dir, store) = open_store();
        store.insert_discovered_partner("@low").expect("insert");
        store
            .record_vetting("@low", PartnerStatus::Vetted, 6, 6, 6, "middling")
            .expect("record");
        assert_eq!(store.high_value_vetted_partner().expect("query"), None);

        store.insert_discovered_partner("@high").expect("insert");
        store
            .record_vetting("@high", PartnerStatus::Vetted, 8, 8, 8, "strong")
            .expect("record");
        assert_eq!(
            store.high_value_vetted_partner().expect("query"),
            Some("@high".to_string())
        );
    }

    #[test]
    fn action_log_counts_today() {
        let (_dir, store) = open_store();
        assert_eq!(store.actions_today("vet_potential_partner").expect("count"), 0);
        store
            .log_action("vet_potential_partner", "@a", "STARTED")
            .expect("log");
        store
            .log_action("vet_potential_partner", "@a", "SUCCESS: vetted")
            .expect("log");
        store
            .log_action("post_content", "subject", "SUCCESS")
            .expect("log");
        assert_eq!(store.actions_today("vet_potential_partner").expect("count"), 2);
    }

    #[test]
    fn markers_elapse_when_absent_or_old() {
        let (_dir, store) = open_store();
        assert!(store
            .marker_elapsed(LAST_REFLECTION_KEY, Duration::hours(1))
            .expect("elapsed"));

        store.touch_marker(LAST_REFLECTION_KEY).expect("touch");
        assert!(!store
            .marker_elapsed(LAST_REFLECTION_KEY, Duration::hours(1))
            .expect("elapsed"));

        let stale = (Utc::now() - Duration::hours(2)).to_rfc3339();
        store.set_state(LAST_REFLECTION_KEY, &stale).expect("set");
        assert!(store
            .marker_elapsed(LAST_REFLECTION_KEY, Duration::hours(1))
            .expect("elapsed"));
    }

    #[test]
    fn latest_post_time_orders_by_timestamp() {
        let (_dir, store) = open_store();
        assert!(store.latest_post_time().expect("query").is_none());
        store
            .insert_observation("1", "subject", "content")
            .expect("insert");
        assert!(store.latest_post_time().expect("query").is_some());
    }
}
