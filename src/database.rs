use crate::error::{PipelineError, Result};
use crate::models::{Annotation, RawRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;
use uuid::Uuid;

/// Persistence collaborator. Each record is stored independently.
pub trait TrendStore: Send + Sync {
    fn create(&self, record: &RawRecord, annotation: &Annotation) -> Result<Uuid>;
}

pub struct TrendRow {
    pub uuid: Uuid,
    pub tag: String,
    pub platform: String,
    pub popularity: Option<String>,
    pub category: Option<String>,
    pub sentiment: String,
    pub predicted_growth: String,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Persistence("database mutex poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trends (
                uuid TEXT PRIMARY KEY,
                tag TEXT NOT NULL,
                tag_key TEXT NOT NULL,
                platform TEXT NOT NULL,
                popularity TEXT,
                category TEXT,
                region TEXT,
                captured_at TEXT NOT NULL,
                captured_day TEXT NOT NULL,
                attributes TEXT NOT NULL,
                insights TEXT NOT NULL,
                sentiment TEXT NOT NULL,
                predicted_growth TEXT NOT NULL,
                business_opportunities TEXT NOT NULL,
                related_trends TEXT NOT NULL,
                confidence REAL NOT NULL,
                UNIQUE (tag_key, platform, captured_day)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trends_captured_at ON trends(captured_at)",
            [],
        )?;

        Ok(())
    }

    /// Uuid of the observation of `record` on the same day, if any.
    fn find_same_day(&self, conn: &Connection, record: &RawRecord) -> Result<Option<Uuid>> {
        let uuid_str: Option<String> = conn
            .query_row(
                "SELECT uuid FROM trends WHERE tag_key = ?1 AND platform = ?2 AND captured_day = ?3",
                params![
                    record.dedup_key(),
                    &record.platform_name,
                    record.captured_at.format("%Y-%m-%d").to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;

        uuid_str
            .map(|s| Uuid::parse_str(&s).map_err(|e| PipelineError::Persistence(e.to_string())))
            .transpose()
    }

    /// Most recently captured trends, newest first.
    pub fn recent_trends(&self, limit: usize) -> Result<Vec<TrendRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT uuid, tag, platform, popularity, category, sentiment, predicted_growth,
                    confidence, captured_at
             FROM trends
             ORDER BY captured_at DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TrendRow {
                        uuid: Uuid::nil(),
                        tag: row.get(1)?,
                        platform: row.get(2)?,
                        popularity: row.get(3)?,
                        category: row.get(4)?,
                        sentiment: row.get(5)?,
                        predicted_growth: row.get(6)?,
                        confidence: row.get(7)?,
                        captured_at: row.get(8)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(uuid, mut row)| {
                row.uuid = Uuid::parse_str(&uuid).map_err(|e| PipelineError::Persistence(e.to_string()))?;
                Ok(row)
            })
            .collect()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trends", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl TrendStore for Database {
    /// Insert a new observation, or return the existing id when the same tag
    /// was already stored for this platform today.
    fn create(&self, record: &RawRecord, annotation: &Annotation) -> Result<Uuid> {
        let conn = self.lock()?;

        if let Some(uuid) = self.find_same_day(&conn, record)? {
            tracing::debug!("Trend '{}' already stored today for {}", record.tag, record.platform_name);
            return Ok(uuid);
        }

        let uuid = Uuid::new_v4();

        conn.execute(
            "INSERT INTO trends (
                uuid, tag, tag_key, platform, popularity, category, region, captured_at,
                captured_day, attributes, insights, sentiment, predicted_growth,
                business_opportunities, related_trends, confidence
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                uuid.to_string(),
                &record.tag,
                record.dedup_key(),
                &record.platform_name,
                &record.popularity_label,
                &record.category,
                &record.region,
                record.captured_at,
                record.captured_at.format("%Y-%m-%d").to_string(),
                to_json(&record.attributes),
                &annotation.insights,
                annotation.sentiment.as_str(),
                annotation.predicted_growth.as_str(),
                to_json(&annotation.business_opportunities),
                to_json(&annotation.related_trends),
                annotation.confidence as f64,
            ],
        )?;

        Ok(uuid)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
