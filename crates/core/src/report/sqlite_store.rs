//! SQLite-backed report store.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::enrich::{
    EnrichError, PersistenceService, ReportFilter, ReportStatus, ViolationReport,
};

/// SQLite-backed implementation of [`PersistenceService`].
///
/// One row per `report_id`; status transitions overwrite in place so the
/// latest state of every report is queryable.
pub struct SqliteReportStore {
    conn: Mutex<Connection>,
}

impl SqliteReportStore {
    /// Open (creating if needed) the report database at `path`.
    pub fn new(path: &Path) -> Result<Self, EnrichError> {
        let conn =
            Connection::open(path).map_err(|e| EnrichError::Persistence(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, useful for testing.
    pub fn in_memory() -> Result<Self, EnrichError> {
        let conn =
            Connection::open_in_memory().map_err(|e| EnrichError::Persistence(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), EnrichError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                report_id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                severity TEXT NOT NULL,
                summary TEXT NOT NULL,
                status TEXT NOT NULL,
                event TEXT NOT NULL,
                caption TEXT,
                narrative TEXT,
                snapshot TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_device ON reports(device_id);
            CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
            CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports(created_at DESC);
            "#,
        )
        .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<ViolationReport> {
        let report_id: String = row.get(0)?;
        let device_id: String = row.get(1)?;
        let created_at_str: String = row.get(2)?;
        let severity_json: String = row.get(3)?;
        let summary: String = row.get(4)?;
        let status_str: String = row.get(5)?;
        let event_json: String = row.get(6)?;
        let caption: Option<String> = row.get(7)?;
        let narrative_json: Option<String> = row.get(8)?;
        let snapshot_json: Option<String> = row.get(9)?;
        let attempts: u32 = row.get(10)?;
        let error: Option<String> = row.get(11)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(ViolationReport {
            report_id,
            device_id,
            created_at,
            severity: serde_json::from_str(&severity_json).unwrap_or(crate::detect::Severity::Low),
            summary,
            status: ReportStatus::parse(&status_str).unwrap_or(ReportStatus::Failed),
            event: serde_json::from_str(&event_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            caption,
            narrative: narrative_json.and_then(|j| serde_json::from_str(&j).ok()),
            snapshot: snapshot_json.and_then(|j| serde_json::from_str(&j).ok()),
            attempts,
            error,
        })
    }
}

const SELECT_COLUMNS: &str = "report_id, device_id, created_at, severity, summary, status, \
     event, caption, narrative, snapshot, attempts, error";

#[async_trait]
impl PersistenceService for SqliteReportStore {
    async fn upsert(&self, report: &ViolationReport) -> Result<(), EnrichError> {
        let event_json = serde_json::to_string(&report.event)
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        let severity_json = serde_json::to_string(&report.severity)
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        let narrative_json = report
            .narrative
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        let snapshot_json = report
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;

        let conn = self.lock_conn();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO reports
                (report_id, device_id, created_at, severity, summary, status,
                 event, caption, narrative, snapshot, attempts, error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                report.report_id,
                report.device_id,
                report.created_at.to_rfc3339(),
                severity_json,
                report.summary,
                report.status.as_str(),
                event_json,
                report.caption,
                narrative_json,
                snapshot_json,
                report.attempts,
                report.error,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn set_status(
        &self,
        report_id: &str,
        status: ReportStatus,
        error: Option<&str>,
    ) -> Result<(), EnrichError> {
        let conn = self.lock_conn();
        let updated = conn
            .execute(
                "UPDATE reports SET status = ?1, error = ?2, updated_at = ?3 WHERE report_id = ?4",
                params![status.as_str(), error, Utc::now().to_rfc3339(), report_id],
            )
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;

        if updated == 0 {
            return Err(EnrichError::Persistence(format!(
                "report not found: {}",
                report_id
            )));
        }
        Ok(())
    }

    async fn get(&self, report_id: &str) -> Result<Option<ViolationReport>, EnrichError> {
        let conn = self.lock_conn();
        conn.query_row(
            &format!(
                "SELECT {} FROM reports WHERE report_id = ?1",
                SELECT_COLUMNS
            ),
            params![report_id],
            Self::row_to_report,
        )
        .optional()
        .map_err(|e| EnrichError::Persistence(e.to_string()))
    }

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<ViolationReport>, EnrichError> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = filter.device_id {
            conditions.push("device_id = ?");
            params_vec.push(Box::new(device_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params_vec.push(Box::new(status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {} FROM reports {} ORDER BY created_at DESC {}",
            SELECT_COLUMNS, where_clause, limit_clause
        );

        let conn = self.lock_conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                Self::row_to_report,
            )
            .map_err(|e| EnrichError::Persistence(e.to_string()))?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row.map_err(|e| EnrichError::Persistence(e.to_string()))?);
        }
        Ok(reports)
    }
}
