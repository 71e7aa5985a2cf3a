//! Job repository: CRUD operations for the `conversion_jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw conversion job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub source_file_id: String,
    pub source_file_name: String,
    pub source_blob_key: String,
    pub source_format: String,
    pub target_format: String,
    pub status: String,
    pub progress: u8,
    pub result_blob_key: Option<String>,
    pub result_file_name: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            source_file_id: row.get("source_file_id")?,
            source_file_name: row.get("source_file_name")?,
            source_blob_key: row.get("source_blob_key")?,
            source_format: row.get("source_format")?,
            target_format: row.get("target_format")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            result_blob_key: row.get("result_blob_key")?,
            result_file_name: row.get("result_file_name")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO conversion_jobs (id, owner_id, source_file_id, source_file_name,
             source_blob_key, source_format, target_format, status, progress, result_blob_key,
             result_file_name, error, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.owner_id,
                job.source_file_id,
                job.source_file_name,
                job.source_blob_key,
                job.source_format,
                job.target_format,
                job.status,
                job.progress,
                job.result_blob_key,
                job.result_file_name,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes the mutable fields of `job` only if the stored row still carries
/// `expected_status` and `expected_progress`.
///
/// Returns `false` when the row changed underneath the caller (or is gone),
/// in which case nothing is written.
pub fn compare_and_update(
    db: &Database,
    job: &JobRow,
    expected_status: &str,
    expected_progress: u8,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE conversion_jobs SET status=?2, progress=?3, result_blob_key=?4,
             result_file_name=?5, error=?6, updated_at=?7, completed_at=?8
             WHERE id=?1 AND status=?9 AND progress=?10",
            params![
                job.id,
                job.status,
                job.progress,
                job.result_blob_key,
                job.result_file_name,
                job.error,
                job.updated_at,
                job.completed_at,
                expected_status,
                expected_progress,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Finds a job by its ID, regardless of owner.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM conversion_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a job by ID, only if it belongs to `owner_id`.
pub fn find_for_owner(
    db: &Database,
    id: &str,
    owner_id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM conversion_jobs WHERE id = ?1 AND owner_id = ?2")?;
        let mut rows = stmt.query_map(params![id, owner_id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count). Newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM conversion_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM conversion_jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Returns every job with the given status, oldest first.
pub fn find_by_status(db: &Database, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM conversion_jobs WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![status], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
