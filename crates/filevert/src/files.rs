//! Caller-owned file registry.
//!
//! Files are the sources conversions read from and where saved results land.
//! The bytes live in blob storage; the registry keeps their metadata.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::blob::BlobRef;
use crate::db::file_repo::{self, FileRow};
use crate::db::{Database, DatabaseError};

/// A file belonging to one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    #[serde(skip_serializing)]
    pub owner_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip_serializing)]
    pub blob: BlobRef,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    fn from_row(row: FileRow) -> Result<Self, DatabaseError> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatabaseError::CorruptRow {
                table: "files",
                id: row.id.clone(),
                reason: format!("bad created_at: {}", e),
            })?;

        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            original_name: row.original_name,
            mime_type: row.mime_type,
            size: row.size,
            blob: BlobRef::new(row.blob_key),
            created_at,
        })
    }
}

/// What is known about a file before it is registered.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub blob: BlobRef,
}

#[derive(Clone)]
pub struct FileRegistry {
    db: Database,
}

impl FileRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn register(&self, owner_id: &str, file: NewFile) -> Result<StoredFile, DatabaseError> {
        let stored = StoredFile {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            original_name: file.original_name,
            mime_type: file.mime_type,
            size: file.size,
            blob: file.blob,
            created_at: Utc::now(),
        };

        file_repo::insert(
            &self.db,
            &FileRow {
                id: stored.id.clone(),
                owner_id: stored.owner_id.clone(),
                original_name: stored.original_name.clone(),
                mime_type: stored.mime_type.clone(),
                size: stored.size,
                blob_key: stored.blob.key().to_string(),
                created_at: stored.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            },
        )?;

        Ok(stored)
    }

    /// Returns the file only if `owner_id` owns it.
    pub fn get(&self, id: &str, owner_id: &str) -> Result<Option<StoredFile>, DatabaseError> {
        file_repo::find_for_owner(&self.db, id, owner_id)?
            .map(StoredFile::from_row)
            .transpose()
    }

    pub fn list(&self, owner_id: &str, search: Option<&str>) -> Result<Vec<StoredFile>, DatabaseError> {
        file_repo::list_for_owner(&self.db, owner_id, search)?
            .into_iter()
            .map(StoredFile::from_row)
            .collect()
    }

    pub fn remove(&self, id: &str, owner_id: &str) -> Result<bool, DatabaseError> {
        file_repo::delete_for_owner(&self.db, id, owner_id)
    }
}
