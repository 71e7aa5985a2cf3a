//! File repository: the caller-owned file registry (`files` table).

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw file row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub blob_key: String,
    pub created_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            original_name: row.get("original_name")?,
            mime_type: row.get("mime_type")?,
            size: row.get("size")?,
            blob_key: row.get("blob_key")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, file: &FileRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO files (id, owner_id, original_name, mime_type, size, blob_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                file.id,
                file.owner_id,
                file.original_name,
                file.mime_type,
                file.size,
                file.blob_key,
                file.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a file by ID, only if it belongs to `owner_id`.
pub fn find_for_owner(
    db: &Database,
    id: &str,
    owner_id: &str,
) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM files WHERE id = ?1 AND owner_id = ?2")?;
        let mut rows = stmt.query_map(params![id, owner_id], FileRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists an owner's files, newest first.
///
/// `search` keeps only files whose name contains it, ignoring ASCII case.
pub fn list_for_owner(
    db: &Database,
    owner_id: &str,
    search: Option<&str>,
) -> Result<Vec<FileRow>, DatabaseError> {
    let search = search.map(str::trim).filter(|s| !s.is_empty());
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM files
             WHERE owner_id = ?1 AND (?2 IS NULL OR instr(lower(original_name), lower(?2)) > 0)
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id, search], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a file row owned by `owner_id`. Returns `true` if a row was removed.
pub fn delete_for_owner(db: &Database, id: &str, owner_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM files WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        Ok(removed == 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(id: &str, owner: &str, created_at: &str) -> FileRow {
        FileRow {
            id: id.to_string(),
            owner_id: owner.to_string(),
            original_name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size: 11,
            blob_key: format!("uploads/{}/notes.txt", id),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_insert_and_find_for_owner() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample_file("f1", "alice", "2026-01-01T00:00:00Z")).unwrap();

        let found = find_for_owner(&db, "f1", "alice").unwrap().unwrap();
        assert_eq!(found.size, 11);
        assert!(find_for_owner(&db, "f1", "bob").unwrap().is_none());
    }

    #[test]
    fn test_list_for_owner() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample_file("f1", "alice", "2026-01-01T00:00:00Z")).unwrap();
        insert(&db, &sample_file("f2", "alice", "2026-01-02T00:00:00Z")).unwrap();
        insert(&db, &sample_file("f3", "bob", "2026-01-03T00:00:00Z")).unwrap();

        let files = list_for_owner(&db, "alice", None).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, "f2");
    }

    #[test]
    fn test_list_for_owner_search() {
        let db = Database::open_in_memory().unwrap();
        let mut report = sample_file("f1", "alice", "2026-01-01T00:00:00Z");
        report.original_name = "Quarterly Report.pdf".to_string();
        insert(&db, &report).unwrap();
        insert(&db, &sample_file("f2", "alice", "2026-01-02T00:00:00Z")).unwrap();

        let found = list_for_owner(&db, "alice", Some("report")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "f1");

        assert_eq!(list_for_owner(&db, "alice", Some("  ")).unwrap().len(), 2);
        assert!(list_for_owner(&db, "alice", Some("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_delete_for_owner() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &sample_file("f1", "alice", "2026-01-01T00:00:00Z")).unwrap();

        assert!(!delete_for_owner(&db, "f1", "bob").unwrap());
        assert!(delete_for_owner(&db, "f1", "alice").unwrap());
        assert!(find_for_owner(&db, "f1", "alice").unwrap().is_none());
    }
}
