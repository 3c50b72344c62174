use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;
use analyst_common::documents::Document;

impl Database {
    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO executor_documents (document_id, title, content, content_type, char_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.document_id,
                doc.title,
                doc.content,
                doc.content_type,
                doc.char_count as i64,
                doc.created_at.to_rfc3339(),
            ],
        )
        .context("failed to insert document")?;
        Ok(())
    }

    pub fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT document_id, title, content, content_type, char_count, created_at
             FROM executor_documents WHERE document_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![document_id], map_document)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_documents(&self, document_ids: &[String]) -> Result<Vec<Document>> {
        let mut out = Vec::with_capacity(document_ids.len());
        for id in document_ids {
            if let Some(doc) = self.get_document(id)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT document_id, title, content, content_type, char_count, created_at
             FROM executor_documents ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], map_document)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read document row")?);
        }
        Ok(out)
    }

    pub fn delete_document(&self, document_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "DELETE FROM executor_documents WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }
}

fn map_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let created_at: String = row.get(5)?;
    Ok(Document {
        document_id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        content_type: row.get(3)?,
        char_count: row.get::<_, i64>(4)? as usize,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_and_reads_back_a_document() {
        let db = Database::open_in_memory().unwrap();
        let doc = Document::new("d1".into(), "Title".into(), "body text".into());
        db.insert_document(&doc).unwrap();
        let fetched = db.get_document("d1").unwrap().unwrap();
        assert_eq!(fetched.title, "Title");
        assert_eq!(fetched.char_count, 9);
    }

    #[test]
    fn missing_document_returns_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_document("nope").unwrap().is_none());
    }

    #[test]
    fn get_documents_skips_unknown_ids() {
        let db = Database::open_in_memory().unwrap();
        let doc = Document::new("d1".into(), "T".into(), "x".into());
        db.insert_document(&doc).unwrap();
        let docs = db.get_documents(&["d1".into(), "ghost".into()]).unwrap();
        assert_eq!(docs.len(), 1);
    }
}
