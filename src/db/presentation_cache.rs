use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::Database;
use analyst_common::plan::PresentationCacheEntry;

impl Database {
    /// Upsert keyed on (output_id, section); a re-render with a changed
    /// `content_hash` replaces the stale cached rendering in place.
    pub fn put_presentation_cache(&self, entry: &PresentationCacheEntry) -> Result<()> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO presentation_cache (output_id, section, content_hash, rendered, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(output_id, section) DO UPDATE SET
                content_hash = excluded.content_hash,
                rendered = excluded.rendered,
                created_at = excluded.created_at",
            params![
                entry.output_id,
                entry.section,
                entry.content_hash,
                entry.rendered,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("failed to upsert presentation cache entry")?;
        Ok(())
    }

    /// Returns the cached entry only if its stored hash still matches
    /// `current_hash` — a stale cache entry (source content changed since
    /// render) is treated as a miss, not served.
    pub fn get_presentation_cache(
        &self,
        output_id: &str,
        section: &str,
        current_hash: &str,
    ) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT content_hash, rendered FROM presentation_cache WHERE output_id = ?1 AND section = ?2",
        )?;
        let mut rows = stmt.query_map(params![output_id, section], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        match rows.next() {
            Some(row) => {
                let (hash, rendered) = row?;
                if hash == current_hash { Ok(Some(rendered)) } else { Ok(None) }
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, rendered: &str) -> PresentationCacheEntry {
        PresentationCacheEntry {
            output_id: "o1".into(),
            section: "summary".into(),
            content_hash: hash.into(),
            rendered: rendered.into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn stale_hash_is_treated_as_a_miss() {
        let db = Database::open_in_memory().unwrap();
        db.put_presentation_cache(&entry("abc", "<rendered v1>")).unwrap();
        assert_eq!(
            db.get_presentation_cache("o1", "summary", "abc").unwrap(),
            Some("<rendered v1>".to_string())
        );
        assert_eq!(db.get_presentation_cache("o1", "summary", "different").unwrap(), None);
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let db = Database::open_in_memory().unwrap();
        db.put_presentation_cache(&entry("abc", "<v1>")).unwrap();
        db.put_presentation_cache(&entry("xyz", "<v2>")).unwrap();
        assert_eq!(
            db.get_presentation_cache("o1", "summary", "xyz").unwrap(),
            Some("<v2>".to_string())
        );
    }
}
