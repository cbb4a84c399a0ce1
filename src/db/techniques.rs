use super::models::{Chunk, TechniqueSummary};
use super::{Db, conversion_error, serialize_vector};
use crate::techniques::Technique;
use rusqlite::{OptionalExtension, Result, params};

impl Db {
    /// Stores technique records and returns their row ids, in input order.
    pub fn insert_techniques(&mut self, techniques: &[Technique]) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut rows = Vec::with_capacity(techniques.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO techniques (technique_id, name, record) VALUES (?, ?, ?) RETURNING id",
            )?;
            for technique in techniques {
                let record = serde_json::to_string(technique)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                let row: i64 = stmt.query_row(
                    params![technique.display_id(), technique.display_name(), record],
                    |row| row.get(0),
                )?;
                rows.push(row);
            }
        }

        tx.commit()?;
        Ok(rows)
    }

    /// Inserts one batch of chunks with their vectors in a single transaction.
    pub fn insert_chunks(&mut self, chunks: &[Chunk<'_>], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(rusqlite::Error::ToSqlConversionFailure(
                format!(
                    "{} chunks but {} embeddings",
                    chunks.len(),
                    embeddings.len()
                )
                .into(),
            ));
        }

        let tx = self.conn.transaction()?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            tx.execute(
                "INSERT INTO chunks (technique_row, position, content) VALUES (?, ?, ?)",
                params![chunk.technique_row, chunk.position as i64, chunk.content],
            )?;
            let chunk_id = tx.last_insert_rowid();

            let vector_blob = serialize_vector(embedding);
            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, vector_blob],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Looks up a technique by its ATT&CK identifier, ignoring case.
    pub fn find_technique(&self, technique_id: &str) -> Result<Option<Technique>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM techniques WHERE technique_id = ? COLLATE NOCASE ORDER BY id LIMIT 1",
                params![technique_id.trim()],
                |row| row.get(0),
            )
            .optional()?;

        record
            .map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(0, e)))
            .transpose()
    }

    pub fn count_techniques(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM techniques", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Lists every stored technique with its chunk count, in insertion order.
    pub fn list_techniques(&self) -> Result<Vec<TechniqueSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.technique_id, t.name, COUNT(c.id)
            FROM techniques t
            LEFT JOIN chunks c ON c.technique_row = t.id
            GROUP BY t.id
            ORDER BY t.id
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TechniqueSummary {
                technique_id: row.get(0)?,
                name: row.get(1)?,
                chunks: row.get::<_, i64>(2)? as usize,
            })
        })?;

        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreInfo;

    fn technique(id: &str, name: &str) -> Technique {
        Technique {
            id: id.to_string(),
            name: name.to_string(),
            description: format!("{name} description"),
            ..Default::default()
        }
    }

    fn store() -> Db {
        Db::open_in_memory(&StoreInfo::new("local", "test", 3, "mitre")).unwrap()
    }

    #[test]
    fn test_insert_and_find_techniques() {
        let mut db = store();
        let rows = db
            .insert_techniques(&[
                technique("T1059", "Command and Scripting Interpreter"),
                technique("T1003", "OS Credential Dumping"),
            ])
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0] < rows[1]);
        assert_eq!(db.count_techniques().unwrap(), 2);

        let found = db.find_technique("t1003").unwrap().unwrap();
        assert_eq!(found.name, "OS Credential Dumping");
        assert_eq!(found.description, "OS Credential Dumping description");

        assert!(db.find_technique("T9999").unwrap().is_none());
    }

    #[test]
    fn test_insert_chunks_and_list() {
        let mut db = store();
        let rows = db
            .insert_techniques(&[technique("T1566", "Phishing"), technique("T1078", "Valid Accounts")])
            .unwrap();

        let chunks = vec![
            Chunk {
                technique_row: rows[0],
                position: 0,
                content: "first part",
            },
            Chunk {
                technique_row: rows[0],
                position: 1,
                content: "second part",
            },
            Chunk {
                technique_row: rows[1],
                position: 0,
                content: "accounts",
            },
        ];
        let embeddings = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]];
        db.insert_chunks(&chunks, &embeddings).unwrap();

        assert_eq!(db.count_chunks().unwrap(), 3);
        let listed = db.list_techniques().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].technique_id, "T1566");
        assert_eq!(listed[0].chunks, 2);
        assert_eq!(listed[1].name, "Valid Accounts");
        assert_eq!(listed[1].chunks, 1);
    }

    #[test]
    fn test_insert_chunks_length_mismatch_is_error() {
        let mut db = store();
        let rows = db.insert_techniques(&[technique("T1566", "Phishing")]).unwrap();
        let chunks = [Chunk {
            technique_row: rows[0],
            position: 0,
            content: "only chunk",
        }];

        let err = db.insert_chunks(&chunks, &[]).unwrap_err();
        assert!(matches!(err, rusqlite::Error::ToSqlConversionFailure(_)));
        assert_eq!(db.count_chunks().unwrap(), 0);
    }

    #[test]
    fn test_missing_id_stored_as_unknown() {
        let mut db = store();
        db.insert_techniques(&[Technique::default()]).unwrap();
        let listed = db.list_techniques().unwrap();
        assert_eq!(listed[0].technique_id, "Unknown");
        assert_eq!(listed[0].name, "No name");
    }
}
