use super::models::SearchResult;
use super::{Db, conversion_error, serialize_vector};
use rusqlite::{Result, params};

fn map_search_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchResult> {
    let record: String = row.get(0)?;
    let technique = serde_json::from_str(&record).map_err(|e| conversion_error(0, e))?;

    // vec_distance_cosine returns 1 - cos(a, b)
    let distance: f64 = row.get(4)?;

    Ok(SearchResult {
        technique,
        chunk_content: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        chunk_id: row.get(3)?,
        similarity: 1.0 - distance,
    })
}

impl Db {
    /// Returns the `top_k` chunks closest to `query_vector` by cosine
    /// distance, most similar first, each joined with its technique.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_blob = serialize_vector(query_vector);

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                t.record,
                c.content,
                c.position,
                c.id,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_chunks v
            JOIN chunks c ON c.id = v.rowid
            JOIN techniques t ON t.id = c.technique_row
            ORDER BY distance ASC, c.id ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![query_blob, top_k as i64], map_search_row)?;
        rows.collect()
    }
}
