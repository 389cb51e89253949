use crate::models::WorkSnapshot;
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{params, AccessMode, Config, Connection, Transaction};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

// stats.code is 1:1 with works.code. The pairing is kept by the ingestor
// (works row first, same transaction); DuckDB refuses upserts on a parent
// row that a declared FOREIGN KEY points at.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS works (
    code            VARCHAR PRIMARY KEY,
    site_id         VARCHAR,
    title           VARCHAR,
    circle          VARCHAR,
    release_date    VARCHAR,
    description     VARCHAR,
    img_url         VARCHAR,
    -- JSON arrays
    media           VARCHAR,
    desc_images     VARCHAR,
    embeds          VARCHAR,
    genres          VARCHAR,
    cv              VARCHAR,
    content_tokens  VARCHAR,
    chobit_url      VARCHAR,
    file_size       VARCHAR,
    updated_at      TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS stats (
    code                VARCHAR PRIMARY KEY,
    dl_count            BIGINT,
    wishlist_count      BIGINT,
    price               BIGINT,
    rate_average        DOUBLE,
    rate_count_detail   VARCHAR,
    affiliate_deny      BOOLEAN,
    last_updated        TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const CATALOG_QUERY: &str = r#"
SELECT
    w.code, w.site_id, w.title, w.circle, w.release_date, w.description,
    w.img_url, w.media, w.desc_images, w.embeds, w.chobit_url, w.genres, w.cv,
    w.content_tokens, w.file_size,
    s.dl_count, s.price, s.rate_average, s.wishlist_count, s.rate_count_detail
FROM works w
LEFT JOIN stats s ON w.code = s.code
ORDER BY w.code
"#;

const DEFAULT_SITE_ID: &str = "maniax";

/// A works row joined with its stats, list columns still JSON text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkRow {
    pub code: String,
    pub site_id: Option<String>,
    pub title: Option<String>,
    pub circle: Option<String>,
    pub release_date: Option<String>,
    pub description: Option<String>,
    pub img_url: Option<String>,
    pub media: Option<String>,
    pub desc_images: Option<String>,
    pub embeds: Option<String>,
    pub chobit_url: Option<String>,
    pub genres: Option<String>,
    pub cv: Option<String>,
    pub content_tokens: Option<String>,
    pub file_size: Option<String>,
    pub dl_count: Option<i64>,
    pub price: Option<i64>,
    pub rate_average: Option<f64>,
    pub wishlist_count: Option<i64>,
    pub rate_count_detail: Option<String>,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    /// Read-only handle for the API; never creates the file.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("No database at {:?}", path);
        }
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path, config)
            .with_context(|| format!("Failed to open DuckDB read-only at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Works / stats ─────────────────────────────────────────────────────────

    /// Replace the works row for this snapshot, and its stats row when the
    /// snapshot carries dynamic data. Returns whether a stats row was written.
    pub fn upsert_snapshot(&self, tx: &Transaction<'_>, snap: &WorkSnapshot) -> Result<bool> {
        let st = &snap.static_info;
        let dy = &snap.dynamic_info;
        let now = Utc::now().naive_utc();
        let embeds: Vec<&str> = st.chobit_url.iter().map(String::as_str).collect();

        tx.execute(
            r#"INSERT OR REPLACE INTO works (
                   code, site_id, title, circle, release_date, description, img_url,
                   media, desc_images, embeds, genres, cv, content_tokens,
                   chobit_url, file_size, updated_at
               ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                snap.code,
                dy.site_id.as_deref().unwrap_or(DEFAULT_SITE_ID),
                st.title,
                st.circle,
                st.release_date,
                st.description,
                dy.work_image,
                serde_json::to_string(&st.media)?,
                serde_json::to_string(&st.desc_images)?,
                serde_json::to_string(&embeds)?,
                serde_json::to_string(&st.genres)?,
                serde_json::to_string(&st.cv)?,
                serde_json::to_string(&st.content_tokens)?,
                st.chobit_url,
                st.file_size,
                now,
            ],
        )
        .with_context(|| format!("upsert work {}", snap.code))?;

        if dy.is_empty() {
            return Ok(false);
        }

        tx.execute(
            r#"INSERT OR REPLACE INTO stats (
                   code, dl_count, wishlist_count, price, rate_average,
                   rate_count_detail, affiliate_deny, last_updated
               ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                snap.code,
                dy.dl_count.unwrap_or(0),
                dy.wishlist_count.unwrap_or(0),
                dy.price.unwrap_or(0),
                dy.rate_average.unwrap_or(0.0),
                serde_json::to_string(&dy.rate_count_detail)?,
                dy.affiliate_deny.unwrap_or(false),
                now,
            ],
        )
        .with_context(|| format!("upsert stats {}", snap.code))?;

        Ok(true)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub fn load_work_rows(&self) -> Result<Vec<WorkRow>> {
        let mut stmt = self.conn.prepare(CATALOG_QUERY)?;
        let rows = stmt
            .query_map([], |r| {
                Ok(WorkRow {
                    code: r.get(0)?,
                    site_id: r.get(1)?,
                    title: r.get(2)?,
                    circle: r.get(3)?,
                    release_date: r.get(4)?,
                    description: r.get(5)?,
                    img_url: r.get(6)?,
                    media: r.get(7)?,
                    desc_images: r.get(8)?,
                    embeds: r.get(9)?,
                    chobit_url: r.get(10)?,
                    genres: r.get(11)?,
                    cv: r.get(12)?,
                    content_tokens: r.get(13)?,
                    file_size: r.get(14)?,
                    dl_count: r.get(15)?,
                    price: r.get(16)?,
                    rate_average: r.get(17)?,
                    wishlist_count: r.get(18)?,
                    rate_count_detail: r.get(19)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn work_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM works")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn stats_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM stats")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// `(column, type)` pairs for a table, in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
        )?;
        let cols = stmt
            .query_map(params![table], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DynamicInfo, StaticInfo};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn snap(title: &str, dl_count: Option<i64>) -> WorkSnapshot {
        WorkSnapshot::new(
            "RJ01000001",
            StaticInfo {
                title: Some(title.into()),
                genres: vec!["ASMR".into()],
                chobit_url: Some("https://chobit.cc/embed/x?aid=a".into()),
                ..Default::default()
            },
            DynamicInfo {
                dl_count,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_migrations_are_rerunnable() {
        let repo = repo();
        repo.run_migrations().unwrap();
        let cols = repo.table_columns("works").unwrap();
        assert_eq!(cols.first().map(|c| c.0.as_str()), Some("code"));
    }

    #[test]
    fn test_upsert_replaces_by_code() {
        let repo = repo();

        let tx = repo.begin().unwrap();
        assert!(repo.upsert_snapshot(&tx, &snap("old", Some(1))).unwrap());
        tx.commit().unwrap();

        let tx = repo.begin().unwrap();
        assert!(repo.upsert_snapshot(&tx, &snap("new", Some(2))).unwrap());
        tx.commit().unwrap();

        assert_eq!(repo.work_count().unwrap(), 1);
        assert_eq!(repo.stats_count().unwrap(), 1);
        let rows = repo.load_work_rows().unwrap();
        assert_eq!(rows[0].title.as_deref(), Some("new"));
        assert_eq!(rows[0].dl_count, Some(2));
        assert_eq!(rows[0].site_id.as_deref(), Some("maniax"));
        assert_eq!(rows[0].embeds.as_deref(), Some(r#"["https://chobit.cc/embed/x?aid=a"]"#));
    }

    #[test]
    fn test_empty_dynamic_writes_no_stats() {
        let repo = repo();
        let tx = repo.begin().unwrap();
        assert!(!repo.upsert_snapshot(&tx, &snap("t", None)).unwrap());
        tx.commit().unwrap();

        assert_eq!(repo.stats_count().unwrap(), 0);
        let rows = repo.load_work_rows().unwrap();
        assert_eq!(rows[0].dl_count, None);
    }

    #[test]
    fn test_read_only_open_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Repository::open_read_only(&dir.path().join("none.duckdb")).is_err());
    }
}
