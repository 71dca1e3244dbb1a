//! SQLite record store
//!
//! Records are kept as JSON next to the columns used for lookups (block key,
//! company id, member fingerprints). Every call opens its own connection on
//! the blocking pool.

use crate::core::blocking::BlockKey;
use crate::core::fingerprint::Fingerprint;
use crate::core::record::{CanonicalRecord, CompanyEntity, CompanyId, JobId};
use crate::core::service::ServiceError;
use crate::core::store::RecordStore;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Database schema version
const SCHEMA_VERSION: i32 = 2;

fn storage_error(action: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Storage(format!("Failed to {}: {}", action, e))
}

/// Create the schema or bring it up to date
pub fn initialize_database(db_path: &Path) -> Result<(), ServiceError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path).map_err(|e| storage_error("open database", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )
    .map_err(|e| storage_error("create schema_version", e))?;

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| storage_error("read schema version", e))?
        .unwrap_or(0);

    if current_version < SCHEMA_VERSION {
        apply_schema_updates(&conn, current_version)
            .map_err(|e| storage_error("migrate schema", e))?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [SCHEMA_VERSION],
        )
        .map_err(|e| storage_error("record schema version", e))?;
        debug!(
            "Migrated {} from schema {} to {}",
            db_path.display(),
            current_version,
            SCHEMA_VERSION
        );
    }

    Ok(())
}

fn apply_schema_updates(conn: &Connection, current_version: i32) -> rusqlite::Result<()> {
    if current_version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                block_key TEXT NOT NULL,
                company_id TEXT,
                record_json TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_block_key ON jobs(block_key);
            CREATE INDEX IF NOT EXISTS idx_jobs_company_id ON jobs(company_id);

            CREATE TABLE IF NOT EXISTS job_fingerprints (
                fingerprint TEXT PRIMARY KEY,
                job_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_job_fingerprints_job ON job_fingerprints(job_id);

            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                record_json TEXT NOT NULL
            );",
        )?;
    }

    if current_version < 2 {
        // Sponsorship flag as a column for reporting queries
        conn.execute_batch(
            "ALTER TABLE companies ADD COLUMN offers_sponsorship INTEGER NOT NULL DEFAULT 0;
            CREATE INDEX IF NOT EXISTS idx_companies_sponsorship ON companies(offers_sponsorship);",
        )?;
    }

    Ok(())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, ServiceError> {
    serde_json::to_string(value).map_err(|e| storage_error("serialize record", e))
}

fn decode<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, ServiceError> {
    serde_json::from_str(json).map_err(|e| storage_error("parse stored record", e))
}

fn write_job(conn: &Connection, record: &CanonicalRecord) -> Result<(), ServiceError> {
    conn.execute(
        "INSERT INTO jobs (id, block_key, company_id, record_json, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            block_key = excluded.block_key,
            company_id = excluded.company_id,
            record_json = excluded.record_json,
            last_seen = excluded.last_seen",
        params![
            record.id.as_str(),
            record.block_key.to_string(),
            record.company_id.as_ref().map(CompanyId::as_str),
            encode(record)?,
            record.last_seen.to_rfc3339(),
        ],
    )
    .map_err(|e| storage_error("write job", e))?;

    for fingerprint in &record.member_fingerprints {
        conn.execute(
            "INSERT OR IGNORE INTO job_fingerprints (fingerprint, job_id) VALUES (?1, ?2)",
            params![fingerprint.as_str(), record.id.as_str()],
        )
        .map_err(|e| storage_error("write fingerprint", e))?;
    }
    Ok(())
}

fn write_company(conn: &Connection, company: &CompanyEntity) -> Result<(), ServiceError> {
    conn.execute(
        "INSERT INTO companies (id, name, record_json, offers_sponsorship)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            record_json = excluded.record_json,
            offers_sponsorship = excluded.offers_sponsorship",
        params![
            company.id.as_str(),
            company.name,
            encode(company)?,
            company.offers_sponsorship,
        ],
    )
    .map_err(|e| storage_error("write company", e))?;
    Ok(())
}

fn read_job(conn: &Connection, id: &str) -> Result<Option<CanonicalRecord>, ServiceError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record_json FROM jobs WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| storage_error("read job", e))?;
    json.as_deref().map(decode).transpose()
}

fn read_company(conn: &Connection, id: &str) -> Result<Option<CompanyEntity>, ServiceError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record_json FROM companies WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| storage_error("read company", e))?;
    json.as_deref().map(decode).transpose()
}

fn read_jobs(conn: &Connection, linked: bool) -> Result<Vec<CanonicalRecord>, ServiceError> {
    let sql = if linked {
        "SELECT record_json FROM jobs WHERE company_id IS NOT NULL ORDER BY id"
    } else {
        "SELECT record_json FROM jobs WHERE company_id IS NULL ORDER BY id"
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| storage_error("prepare query", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| storage_error("query jobs", e))?;

    let mut jobs = Vec::new();
    for row in rows {
        let json = row.map_err(|e| storage_error("read job row", e))?;
        jobs.push(decode(&json)?);
    }
    Ok(jobs)
}

/// Record store backed by a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Open the database, creating or migrating the schema as needed
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let db_path = db_path.into();
        let path = db_path.clone();
        tokio::task::spawn_blocking(move || initialize_database(&path))
            .await
            .map_err(|e| ServiceError::Custom(format!("Database task failed: {}", e)))??;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a closure on a fresh connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, ServiceError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn =
                Connection::open(&db_path).map_err(|e| storage_error("open database", e))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ServiceError::Custom(format!("Database task failed: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_existing_by_fingerprint(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<HashMap<Fingerprint, JobId>, ServiceError> {
        let fingerprints = fingerprints.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT job_id FROM job_fingerprints WHERE fingerprint = ?1")
                .map_err(|e| storage_error("prepare query", e))?;
            let mut found = HashMap::new();
            for fingerprint in fingerprints {
                let job_id: Option<String> = stmt
                    .query_row([fingerprint.as_str()], |row| row.get(0))
                    .optional()
                    .map_err(|e| storage_error("look up fingerprint", e))?;
                if let Some(job_id) = job_id {
                    found.insert(fingerprint, JobId::new(job_id)?);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn get_canonicals_by_block(
        &self,
        keys: &[BlockKey],
    ) -> Result<Vec<CanonicalRecord>, ServiceError> {
        let keys: BTreeSet<String> = keys.iter().map(ToString::to_string).collect();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT record_json FROM jobs WHERE block_key = ?1 ORDER BY id")
                .map_err(|e| storage_error("prepare query", e))?;
            let mut records = Vec::new();
            for key in &keys {
                let rows = stmt
                    .query_map([key], |row| row.get::<_, String>(0))
                    .map_err(|e| storage_error("query block", e))?;
                for row in rows {
                    let json = row.map_err(|e| storage_error("read job row", e))?;
                    records.push(decode(&json)?);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn get_canonical(&self, id: &JobId) -> Result<Option<CanonicalRecord>, ServiceError> {
        let id = id.clone();
        self.with_conn(move |conn| read_job(conn, id.as_str())).await
    }

    async fn upsert_canonical(&self, record: &CanonicalRecord) -> Result<(), ServiceError> {
        self.upsert_canonicals(std::slice::from_ref(record)).await
    }

    async fn upsert_canonicals(&self, records: &[CanonicalRecord]) -> Result<(), ServiceError> {
        let records = records.to_vec();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| storage_error("begin transaction", e))?;
            for record in &records {
                write_job(&tx, record)?;
            }
            tx.commit()
                .map_err(|e| storage_error("commit transaction", e))?;
            debug!("Committed {} canonical jobs", records.len());
            Ok(())
        })
        .await
    }

    async fn get_jobs_without_company_link(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        self.with_conn(|conn| read_jobs(conn, false)).await
    }

    async fn get_linked_jobs(&self) -> Result<Vec<CanonicalRecord>, ServiceError> {
        self.with_conn(|conn| read_jobs(conn, true)).await
    }

    async fn set_company_link(
        &self,
        job: &JobId,
        company: &CompanyId,
        score: f64,
    ) -> Result<(), ServiceError> {
        let job = job.clone();
        let company = company.clone();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| storage_error("begin transaction", e))?;
            let mut record = read_job(&tx, job.as_str())?
                .ok_or_else(|| ServiceError::NotFound(format!("job {}", job)))?;
            record.company_id = Some(company);
            record.company_link_score = Some(score);
            write_job(&tx, &record)?;
            tx.commit()
                .map_err(|e| storage_error("commit transaction", e))
        })
        .await
    }

    async fn count_canonicals(&self) -> Result<usize, ServiceError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
                .map_err(|e| storage_error("count jobs", e))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn get_all_companies(&self) -> Result<Vec<CompanyEntity>, ServiceError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT record_json FROM companies ORDER BY id")
                .map_err(|e| storage_error("prepare query", e))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| storage_error("query companies", e))?;
            let mut companies = Vec::new();
            for row in rows {
                let json = row.map_err(|e| storage_error("read company row", e))?;
                companies.push(decode(&json)?);
            }
            Ok(companies)
        })
        .await
    }

    async fn get_company(&self, id: &CompanyId) -> Result<Option<CompanyEntity>, ServiceError> {
        let id = id.clone();
        self.with_conn(move |conn| read_company(conn, id.as_str())).await
    }

    async fn upsert_company(&self, company: &CompanyEntity) -> Result<(), ServiceError> {
        let company = company.clone();
        self.with_conn(move |conn| write_company(conn, &company)).await
    }

    async fn update_company_sponsorship(
        &self,
        id: &CompanyId,
        offers_sponsorship: bool,
    ) -> Result<(), ServiceError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let mut company = read_company(conn, id.as_str())?
                .ok_or_else(|| ServiceError::NotFound(format!("company {}", id)))?;
            company.offers_sponsorship = offers_sponsorship;
            write_company(conn, &company)
        })
        .await
    }

    async fn update_company_tags(
        &self,
        id: &CompanyId,
        tags: &BTreeSet<String>,
    ) -> Result<(), ServiceError> {
        let id = id.clone();
        let tags = tags.clone();
        self.with_conn(move |conn| {
            let mut company = read_company(conn, id.as_str())?
                .ok_or_else(|| ServiceError::NotFound(format!("company {}", id)))?;
            company.tags = tags;
            write_company(conn, &company)
        })
        .await
    }
}
