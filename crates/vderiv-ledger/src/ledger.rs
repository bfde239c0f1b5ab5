//! Ledger operations over SQLite.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use vderiv_models::{AssetId, DerivativeKind, DerivativeRecord, DerivativeState, JobId, SourceAsset};

use crate::error::{LedgerError, LedgerResult};

/// Upper bound for stored error text.
pub const ERROR_TEXT_MAX: usize = 1000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS source_assets (
    id          INTEGER PRIMARY KEY,
    file_path   TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS derivatives (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_asset_id INTEGER NOT NULL,
    profile         TEXT NOT NULL,
    kind            TEXT NOT NULL,
    state           TEXT NOT NULL DEFAULT 'pending',
    progress        INTEGER NOT NULL DEFAULT 0,
    output_ref      TEXT NOT NULL DEFAULT '',
    poster_ref      TEXT NOT NULL DEFAULT '',
    owning_job_id   TEXT NOT NULL DEFAULT '',
    source_etag     TEXT NOT NULL DEFAULT '',
    error           TEXT NOT NULL DEFAULT '',
    started_at      TEXT NULL,
    finished_at     TEXT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (source_asset_id, profile, kind)
);

CREATE INDEX IF NOT EXISTS idx_derivatives_state ON derivatives (state);
CREATE INDEX IF NOT EXISTS idx_derivatives_lookup ON derivatives (source_asset_id, profile);
"#;

const RECORD_COLUMNS: &str = "id, source_asset_id, profile, kind, state, progress, output_ref, \
     poster_ref, owning_job_id, source_etag, error, started_at, finished_at, created_at, updated_at";

/// Handle to the derivative ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (and if needed create) the ledger database and its schema.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Register or refresh the source asset referenced by derivative rows.
    pub async fn upsert_source_asset(&self, asset: &SourceAsset) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO source_assets (id, file_path, title, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (id) DO UPDATE SET file_path = excluded.file_path, title = excluded.title",
        )
        .bind(asset.id.as_i64())
        .bind(&asset.file_path)
        .bind(&asset.title)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a registered source asset.
    pub async fn source_asset(&self, asset: AssetId) -> LedgerResult<Option<SourceAsset>> {
        let row = sqlx::query("SELECT id, file_path, title FROM source_assets WHERE id = ?1")
            .bind(asset.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| SourceAsset {
            id: AssetId(row.get::<i64, _>("id")),
            file_path: row.get("file_path"),
            title: row.get("title"),
        }))
    }

    /// Create a Pending record if absent. Idempotent: concurrent callers
    /// converge on one row through the uniqueness constraint, not through
    /// application-level locking. Returns whether a row was created.
    pub async fn ensure(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
    ) -> LedgerResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO derivatives (source_asset_id, profile, kind, state, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4) \
             ON CONFLICT (source_asset_id, profile, kind) DO NOTHING",
        )
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim every claimable rendition row of (asset, profile)
    /// for `job_id`.
    ///
    /// A single conditional bulk update transitions rows whose state is
    /// Pending or Failed to Processing, stamping `started_at`, resetting
    /// progress and clearing the previous error. The transition predicate
    /// is self-clearing: a racing worker's identical update simply matches
    /// zero rows. Returns how many rows this caller now owns; zero means
    /// another worker owns the job or the work is already Ready.
    pub async fn claim(&self, asset: AssetId, profile: &str, job_id: &JobId) -> LedgerResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE derivatives SET \
                 state = 'processing', \
                 progress = 0, \
                 started_at = ?1, \
                 finished_at = NULL, \
                 error = '', \
                 owning_job_id = ?2, \
                 updated_at = ?1 \
             WHERE source_asset_id = ?3 AND profile = ?4 \
               AND kind IN ('mp4', 'webm') \
               AND state IN ('pending', 'failed')",
        )
        .bind(now)
        .bind(job_id.as_str())
        .bind(asset.as_i64())
        .bind(profile)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected();
        debug!(asset = %asset, profile, job_id = %job_id, claimed, "claim attempt");
        Ok(claimed)
    }

    /// All derivative rows for an asset, across profiles, for status display.
    pub async fn get_for_asset(&self, asset: AssetId) -> LedgerResult<Vec<DerivativeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM derivatives WHERE source_asset_id = ?1 \
             ORDER BY profile, kind"
        ))
        .bind(asset.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Derivative rows for one (asset, profile).
    pub async fn records_for(
        &self,
        asset: AssetId,
        profile: &str,
    ) -> LedgerResult<Vec<DerivativeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM derivatives \
             WHERE source_asset_id = ?1 AND profile = ?2 ORDER BY kind"
        ))
        .bind(asset.as_i64())
        .bind(profile)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// One derivative row, if present.
    pub async fn find(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
    ) -> LedgerResult<Option<DerivativeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM derivatives \
             WHERE source_asset_id = ?1 AND profile = ?2 AND kind = ?3"
        ))
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Ready rows for one (asset, profile), for the best-sources view.
    pub async fn ready_records(
        &self,
        asset: AssetId,
        profile: &str,
    ) -> LedgerResult<Vec<DerivativeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM derivatives \
             WHERE source_asset_id = ?1 AND profile = ?2 AND state = 'ready' ORDER BY kind"
        ))
        .bind(asset.as_i64())
        .bind(profile)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Stamp the queue job responsible for (asset, profile) rows.
    /// Traceability only; ownership is decided by [`Ledger::claim`].
    pub async fn set_owning_job(
        &self,
        asset: AssetId,
        profile: &str,
        job_id: &JobId,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE derivatives SET owning_job_id = ?1, updated_at = ?2 \
             WHERE source_asset_id = ?3 AND profile = ?4",
        )
        .bind(job_id.as_str())
        .bind(Utc::now())
        .bind(asset.as_i64())
        .bind(profile)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Raise one record's progress. `MAX` keeps progress monotonically
    /// non-decreasing within an attempt even if updates arrive out of order.
    pub async fn bump_progress(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
        progress: u8,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE derivatives SET progress = MAX(progress, ?1), updated_at = ?2 \
             WHERE source_asset_id = ?3 AND profile = ?4 AND kind = ?5",
        )
        .bind(i64::from(progress.min(100)))
        .bind(Utc::now())
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Raise progress on both rendition rows at once (job-level life sign).
    pub async fn bump_progress_all(
        &self,
        asset: AssetId,
        profile: &str,
        progress: u8,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE derivatives SET progress = MAX(progress, ?1), updated_at = ?2 \
             WHERE source_asset_id = ?3 AND profile = ?4 AND kind IN ('mp4', 'webm')",
        )
        .bind(i64::from(progress.min(100)))
        .bind(Utc::now())
        .bind(asset.as_i64())
        .bind(profile)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach the poster reference to both rendition rows, as soon as it
    /// exists, so callers can render a placeholder before any video is done.
    pub async fn attach_poster(
        &self,
        asset: AssetId,
        profile: &str,
        poster_ref: &str,
        progress_floor: u8,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE derivatives SET poster_ref = ?1, progress = MAX(progress, ?2), updated_at = ?3 \
             WHERE source_asset_id = ?4 AND profile = ?5 AND kind IN ('mp4', 'webm')",
        )
        .bind(poster_ref)
        .bind(i64::from(progress_floor))
        .bind(Utc::now())
        .bind(asset.as_i64())
        .bind(profile)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a completed rendition: output published, state Ready,
    /// progress 100, error cleared.
    pub async fn mark_ready(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
        output_ref: &str,
        source_etag: &str,
    ) -> LedgerResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE derivatives SET \
                 state = 'ready', progress = 100, output_ref = ?1, source_etag = ?2, \
                 error = '', finished_at = ?3, updated_at = ?3 \
             WHERE source_asset_id = ?4 AND profile = ?5 AND kind = ?6",
        )
        .bind(output_ref)
        .bind(source_etag)
        .bind(now)
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one rendition's failure without touching its sibling.
    pub async fn mark_failed(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
        error: &str,
    ) -> LedgerResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE derivatives SET \
                 state = 'failed', progress = 0, error = ?1, finished_at = ?2, updated_at = ?2 \
             WHERE source_asset_id = ?3 AND profile = ?4 AND kind = ?5",
        )
        .bind(truncate_error(error))
        .bind(now)
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force every rendition row of the job to Failed (job-level failure).
    pub async fn fail_all(&self, asset: AssetId, profile: &str, error: &str) -> LedgerResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE derivatives SET \
                 state = 'failed', progress = 0, error = ?1, finished_at = ?2, updated_at = ?2 \
             WHERE source_asset_id = ?3 AND profile = ?4 AND kind IN ('mp4', 'webm')",
        )
        .bind(truncate_error(error))
        .bind(now)
        .bind(asset.as_i64())
        .bind(profile)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether the given rendition has already been produced.
    pub async fn ready_exists(
        &self,
        asset: AssetId,
        profile: &str,
        kind: DerivativeKind,
    ) -> LedgerResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM derivatives \
             WHERE source_asset_id = ?1 AND profile = ?2 AND kind = ?3 AND state = 'ready')",
        )
        .bind(asset.as_i64())
        .bind(profile)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count != 0)
    }

    /// Whether any row of (asset, profile) is claimable (Pending or Failed).
    pub async fn needs_work(&self, asset: AssetId, profile: &str) -> LedgerResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM derivatives \
             WHERE source_asset_id = ?1 AND profile = ?2 AND state IN ('pending', 'failed'))",
        )
        .bind(asset.as_i64())
        .bind(profile)
        .fetch_one(&self.pool)
        .await?;
        Ok(count != 0)
    }
}

/// Clamp error text to what the column is sized for.
fn truncate_error(error: &str) -> String {
    error.chars().take(ERROR_TEXT_MAX).collect()
}

fn record_from_row(row: &SqliteRow) -> LedgerResult<DerivativeRecord> {
    let kind_raw: String = row.get("kind");
    let state_raw: String = row.get("state");

    let kind = DerivativeKind::from_str_opt(&kind_raw)
        .ok_or_else(|| LedgerError::corrupt(format!("unknown kind {kind_raw:?}")))?;
    let state = DerivativeState::from_str_opt(&state_raw)
        .ok_or_else(|| LedgerError::corrupt(format!("unknown state {state_raw:?}")))?;

    Ok(DerivativeRecord {
        id: row.get("id"),
        source_asset_id: AssetId(row.get::<i64, _>("source_asset_id")),
        profile: row.get("profile"),
        kind,
        state,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        output_ref: row.get("output_ref"),
        poster_ref: row.get("poster_ref"),
        owning_job_id: row.get("owning_job_id"),
        source_etag: row.get("source_etag"),
        error: row.get("error"),
        started_at: row.get::<Option<DateTime<Utc>>, _>("started_at"),
        finished_at: row.get::<Option<DateTime<Utc>>, _>("finished_at"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}
