//! SQLite-backed stores.
//!
//! One [`SqliteStore`] implements all three read/write seams the engine
//! consumes: the pool directory, the pledge store, and the pricing source.
//! The database file is shared with the surrounding product's CRUD surface,
//! which owns pools and pricing settings; this daemon only reads those and
//! writes pledges.
//!
//! # Duplicate enforcement
//!
//! The pipeline's pre-insert lookup is a fast path with a race window under
//! concurrent identical submissions. The authoritative guarantee is the
//! partial unique index over `(pool_id, email_lower)` for non-withdrawn
//! pledges: whichever concurrent insert loses gets a constraint violation,
//! which is mapped to [`InsertError::DuplicateEmail`] and reported as the
//! same duplicate error the fast path produces.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use cargopool_core::intake::{InsertError, PledgeStore, PoolDirectory, StoreError};
use cargopool_core::pledge::{AdminPledgeUpdate, NewPledge, Pledge, PledgeId, PledgeStatus};
use cargopool_core::pool::{PoolStatus, PoolSummary};
use cargopool_core::pricing::{PricingConfig, PricingSource};
use cargopool_core::quote::{BoxCode, CargoDescription, CargoSpec, EstimateCategory, Pickup, Quote};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::error;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pools (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'collecting',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS admin_settings (
    id                        INTEGER PRIMARY KEY CHECK (id = 1),
    rate_per_in3              REAL NOT NULL,
    in_zone_stop_fee          REAL NOT NULL,
    out_of_zone_base_fee      REAL NOT NULL,
    out_of_zone_per_item_fee  REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS pledges (
    id                 TEXT PRIMARY KEY,
    pool_id            TEXT NOT NULL REFERENCES pools(id),
    user_email         TEXT NOT NULL,
    email_lower        TEXT NOT NULL,
    user_name          TEXT NOT NULL,
    user_phone         TEXT,
    pickup_zone        TEXT NOT NULL,
    pickup_city        TEXT,
    cargo_mode         TEXT NOT NULL,
    standard_box_code  TEXT,
    length_in          REAL,
    width_in           REAL,
    height_in          REAL,
    estimate_category  TEXT,
    quantity           INTEGER NOT NULL,
    weight_lb          REAL,
    computed_in3       REAL NOT NULL,
    computed_ft3       REAL NOT NULL,
    est_shipping_cost  REAL NOT NULL,
    est_pickup_fee     REAL NOT NULL,
    est_surcharge      REAL NOT NULL DEFAULT 0,
    est_total          REAL NOT NULL,
    is_internal_cargo  INTEGER NOT NULL DEFAULT 0,
    notes              TEXT,
    status             TEXT NOT NULL DEFAULT 'pledged',
    created_at         TEXT NOT NULL
);

-- One active pledge per (pool, normalized email). Withdrawn pledges fall
-- out of the index so the email can pledge again.
CREATE UNIQUE INDEX IF NOT EXISTS idx_pledges_active_email
    ON pledges(pool_id, email_lower) WHERE status != 'withdrawn';

CREATE INDEX IF NOT EXISTS idx_pledges_pool ON pledges(pool_id);
";

/// SQLite store behind a single connection.
///
/// Queries are short single-row operations; a coarse mutex over the
/// connection is enough at this service's write rate.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and if necessary creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or the schema cannot
    /// be initialized.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database. Test use.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or updates a pool row. The pool surface normally owns these;
    /// this is here for deployments where the daemon seeds its own database,
    /// and for tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn upsert_pool(
        &self,
        id: Uuid,
        title: &str,
        status: PoolStatus,
    ) -> Result<(), StoreError> {
        self.lock()
            .execute(
                "INSERT INTO pools (id, title, status, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET title = ?2, status = ?3",
                params![
                    id.to_string(),
                    title,
                    status.as_tag(),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Writes the pricing settings row.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn set_pricing(&self, cfg: &PricingConfig) -> Result<(), StoreError> {
        self.lock()
            .execute(
                "INSERT INTO admin_settings
                     (id, rate_per_in3, in_zone_stop_fee, out_of_zone_base_fee,
                      out_of_zone_per_item_fee)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     rate_per_in3 = ?1,
                     in_zone_stop_fee = ?2,
                     out_of_zone_base_fee = ?3,
                     out_of_zone_per_item_fee = ?4",
                params![
                    cfg.rate_per_in3,
                    cfg.in_zone_stop_fee,
                    cfg.out_of_zone_base_fee,
                    cfg.out_of_zone_per_item_fee
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Reads one pledge back in full, raw fields and persisted quote alike.
    ///
    /// # Errors
    ///
    /// Returns an error when the read fails or the row is corrupt.
    pub fn fetch_pledge(&self, id: PledgeId) -> Result<Option<Pledge>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, pool_id, user_email, user_name, user_phone,
                        pickup_zone, pickup_city, cargo_mode, standard_box_code,
                        length_in, width_in, height_in, estimate_category,
                        quantity, weight_lb, computed_in3, computed_ft3,
                        est_shipping_cost, est_pickup_fee, est_surcharge,
                        est_total, is_internal_cargo, notes, status, created_at
                 FROM pledges WHERE id = ?1",
                params![id.to_string()],
                row_to_pledge,
            )
            .optional()
            .map_err(db_err)?;
        row.transpose()
    }
}

type PledgeRowResult = Result<Pledge, StoreError>;

#[allow(clippy::too_many_lines)]
fn row_to_pledge(row: &rusqlite::Row<'_>) -> rusqlite::Result<PledgeRowResult> {
    // Column decoding errors abort the query via rusqlite; semantic decoding
    // errors (bad tags, bad UUIDs) surface as StoreError.
    let id: String = row.get(0)?;
    let pool_id: String = row.get(1)?;
    let email: String = row.get(2)?;
    let name: String = row.get(3)?;
    let phone: Option<String> = row.get(4)?;
    let pickup_zone: String = row.get(5)?;
    let pickup_city: Option<String> = row.get(6)?;
    let cargo_mode: String = row.get(7)?;
    let box_code: Option<String> = row.get(8)?;
    let length_in: Option<f64> = row.get(9)?;
    let width_in: Option<f64> = row.get(10)?;
    let height_in: Option<f64> = row.get(11)?;
    let estimate_category: Option<String> = row.get(12)?;
    let quantity: i64 = row.get(13)?;
    let weight_lb: Option<f64> = row.get(14)?;
    let volume_in3: f64 = row.get(15)?;
    let volume_ft3: f64 = row.get(16)?;
    let shipping_cost: f64 = row.get(17)?;
    let pickup_fee: f64 = row.get(18)?;
    let surcharge: f64 = row.get(19)?;
    let total: f64 = row.get(20)?;
    let is_internal_cargo: bool = row.get(21)?;
    let notes: Option<String> = row.get(22)?;
    let status: String = row.get(23)?;
    let created_at: String = row.get(24)?;

    Ok(decode_pledge(DecodedRow {
        id,
        pool_id,
        email,
        name,
        phone,
        pickup_zone,
        pickup_city,
        cargo_mode,
        box_code,
        length_in,
        width_in,
        height_in,
        estimate_category,
        quantity,
        weight_lb,
        quote: Quote {
            volume_in3,
            volume_ft3,
            shipping_cost,
            pickup_fee,
            surcharge,
            total,
        },
        is_internal_cargo,
        notes,
        status,
        created_at,
    }))
}

struct DecodedRow {
    id: String,
    pool_id: String,
    email: String,
    name: String,
    phone: Option<String>,
    pickup_zone: String,
    pickup_city: Option<String>,
    cargo_mode: String,
    box_code: Option<String>,
    length_in: Option<f64>,
    width_in: Option<f64>,
    height_in: Option<f64>,
    estimate_category: Option<String>,
    quantity: i64,
    weight_lb: Option<f64>,
    quote: Quote,
    is_internal_cargo: bool,
    notes: Option<String>,
    status: String,
    created_at: String,
}

fn decode_pledge(row: DecodedRow) -> PledgeRowResult {
    let corrupt = |what: &str| StoreError::new(format!("corrupt pledge row: {what}"));

    let spec = match row.cargo_mode.as_str() {
        "standard_box" => CargoSpec::StandardBox {
            code: row
                .box_code
                .as_deref()
                .and_then(BoxCode::from_tag)
                .ok_or_else(|| corrupt("box code"))?,
        },
        "custom_dims" => CargoSpec::CustomDims {
            length_in: row.length_in.ok_or_else(|| corrupt("length"))?,
            width_in: row.width_in.ok_or_else(|| corrupt("width"))?,
            height_in: row.height_in.ok_or_else(|| corrupt("height"))?,
        },
        "estimate" => CargoSpec::Estimate {
            category: row
                .estimate_category
                .as_deref()
                .and_then(EstimateCategory::from_tag)
                .ok_or_else(|| corrupt("estimate category"))?,
        },
        _ => return Err(corrupt("cargo mode")),
    };

    let pickup = match row.pickup_zone.as_str() {
        "in_zone" => Pickup::InZone,
        "out_of_zone" => Pickup::OutOfZone {
            city: row.pickup_city,
        },
        _ => return Err(corrupt("pickup zone")),
    };

    Ok(Pledge {
        id: PledgeId(Uuid::parse_str(&row.id).map_err(|_| corrupt("id"))?),
        pool_id: Uuid::parse_str(&row.pool_id).map_err(|_| corrupt("pool id"))?,
        email: row.email,
        name: row.name,
        phone: row.phone,
        cargo: CargoDescription {
            spec,
            quantity: u32::try_from(row.quantity).map_err(|_| corrupt("quantity"))?,
        },
        pickup,
        weight_lb: row.weight_lb,
        quote: row.quote,
        is_internal_cargo: row.is_internal_cargo,
        notes: row.notes,
        status: PledgeStatus::from_tag(&row.status).ok_or_else(|| corrupt("status"))?,
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|_| corrupt("timestamp"))?
            .with_timezone(&Utc),
    })
}

fn db_err(err: rusqlite::Error) -> StoreError {
    error!(error = %err, "sqlite operation failed");
    StoreError::new(err.to_string())
}

fn map_insert_err(err: rusqlite::Error) -> InsertError {
    if let rusqlite::Error::SqliteFailure(code, Some(ref message)) = err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation
            && (message.contains("idx_pledges_active_email") || message.contains("email_lower"))
        {
            return InsertError::DuplicateEmail;
        }
    }
    InsertError::Storage(db_err(err))
}

#[async_trait]
impl PoolDirectory for SqliteStore {
    async fn pool_summary(&self, id: Uuid) -> Result<Option<PoolSummary>, StoreError> {
        let conn = self.lock();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, status, title FROM pools WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(id, status, title)| {
            Ok(PoolSummary {
                id: Uuid::parse_str(&id)
                    .map_err(|_| StoreError::new("corrupt pool row: id"))?,
                status: PoolStatus::from_tag(&status)
                    .ok_or_else(|| StoreError::new("corrupt pool row: status"))?,
                title,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl PledgeStore for SqliteStore {
    async fn find_active_by_email(
        &self,
        pool_id: Uuid,
        email_lower: &str,
    ) -> Result<Option<PledgeId>, StoreError> {
        let conn = self.lock();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM pledges
                 WHERE pool_id = ?1 AND email_lower = ?2 AND status != 'withdrawn'
                 LIMIT 1",
                params![pool_id.to_string(), email_lower],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        id.map(|id| {
            Uuid::parse_str(&id)
                .map(PledgeId)
                .map_err(|_| StoreError::new("corrupt pledge row: id"))
        })
        .transpose()
    }

    async fn insert(&self, pledge: NewPledge) -> Result<PledgeId, InsertError> {
        let id = PledgeId::generate();
        let (box_code, length_in, width_in, height_in, estimate_category) =
            match &pledge.cargo.spec {
                CargoSpec::StandardBox { code } => (Some(code.as_tag()), None, None, None, None),
                CargoSpec::CustomDims {
                    length_in,
                    width_in,
                    height_in,
                } => (None, Some(*length_in), Some(*width_in), Some(*height_in), None),
                CargoSpec::Estimate { category } => {
                    (None, None, None, None, Some(category.as_tag()))
                },
            };
        let pickup_city = match &pledge.pickup {
            Pickup::InZone => None,
            Pickup::OutOfZone { city } => city.clone(),
        };

        self.lock()
            .execute(
                "INSERT INTO pledges
                     (id, pool_id, user_email, email_lower, user_name, user_phone,
                      pickup_zone, pickup_city, cargo_mode, standard_box_code,
                      length_in, width_in, height_in, estimate_category, quantity,
                      weight_lb, computed_in3, computed_ft3, est_shipping_cost,
                      est_pickup_fee, est_surcharge, est_total, notes, status,
                      created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23,
                         'pledged', ?24)",
                params![
                    id.to_string(),
                    pledge.pool_id.to_string(),
                    pledge.email,
                    pledge.email.to_lowercase(),
                    pledge.name,
                    pledge.phone,
                    pledge.pickup.zone_tag(),
                    pickup_city,
                    cargo_mode_tag(&pledge.cargo.spec),
                    box_code,
                    length_in,
                    width_in,
                    height_in,
                    estimate_category,
                    i64::from(pledge.cargo.quantity),
                    pledge.weight_lb,
                    pledge.quote.volume_in3,
                    pledge.quote.volume_ft3,
                    pledge.quote.shipping_cost,
                    pledge.quote.pickup_fee,
                    pledge.quote.surcharge,
                    pledge.quote.total,
                    pledge.notes,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_insert_err)?;
        Ok(id)
    }

    async fn pledge_status(&self, id: PledgeId) -> Result<Option<PledgeStatus>, StoreError> {
        let conn = self.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM pledges WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        status
            .map(|tag| {
                PledgeStatus::from_tag(&tag)
                    .ok_or_else(|| StoreError::new("corrupt pledge row: status"))
            })
            .transpose()
    }

    async fn apply_admin_update(
        &self,
        id: PledgeId,
        update: &AdminPledgeUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = match (update.status, update.is_internal_cargo) {
            (Some(status), Some(flag)) => conn
                .execute(
                    "UPDATE pledges SET status = ?1, is_internal_cargo = ?2 WHERE id = ?3",
                    params![status.as_tag(), flag, id.to_string()],
                )
                .map_err(db_err)?,
            (Some(status), None) => conn
                .execute(
                    "UPDATE pledges SET status = ?1 WHERE id = ?2",
                    params![status.as_tag(), id.to_string()],
                )
                .map_err(db_err)?,
            (None, Some(flag)) => conn
                .execute(
                    "UPDATE pledges SET is_internal_cargo = ?1 WHERE id = ?2",
                    params![flag, id.to_string()],
                )
                .map_err(db_err)?,
            (None, None) => 0,
        };
        if changed == 0 && !update.is_empty() {
            return Err(StoreError::new("pledge vanished during update"));
        }
        Ok(())
    }
}

impl PricingSource for SqliteStore {
    fn load(&self) -> Option<PricingConfig> {
        let conn = self.lock();
        let result = conn
            .query_row(
                "SELECT rate_per_in3, in_zone_stop_fee, out_of_zone_base_fee,
                        out_of_zone_per_item_fee
                 FROM admin_settings WHERE id = 1",
                [],
                |row| {
                    Ok(PricingConfig {
                        rate_per_in3: row.get(0)?,
                        in_zone_stop_fee: row.get(1)?,
                        out_of_zone_base_fee: row.get(2)?,
                        out_of_zone_per_item_fee: row.get(3)?,
                    })
                },
            )
            .optional();
        match result {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "pricing settings unreadable, using defaults");
                None
            },
        }
    }
}

const fn cargo_mode_tag(spec: &CargoSpec) -> &'static str {
    match spec {
        CargoSpec::StandardBox { .. } => "standard_box",
        CargoSpec::CustomDims { .. } => "custom_dims",
        CargoSpec::Estimate { .. } => "estimate",
    }
}
