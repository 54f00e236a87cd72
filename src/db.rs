use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection, DatabaseTransaction, DbErr,
    SqlErr, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use std::{fs::OpenOptions, path::Path, sync::Arc};

use crate::{clock::Clock, migration::Migrator, period::Period};

/// Dues charged for a period when its contribution row is generated.
pub const DEFAULT_DUES: Decimal = Decimal::from_parts(30000, 0, 0, false, 0);

/// A rejected input field and the message to show next to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Connections kept for a file database. Writers queue on SQLite's busy timeout.
const FILE_POOL_CONNECTIONS: u32 = 4;

/// Largest amount a `Decimal(15, 2)` column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(2_764_472_319, 232_830, 0, false, 2);

/// Amounts are non-negative, fit the amount columns and have at most two decimal places.
pub(crate) fn check_amount(amount: Decimal) -> Result<(), Error> {
    if amount < Decimal::ZERO {
        return Err(Error::invalid("amount", "Amount must be at least 0."));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::invalid(
            "amount",
            "Amount cannot exceed 9999999999999.99.",
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(Error::invalid(
            "amount",
            "Amount cannot have more than 2 decimal places.",
        ));
    }
    Ok(())
}

#[derive(Debug)]
pub enum Error {
    Database(DbErr),
    File(std::io::Error),
    NotFound { entity: &'static str, id: i64 },
    Validation(Vec<FieldError>),
    Duplicate(String),
    InvalidState(String),
}

impl Error {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Database(ref err) => {
                write!(f, "Database error: {}", err)
            }
            Self::File(ref err) => write!(f, "File error: {}", err),
            Self::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            Self::Validation(ref fields) => {
                write!(f, "Validation failed: ")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", field.field, field.message)?;
                }
                Ok(())
            }
            Self::Duplicate(ref detail) => write!(f, "Duplicate record: {}", detail),
            Self::InvalidState(ref detail) => write!(f, "Invalid state: {}", detail),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Self::Database(ref err) => Some(err),
            Self::File(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => Self::Duplicate(detail),
            _ => Self::Database(err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::File(err)
    }
}

async fn get_db_pool(db_path: &Path) -> Result<DatabaseConnection, Error> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(db_path)?;
    let db_str = format!("sqlite:{}", db_path.display());
    connect_pool(&db_str).await
}

async fn connect_pool(url: &str) -> Result<DatabaseConnection, Error> {
    let mut options = ConnectOptions::new(url.to_owned());
    // Every pooled connection to `:memory:` would get its own empty database.
    if url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    } else {
        options.max_connections(FILE_POOL_CONNECTIONS);
    }
    Ok(SeaOrmDatabase::connect(options).await?)
}

/// Shared handle to the store. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub async fn new(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        get_db_pool(db_path)
            .await
            .map(|pool| Self { pool, clock })
    }

    /// Connects to a database URL such as `sqlite::memory:`.
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        connect_pool(url).await.map(|pool| Self { pool, clock })
    }

    pub async fn apply_migrations(&self) -> Result<(), Error> {
        Ok(Migrator::up(&self.pool, None).await?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn current_period(&self) -> Period {
        Period::containing(&self.now())
    }

    pub(crate) async fn begin(&self) -> Result<DatabaseTransaction, Error> {
        Ok(self.pool.begin().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::TimeZone;

    use super::*;
    use crate::{clock::FixedClock, entity::user};

    /// 2024-03-15 12:00 UTC.
    pub fn march_2024() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap(),
        ))
    }

    pub async fn fresh_db() -> Database {
        let db = Database::connect("sqlite::memory:", march_2024())
            .await
            .unwrap();
        db.apply_migrations().await.unwrap();
        db
    }

    pub async fn admin(db: &Database) -> user::Model {
        db.create_user("Admin User", "admin@example.com", user::Role::Admin)
            .await
            .unwrap()
    }
}
