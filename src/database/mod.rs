//! Database connection and management module
//!
//! This module provides connection management, pooling, schema
//! bootstrap and constructors for the lifecycle services.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

pub mod batch_service;
pub mod equipment_status;
pub mod image_reference;
pub mod inspection_service;
pub mod issue_service;

// Re-export the services for convenience
pub use batch_service::BatchInspectionCoordinator;
pub use image_reference::ImageReferenceTracker;
pub use inspection_service::InspectionRecordManager;
pub use issue_service::IssueLifecycleManager;

/// Idempotent schema bootstrap.
///
/// Image urls live in a single child table keyed by owner, so checking
/// whether a file is still referenced is one indexed count instead of a
/// token search through serialized arrays. The legacy single-url
/// columns are kept and mirror the first image of each set.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS equipment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    factory_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'NORMAL'
        CHECK (status IN ('NORMAL', 'ABNORMAL', 'SCRAPPED')),
    last_inspected_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inspection_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    equipment_id INTEGER NOT NULL REFERENCES equipment(id),
    inspector_id INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'DRAFT'
        CHECK (state IN ('DRAFT', 'FINALIZED')),
    overall_result TEXT
        CHECK (overall_result IN ('NORMAL', 'ABNORMAL')),
    checklist_results TEXT,
    inspection_image_url TEXT,
    location TEXT,
    issue_id INTEGER,
    created_at TEXT NOT NULL,
    finalized_at TEXT
);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    equipment_id INTEGER NOT NULL REFERENCES equipment(id),
    inspection_id INTEGER,
    reporter_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING', 'IN_PROGRESS', 'PENDING_AUDIT', 'CLOSED', 'REJECTED')),
    handler_id INTEGER,
    handled_at TEXT,
    solution TEXT,
    auditor_id INTEGER,
    audited_at TEXT,
    audit_note TEXT,
    issue_image_url TEXT,
    fixed_image_url TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_type TEXT NOT NULL
        CHECK (owner_type IN ('INSPECTION', 'ISSUE', 'ISSUE_FIXED')),
    owner_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE (owner_type, owner_id, url)
);

CREATE INDEX IF NOT EXISTS idx_images_url ON images(url);
CREATE INDEX IF NOT EXISTS idx_images_owner ON images(owner_type, owner_id);
CREATE INDEX IF NOT EXISTS idx_issues_equipment_status ON issues(equipment_id, status);
CREATE INDEX IF NOT EXISTS idx_inspection_logs_equipment ON inspection_logs(equipment_id);
"#;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub upload_root: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:firesafe.db".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            upload_root: std::env::var("UPLOAD_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
        }
    }
}

/// Apply the schema to a pool. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// Database connection manager
pub struct DatabaseManager {
    pool: SqlitePool,
    upload_root: PathBuf,
}

impl DatabaseManager {
    /// Create a new database manager with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created successfully");

        Ok(Self {
            pool,
            upload_root: config.upload_root,
        })
    }

    /// Create a new database manager with default configuration
    pub async fn with_default_config() -> Result<Self, sqlx::Error> {
        Self::new(DatabaseConfig::default()).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the schema
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        info!("Applying database schema");
        run_migrations(&self.pool).await
    }

    /// Create an image reference tracker using this connection
    pub fn image_reference_tracker(&self) -> ImageReferenceTracker {
        ImageReferenceTracker::new(self.pool.clone(), self.upload_root.clone())
    }

    /// Create an inspection record manager using this connection
    pub fn inspection_manager(&self) -> InspectionRecordManager {
        InspectionRecordManager::new(self.pool.clone(), self.image_reference_tracker())
    }

    /// Create an issue lifecycle manager using this connection
    pub fn issue_manager(&self) -> IssueLifecycleManager {
        IssueLifecycleManager::new(self.pool.clone(), self.image_reference_tracker())
    }

    /// Create a batch inspection coordinator using this connection
    pub fn batch_coordinator(&self) -> BatchInspectionCoordinator {
        BatchInspectionCoordinator::new(self.pool.clone())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
    }

    /// Get database connection statistics
    pub fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            size: self.pool.size(),
            num_idle: self.pool.num_idle() as u32,
        }
    }

    /// Close the database connection pool
    pub async fn close(self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

/// Database connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub size: u32,
    pub num_idle: u32,
}

impl std::fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pool size: {}, Idle: {}", self.size, self.num_idle)
    }
}

/// Mask sensitive information in database URL for logging
fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.len() > 20 {
        format!("{}***{}", &url[..10], &url[url.len() - 10..])
    } else {
        url.to_string()
    }
}
