use std::sync::Once;

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Executor};
use tracing::info;

use magpie_core::config::DatabaseConfig;

use crate::error::StoreError;
use crate::schema;

static INSTALL_DRIVERS: Once = Once::new();

/// Which SQL flavor the pool speaks. Determines placeholder syntax and the
/// per-connection session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    fn from_url(url: &str) -> Result<Self, StoreError> {
        if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Dialect::Postgres)
        } else {
            Err(StoreError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// Shared database handle: one pool plus the dialect needed to prepare SQL.
#[derive(Debug, Clone)]
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
}

impl Db {
    /// Connect using the configured profile and bootstrap the schema.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let dialect = Dialect::from_url(&cfg.url)?;
        let url = match dialect {
            // Create the database file on first run.
            Dialect::Sqlite if !cfg.url.contains(":memory:") && !cfg.url.contains("mode=") => {
                format!("{}?mode=rwc", cfg.url)
            }
            _ => cfg.url.clone(),
        };

        let max_connections = match dialect {
            // A shared in-memory database only exists on one connection.
            Dialect::Sqlite if url.contains(":memory:") => 1,
            Dialect::Sqlite => cfg.max_connections,
            Dialect::Postgres => cfg.max_connections + cfg.overflow,
        };

        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let app_name = cfg.application_name.replace('\'', "");
        let options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .test_before_acquire(matches!(dialect, Dialect::Postgres))
            .after_connect(move |conn, _meta| {
                let app_name = app_name.clone();
                Box::pin(async move {
                    match dialect {
                        Dialect::Sqlite => {
                            conn.execute("PRAGMA journal_mode=WAL").await?;
                            conn.execute("PRAGMA synchronous=NORMAL").await?;
                            conn.execute("PRAGMA foreign_keys=ON").await?;
                            // 64 MB page cache (negative value = KiB).
                            conn.execute("PRAGMA cache_size=-65536").await?;
                        }
                        Dialect::Postgres => {
                            conn.execute(
                                format!("SET application_name = '{}'", app_name).as_str(),
                            )
                            .await?;
                            conn.execute(
                                "SET default_transaction_isolation = 'read committed'",
                            )
                            .await?;
                        }
                    }
                    Ok(())
                })
            });

        let pool = options.connect(&url).await?;
        info!(dialect = ?dialect, "database connected");

        let db = Self { pool, dialect };
        schema::migrate(&db).await?;
        Ok(db)
    }

    /// An in-memory SQLite handle, for tests and throwaway runs.
    pub async fn memory() -> Result<Self, StoreError> {
        let cfg = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            overflow: 0,
            application_name: "magpie-test".to_string(),
        };
        Self::connect(&cfg).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Prepare a query template for the active dialect.
    ///
    /// Templates are written with `?` placeholders; Postgres needs them
    /// rewritten to `$1..$n`. None of our SQL contains a literal `?`.
    pub fn sql(&self, template: &str) -> String {
        match self.dialect {
            Dialect::Sqlite => template.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(template.len() + 8);
                let mut n = 0u32;
                for ch in template.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }
}

/// Build an `IN (?, ?, ...)` fragment with one placeholder per element.
pub(crate) fn placeholders(count: usize) -> String {
    let mut s = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}
