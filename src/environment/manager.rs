//! Unit-of-work execution with serialization-conflict retry.

use super::{Cursor, Environment};
use crate::adapter::DbAdapter;
use crate::config::EnvironmentConfig;
use crate::error::OrmError;
use crate::executor::{Database, DbError};
use crate::schema::Registry;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Opens one [`Environment`] per attempt of a unit of work.
///
/// Cheap to clone; clones share the database, adapter and registry. Units of
/// work may run concurrently from different coroutines as long as the
/// [`Database`] gives each transaction its own session, as
/// [`PgPool`](crate::pool::PgPool) does.
///
/// ```no_run
/// use berth::adapter::PostgresAdapter;
/// use berth::config::DatabaseConfig;
/// use berth::environment::EnvironmentManager;
/// use berth::pool::PgPool;
/// use berth::query::Query;
/// use berth::schema::{ModelDescriptor, Registry};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPool::new(&DatabaseConfig::load()?)?;
/// let registry = Registry::builder().model(ModelDescriptor::new("Person")).build()?;
/// let manager = EnvironmentManager::new(
///     Arc::new(pool),
///     Arc::new(PostgresAdapter::new()),
///     Arc::new(registry),
/// );
/// let ids = manager.run_unit_of_work(1, |env| env.search(&Query::new("Person")))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EnvironmentManager {
    database: Arc<dyn Database>,
    adapter: Arc<dyn DbAdapter>,
    registry: Arc<Registry>,
    config: EnvironmentConfig,
}

impl EnvironmentManager {
    pub fn new(database: Arc<dyn Database>, adapter: Arc<dyn DbAdapter>, registry: Arc<Registry>) -> Self {
        Self {
            database,
            adapter,
            registry,
            config: EnvironmentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EnvironmentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run `f` in a fresh environment and commit its work.
    ///
    /// `f` is re-run from scratch in a new transaction when the attempt fails
    /// with a serialization conflict, up to `max_attempts` times in total.
    /// `f` must therefore be a pure function of its inputs and the database.
    ///
    /// # Errors
    ///
    /// - `OrmError::Conflict` when every attempt hit a conflict
    /// - `OrmError::Constraint` for any other database error
    /// - whatever `f` returned otherwise; no error path commits anything
    pub fn run_unit_of_work<T, F>(&self, uid: i64, f: F) -> Result<T, OrmError>
    where
        F: FnMut(&Environment) -> Result<T, OrmError>,
    {
        self.execute(uid, Map::new(), false, f)
    }

    pub fn run_unit_of_work_with_context<T, F>(
        &self,
        uid: i64,
        context: Map<String, JsonValue>,
        f: F,
    ) -> Result<T, OrmError>
    where
        F: FnMut(&Environment) -> Result<T, OrmError>,
    {
        self.execute(uid, context, false, f)
    }

    /// Like [`run_unit_of_work`](Self::run_unit_of_work) but always rolls
    /// back, also on success.
    pub fn simulate_unit_of_work<T, F>(&self, uid: i64, f: F) -> Result<T, OrmError>
    where
        F: FnMut(&Environment) -> Result<T, OrmError>,
    {
        self.execute(uid, Map::new(), true, f)
    }

    fn execute<T, F>(
        &self,
        uid: i64,
        context: Map<String, JsonValue>,
        simulate: bool,
        mut f: F,
    ) -> Result<T, OrmError>
    where
        F: FnMut(&Environment) -> Result<T, OrmError>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::unit_of_work_span(uid, attempt, simulate).entered();

            let err = match self.attempt(uid, context.clone(), simulate, &mut f) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_conflict(self.adapter.as_ref()) {
                #[cfg(feature = "metrics")]
                METRICS.record_unit_of_work("rolled_back");
                return Err(classify(err));
            }
            let source = err
                .db_error()
                .cloned()
                .unwrap_or_else(|| DbError::Other(err.to_string()));
            if attempt >= max_attempts {
                log::error!(
                    "unit of work for uid {} gave up after {} conflicting attempts: {}",
                    uid,
                    attempt,
                    source
                );
                #[cfg(feature = "metrics")]
                METRICS.record_unit_of_work("rolled_back");
                return Err(OrmError::Conflict {
                    attempts: attempt,
                    source,
                });
            }
            log::warn!(
                "serialization conflict on attempt {}/{} for uid {}, retrying: {}",
                attempt,
                max_attempts,
                uid,
                source
            );
            #[cfg(feature = "metrics")]
            METRICS.record_retry();
        }
    }

    /// One attempt: open, run, then commit or roll back.
    fn attempt<T, F>(
        &self,
        uid: i64,
        context: Map<String, JsonValue>,
        simulate: bool,
        f: &mut F,
    ) -> Result<T, OrmError>
    where
        F: FnMut(&Environment) -> Result<T, OrmError>,
    {
        let transaction = self
            .database
            .begin(self.config.isolation_level)
            .map_err(OrmError::Transaction)?;
        let env = Environment::new(
            Cursor::new(transaction, Arc::clone(&self.adapter)),
            uid,
            context,
            Arc::clone(&self.registry),
            Arc::clone(&self.adapter),
            self.config,
        );

        // A panic in `f` drops `env`, and with it the open transaction.
        let result = f(&env);
        let cursor = env.into_cursor();
        match result {
            Ok(value) if simulate => {
                cursor.rollback()?;
                #[cfg(feature = "metrics")]
                METRICS.record_unit_of_work("simulated");
                Ok(value)
            }
            Ok(value) => {
                cursor.commit()?;
                log::debug!("unit of work for uid {} committed", uid);
                #[cfg(feature = "metrics")]
                METRICS.record_unit_of_work("committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = cursor.rollback() {
                    log::warn!("rollback after failed unit of work also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

/// Database errors that are not conflicts surface as constraint errors.
fn classify(err: OrmError) -> OrmError {
    match err {
        OrmError::Database(db) => OrmError::Constraint(db),
        other => other,
    }
}
