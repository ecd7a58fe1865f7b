use camino::Utf8Path as Path;
use deadpool::managed::HookError;
use deadpool_diesel::{
    sqlite::{Hook, Manager, Pool},
    InteractError,
};
use diesel::connection::SimpleConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use eyre::{eyre, Context, Result};
use tracing::Instrument;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbConn = diesel::SqliteConnection;

/// Pooled sqlite connections. Queries are synchronous and run on the
/// blocking thread pool through [`DbPool::run`].
#[derive(Clone)]
pub struct DbPool {
    pool: Pool,
}

impl DbPool {
    pub fn open(db_path: &Path) -> Result<DbPool> {
        let manager = Manager::new(db_path.as_str(), deadpool_diesel::Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(4)
            .post_create(Hook::sync_fn(|conn, _| {
                let mut conn = conn
                    .lock()
                    .map_err(|_| HookError::StaticMessage("database connection mutex poisoned"))?;
                configure(&mut conn)
                    .map_err(|_| HookError::StaticMessage("error configuring database connection"))
            }))
            .build()
            .wrap_err("error creating database pool")?;
        Ok(DbPool { pool })
    }

    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DbConn) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .wrap_err("could not acquire db connection")?;
        conn.interact(f)
            .in_current_span()
            .await
            .map_err(|err| match err {
                InteractError::Panic(_) => eyre!("database interaction panicked"),
                InteractError::Aborted => eyre!("database interaction was aborted"),
            })?
    }
}

pub fn migrate(conn: &mut DbConn) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| eyre!("error running migrations: {}", err))?;
    Ok(())
}

fn configure(conn: &mut DbConn) -> Result<()> {
    conn.batch_execute("PRAGMA journal_mode = wal; PRAGMA busy_timeout = 5000;")?;
    Ok(())
}

#[cfg(test)]
pub fn open_in_memory_and_migrate() -> DbConn {
    use diesel::Connection;
    let mut conn = DbConn::establish(":memory:").unwrap();
    configure(&mut conn).unwrap();
    migrate(&mut conn).unwrap();
    conn
}
