//! Disposable databases for PostgreSQL-backed tests.
//!
//! `RTC_TEST_DATABASE_URL` names a server the suites may create databases
//! on. Each [`TestDatabase`] owns one uniquely named database that is
//! dropped together with the handle. Without the variable
//! [`start_postgres`] fails and callers skip.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use postgres::{Client, NoTls};
use url::Url;

/// Environment variable naming the test server.
pub const TEST_DATABASE_URL_ENV: &str = "RTC_TEST_DATABASE_URL";

static NEXT_DATABASE: AtomicU32 = AtomicU32::new(0);

/// One scratch database, dropped with the handle.
#[derive(Debug)]
pub struct TestDatabase {
    url: Url,
    admin_url: String,
    name: String,
}

impl TestDatabase {
    /// Create a fresh database on the server at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is malformed or the server refuses the
    /// `CREATE DATABASE`.
    pub fn create(server_url: &str) -> Result<Self> {
        let server = Url::parse(server_url).context("invalid postgres connection url")?;
        let name = scratch_name();

        let mut admin = server.clone();
        admin.set_path("/postgres");
        let admin_url = admin.to_string();
        run_admin(&admin_url, format!("CREATE DATABASE \"{name}\""))?;

        let mut url = server;
        url.set_path(&format!("/{name}"));
        Ok(Self {
            url,
            admin_url,
            name,
        })
    }

    /// Connection string for `sqlx`.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        self.url.as_str()
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let statement = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
        if let Err(err) = run_admin(&self.admin_url, statement) {
            eprintln!("failed to drop test database {}: {err:#}", self.name);
        }
    }
}

/// Create a scratch database on the server named by `RTC_TEST_DATABASE_URL`.
///
/// # Errors
///
/// Returns an error when the variable is unset or the database cannot be
/// created.
pub fn start_postgres() -> Result<TestDatabase> {
    let server = std::env::var(TEST_DATABASE_URL_ENV)
        .with_context(|| format!("{TEST_DATABASE_URL_ENV} is not set"))?;
    TestDatabase::create(&server)
}

// The blocking client owns a runtime, so it runs off the caller's tokio worker.
fn run_admin(admin_url: &str, statement: String) -> Result<()> {
    let admin_url = admin_url.to_string();
    thread::spawn(move || -> Result<()> {
        let mut client =
            Client::connect(&admin_url, NoTls).context("failed to connect to admin database")?;
        client
            .batch_execute(&statement)
            .with_context(|| format!("admin statement failed: {statement}"))
    })
    .join()
    .map_err(|_| anyhow!("admin statement thread panicked"))?
}

fn scratch_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    let sequence = NEXT_DATABASE.fetch_add(1, Ordering::Relaxed);
    format!("rtc_test_{}_{nanos}_{sequence}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_names_are_unique_within_a_process() {
        let first = scratch_name();
        let second = scratch_name();
        assert_ne!(first, second);
        assert!(first.starts_with("rtc_test_"));
    }

    #[test]
    fn malformed_server_url_fails_before_connecting() {
        let err = TestDatabase::create("not a url").unwrap_err();
        assert!(err.to_string().contains("invalid postgres connection url"));
    }
}
