//! Shared PostgreSQL fixture for integration tests
//!
//! One Postgres 16 container per test binary; each test gets its own
//! database, dropped when the handle goes out of scope.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use library_server_infrastructure::{PostgresOutboxRepository, PostgresUnitOfWork};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedPostgres {
    _container: ContainerAsync<Postgres>,
    admin_url: String,
    host: String,
    port: u16,
}

static POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

pub struct TestDatabase {
    pub url: String,
    db_name: String,
    admin_url: String,
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let db_name = self.db_name.clone();
        let admin_url = self.admin_url.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        handle.spawn(async move {
            let Ok(mut conn) = PgConnection::connect(&admin_url).await else {
                return;
            };
            let _ = sqlx::query(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
            )
            .bind(&db_name)
            .execute(&mut conn)
            .await;
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS {}", db_name))
                .execute(&mut conn)
                .await;
        });
    }
}

async fn shared_postgres() -> &'static SharedPostgres {
    POSTGRES
        .get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("16-alpine")
                .start()
                .await
                .expect("Failed to start Postgres container");

            let host = container
                .get_host()
                .await
                .expect("Failed to get host")
                .to_string();
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            SharedPostgres {
                _container: container,
                admin_url: format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
                host,
                port,
            }
        })
        .await
}

pub async fn test_database() -> TestDatabase {
    let shared = shared_postgres().await;
    let db_name = format!("library_{}", Uuid::new_v4().simple());

    let mut conn = PgConnection::connect(&shared.admin_url)
        .await
        .expect("Failed to connect to admin database");
    sqlx::query(&format!("CREATE DATABASE {}", db_name))
        .execute(&mut conn)
        .await
        .expect("Failed to create test database");

    TestDatabase {
        url: format!(
            "postgres://postgres:postgres@{}:{}/{}",
            shared.host, shared.port, db_name
        ),
        db_name,
        admin_url: shared.admin_url.clone(),
    }
}

/// A migrated database with the outbox adapters wired over one pool
pub struct OutboxFixture {
    pub db: TestDatabase,
    pub pool: PgPool,
    pub outbox: Arc<PostgresOutboxRepository>,
    pub unit_of_work: Arc<PostgresUnitOfWork>,
}

pub async fn outbox_fixture() -> OutboxFixture {
    let db = test_database().await;
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&db.url)
        .await
        .expect("Failed to connect to test database");

    let outbox = Arc::new(PostgresOutboxRepository::new(pool.clone()));
    outbox.run_migrations().await.expect("Failed to migrate");

    OutboxFixture {
        unit_of_work: Arc::new(PostgresUnitOfWork::new(pool.clone())),
        outbox,
        pool,
        db,
    }
}
