use anyhow::Context;
use evlog::meta;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::runtime::get_logger;

pub struct DBClient {
    pool: PgPool,
}

impl DBClient {
    pub async fn new(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to apply database migrations")?;

        get_logger().info("Connected to database.", meta! {
            "MaxConnections" => max_connections,
        });

        Ok(Self { pool })
    }

    pub fn conn(&self) -> &PgPool {
        &self.pool
    }
}
