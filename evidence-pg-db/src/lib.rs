// Copyright (c) EvidenceChain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pooled async Postgres access for the evidence mirror.
//!
//! [`Db`] wraps a bb8 pool of `diesel-async` connections. Instances can be
//! cloned cheaply to share access to the same pool across tasks.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use url::Url;

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    /// Number of connections to keep in the pool.
    #[arg(long, default_value_t = Self::default().db_connection_pool_size)]
    pub db_connection_pool_size: u32,

    /// Time spent waiting for a connection from the pool to become available,
    /// in milliseconds.
    #[arg(long, default_value_t = Self::default().db_connection_timeout_ms)]
    pub db_connection_timeout_ms: u64,
}

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout_ms)
    }
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_connection_pool_size: 20,
            db_connection_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
}

/// Wrapper over the pooled connection so callers don't depend on bb8 types.
pub struct Connection<'a>(PooledConnection<'a, AsyncPgConnection>);

impl Db {
    /// Construct a new connection pool talking to the database at
    /// `database_url`.
    pub async fn new(database_url: Url, args: DbArgs) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::new(database_url.as_str());
        let pool = Pool::builder()
            .max_size(args.db_connection_pool_size)
            .connection_timeout(args.connection_timeout())
            .build(manager)
            .await?;
        Ok(Self { pool })
    }

    /// Retrieves a connection from the pool. Fails with a timeout if a
    /// connection cannot be established before [`DbArgs::connection_timeout`]
    /// has elapsed.
    pub async fn connect(&self) -> anyhow::Result<Connection<'_>> {
        Ok(Connection(self.pool.get().await?))
    }

    /// Statistics about the connection pool.
    pub fn state(&self) -> bb8::State {
        self.pool.state()
    }
}

impl<'a> Deref for Connection<'a> {
    type Target = PooledConnection<'a, AsyncPgConnection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Connection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
