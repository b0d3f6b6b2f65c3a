//! Database connection setup.

use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;

use crate::Result;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Where the job store lives and how to sign in to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// `mem://`, `ws://host:port`, `rocksdb://path` or `surrealkv://path`.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root `(username, password)`; no sign-in when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::new("mem://")
    }
}

impl DbConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: "queuectl".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }

    /// A private in-process store. Each connection gets its own.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Open a connection and select the configured namespace and database.
///
/// Every call opens an independent client, so separate processes never
/// share in-memory state; they only meet at the store.
pub async fn connect(config: &DbConfig) -> Result<Database> {
    tracing::debug!(endpoint = %config.endpoint, "connecting to database");

    let db = connect_any(config.endpoint.as_str()).await?;

    if let Some((username, password)) = &config.credentials {
        db.signin(Root {
            username: username.as_str(),
            password: password.as_str(),
        })
        .await?;
    }

    db.use_ns(config.namespace.as_str())
        .use_db(config.database.as_str())
        .await?;

    tracing::debug!(
        namespace = %config.namespace,
        database = %config.database,
        "connected to database"
    );

    Ok(db)
}
