//! Neo4j backend over the HTTP transactional endpoint.
//!
//! Each statement is sent as a single auto-commit transaction:
//!
//! ```text
//! POST {uri}/db/{database}/tx/commit
//! {"statements": [{"statement": "...", "parameters": {...}}]}
//! ```
//!
//! Responses carry `results[0].columns` and `results[0].data[*].row`, which
//! are zipped into [`Record`]s. Errors whose code starts with
//! `Neo.TransientError` are reported as [`Error::Transient`].

use super::cypher::{GraphStatement, Operation};
use super::{GraphConnection, Record};
use crate::storage::pool::ManageConnection;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const BACKEND: &str = "neo4j";

/// Neo4j connection settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// HTTP base URI, e.g. `http://localhost:7474`.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<SecretString>,
    /// Per-request timeout.
    pub query_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            username: None,
            password: None,
            query_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl GraphConfig {
    /// Creates a config for the given base URI.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Loads the config from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// Reads `LINGSHU_NEO4J_URI`, `LINGSHU_NEO4J_DATABASE`,
    /// `LINGSHU_NEO4J_USER`, `LINGSHU_NEO4J_PASSWORD` and
    /// `LINGSHU_NEO4J_QUERY_TIMEOUT_MS`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("LINGSHU_NEO4J_URI") {
            self.uri = v;
        }
        if let Ok(v) = std::env::var("LINGSHU_NEO4J_DATABASE") {
            self.database = v;
        }
        if let Ok(v) = std::env::var("LINGSHU_NEO4J_USER") {
            self.username = Some(v);
        }
        if let Ok(v) = std::env::var("LINGSHU_NEO4J_PASSWORD") {
            self.password = Some(SecretString::from(v));
        }
        if let Ok(v) = std::env::var("LINGSHU_NEO4J_QUERY_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.query_timeout = Duration::from_millis(parsed);
        }
        self
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Returns the transactional commit endpoint.
    #[must_use]
    pub fn commit_endpoint(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.uri.trim_end_matches('/'),
            self.database
        )
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Connection manager for a Neo4j server.
#[derive(Debug, Clone)]
pub struct Neo4jConnectionManager {
    config: GraphConfig,
    client: reqwest::blocking::Client,
}

impl Neo4jConnectionManager {
    /// Creates a manager with an HTTP client honouring the configured timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the HTTP client cannot be built.
    pub fn new(config: GraphConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.query_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "neo4j_client_build".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    /// Returns the connection settings.
    #[must_use]
    pub const fn config(&self) -> &GraphConfig {
        &self.config
    }
}

impl ManageConnection for Neo4jConnectionManager {
    type Connection = Neo4jConnection;

    fn connect(&self) -> Result<Self::Connection> {
        // HTTP is connectionless at this level; the reqwest client keeps its
        // own keep-alive pool, so a pooled "connection" is a client handle.
        Ok(Neo4jConnection {
            client: self.client.clone(),
            endpoint: self.config.commit_endpoint(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        })
    }

    fn validate(&self, conn: &mut Self::Connection) -> Result<()> {
        conn.execute(&GraphStatement::new(Operation::Ping))
            .map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

/// A handle for sending statements to one Neo4j database.
#[derive(Debug)]
pub struct Neo4jConnection {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<SecretString>,
}

impl GraphConnection for Neo4jConnection {
    fn execute(&mut self, statement: &GraphStatement) -> Result<Vec<Record>> {
        let operation = statement.name();
        let body = json!({
            "statements": [{
                "statement": statement.cypher.text,
                "parameters": statement.cypher.params,
            }]
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(username) = &self.username {
            request = request.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            );
        }

        let response = request.send().map_err(|e| {
            let error_kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connect"
            } else if e.is_request() {
                "request"
            } else {
                "unknown"
            };
            tracing::debug!(
                backend = BACKEND,
                operation,
                error = %e,
                error_kind,
                "Neo4j request failed"
            );
            if e.is_timeout() || e.is_connect() || e.is_request() {
                Error::Connection {
                    backend: BACKEND.to_string(),
                    cause: format!("{error_kind} error: {e}"),
                }
            } else {
                Error::OperationFailed {
                    operation: operation.to_string(),
                    cause: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Transient {
                backend: BACKEND.to_string(),
                cause: format!("server returned status: {status} - {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("server returned status: {status} - {body}"),
            });
        }

        let parsed: TxResponse = response.json().map_err(|e| Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!("invalid response body: {e}"),
        })?;

        decode_response(operation, parsed)
    }
}

fn decode_response(operation: &str, response: TxResponse) -> Result<Vec<Record>> {
    if let Some(err) = response.errors.into_iter().next() {
        return Err(if err.code.starts_with("Neo.TransientError") {
            Error::Transient {
                backend: BACKEND.to_string(),
                cause: format!("{}: {}", err.code, err.message),
            }
        } else {
            Error::OperationFailed {
                operation: operation.to_string(),
                cause: format!("{}: {}", err.code, err.message),
            }
        });
    }

    let Some(result) = response.results.into_iter().next() else {
        return Ok(Vec::new());
    };
    Ok(result
        .data
        .into_iter()
        .map(|row| result.columns.iter().cloned().zip(row.row).collect())
        .collect())
}
