//! cypher-shell backed database client
//!
//! Every statement runs in its own `cypher-shell` process. The query goes in
//! on stdin and the password through `NEO4J_PASSWORD`, so neither shows up
//! in the process list.

use async_trait::async_trait;
use neodeploy_cloud::{
    ConnectTarget, DatabaseClient, DatabaseError, DatabaseSession, probe::MARKER_LABEL,
};
use neodeploy_core::SecretValue;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Only enabled servers count as cluster members
const SHOW_SERVERS: &str =
    "SHOW SERVERS YIELD name, state WHERE state = 'Enabled' RETURN count(*) AS members";
const CLUSTER_OVERVIEW: &str = "CALL dbms.cluster.overview() YIELD id RETURN count(*) AS members";
const ACCEPTED_LICENSE: &str = "CALL dbms.acceptedLicenseAgreement()";
const SYSTEM_DATABASE: &str = "system";

const AUTH_MARKERS: &[&str] = &["unauthorized", "authentication", "invalid credentials"];
const ROUTING_MARKERS: &[&str] = &["routing", "discovery", "no leader"];
const CONNECT_MARKERS: &[&str] = &[
    "connection refused",
    "unable to connect",
    "could not connect",
    "serviceunavailable",
    "service unavailable",
    "timed out",
    "connection reset",
];

#[derive(Debug, Clone)]
pub struct CypherShellClient {
    program: String,
}

impl CypherShellClient {
    pub fn new() -> Self {
        Self {
            program: "cypher-shell".to_string(),
        }
    }

    /// Use a different executable instead of `cypher-shell`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check that cypher-shell is installed
    pub async fn check_installed(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.program, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for CypherShellClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for CypherShellClient {
    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<Box<dyn DatabaseSession>, DatabaseError> {
        let session = CypherShellSession {
            program: self.program.clone(),
            uri: target.uri.clone(),
            username: target.username.clone(),
            password: target.password.clone(),
        };
        session.query("RETURN 1 AS ok").await?;
        Ok(Box::new(session))
    }
}

struct CypherShellSession {
    program: String,
    uri: String,
    username: String,
    password: SecretValue,
}

impl CypherShellSession {
    async fn query(&self, statement: &str) -> Result<String, DatabaseError> {
        self.query_on(None, statement).await
    }

    async fn query_on(
        &self,
        database: Option<&str>,
        statement: &str,
    ) -> Result<String, DatabaseError> {
        let mut command = Command::new(&self.program);
        command.args(["-a", &self.uri, "-u", &self.username, "--format", "plain"]);
        if let Some(database) = database {
            command.args(["-d", database]);
        }
        let mut child = command
            .env("NEO4J_PASSWORD", self.password.expose())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    DatabaseError::Connect(format!("{} not found", self.program))
                }
                _ => DatabaseError::Connect(e.to_string()),
            })?;

        tracing::trace!(uri = %self.uri, "cypher-shell: {}", statement);

        if let Some(mut stdin) = child.stdin.take() {
            let input = format!("{};\n", statement);
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| DatabaseError::Connect(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DatabaseError::Connect(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify(stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn count(
        &self,
        database: Option<&str>,
        statement: &str,
    ) -> Result<Option<usize>, DatabaseError> {
        let output = self.query_on(database, statement).await?;
        Ok(first_value(&output).and_then(|v| v.parse().ok()))
    }
}

#[async_trait]
impl DatabaseSession for CypherShellSession {
    async fn write_marker(&mut self, marker: &str, value: &str) -> Result<(), DatabaseError> {
        self.query(&format!(
            "CREATE (n:{} {{marker: {}, value: {}}})",
            MARKER_LABEL,
            quote(marker),
            quote(value)
        ))
        .await
        .map(|_| ())
    }

    async fn read_marker(&mut self, marker: &str) -> Result<Option<String>, DatabaseError> {
        let output = self
            .query(&format!(
                "MATCH (n:{} {{marker: {}}}) RETURN n.value AS value LIMIT 1",
                MARKER_LABEL,
                quote(marker)
            ))
            .await?;
        Ok(first_value(&output))
    }

    async fn delete_marker(&mut self, marker: &str) -> Result<(), DatabaseError> {
        self.query(&format!(
            "MATCH (n:{} {{marker: {}}}) DELETE n",
            MARKER_LABEL,
            quote(marker)
        ))
        .await
        .map(|_| ())
    }

    async fn cluster_members(&mut self) -> Result<Option<usize>, DatabaseError> {
        // SHOW SERVERS exists from 5.x and only on system; 4.4 clusters only answer the procedure
        match self.count(Some(SYSTEM_DATABASE), SHOW_SERVERS).await {
            Err(DatabaseError::Query(_)) => {}
            other => return other,
        }
        match self.count(None, CLUSTER_OVERVIEW).await {
            Err(DatabaseError::Query(_)) => Ok(None),
            other => other,
        }
    }

    async fn accepted_license(&mut self) -> Result<Option<String>, DatabaseError> {
        match self.query(ACCEPTED_LICENSE).await {
            Ok(output) => Ok(first_value(&output)),
            Err(DatabaseError::Query(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Cypher string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// First cell of the first data row of `--format plain` output
fn first_value(output: &str) -> Option<String> {
    let row = output.lines().skip(1).find(|line| !line.trim().is_empty())?;
    let cell = row.split(", ").next()?.trim();
    let unquoted = cell
        .strip_prefix('"')
        .and_then(|c| c.strip_suffix('"'))
        .unwrap_or(cell);
    match unquoted {
        "NULL" | "null" => None,
        value => Some(value.to_string()),
    }
}

fn classify(stderr: &str) -> DatabaseError {
    let lower = stderr.to_lowercase();
    let detail = stderr.lines().next().unwrap_or(stderr).to_string();
    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        DatabaseError::Auth(detail)
    } else if ROUTING_MARKERS.iter().any(|m| lower.contains(m)) {
        DatabaseError::Routing(detail)
    } else if CONNECT_MARKERS.iter().any(|m| lower.contains(m)) {
        DatabaseError::Connect(detail)
    } else {
        DatabaseError::Query(detail)
    }
}
