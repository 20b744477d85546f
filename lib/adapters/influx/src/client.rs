use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fluxgauge_domain::{BackendError, ConnectionConfig, Row};
use fluxgauge_ports::{ClientFactory, QueryClient};

use crate::flux_csv;

/// Blocking InfluxDB v2 client for the Flux query API.
pub struct InfluxClient {
    http: Client,
    endpoint: String,
    token: String,
    org: String,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

#[derive(Serialize)]
struct Dialect {
    header: bool,
    annotations: [&'static str; 1],
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl InfluxClient {
    pub fn new(config: &ConnectionConfig, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint(),
            token: config.token.clone(),
            org: config.org.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn check_status(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let raw = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&raw)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or(raw);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BackendError::Unauthorized(message))
            }
            _ => Err(BackendError::Status {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

impl QueryClient for InfluxClient {
    fn ready(&self) -> Result<(), BackendError> {
        let url = format!("{}/ready", self.endpoint);
        debug!(%url, "Checking InfluxDB readiness");
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        Self::check_status(response)?;
        Ok(())
    }

    fn query(&self, query: &str) -> Result<Vec<Row>, BackendError> {
        debug!(query, "Running query");
        let body = QueryBody {
            query,
            kind: "flux",
            dialect: Dialect {
                header: true,
                annotations: ["datatype"],
            },
        };
        let response = self
            .http
            .post(format!("{}/api/v2/query", self.endpoint))
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "application/csv")
            .json(&body)
            .send()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        let text = Self::check_status(response)?
            .text()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        flux_csv::decode(&text)
    }
}

/// Builds one [`InfluxClient`] per connection, all sharing the same timeout.
#[derive(Debug, Clone, Copy)]
pub struct InfluxClientFactory {
    timeout: Duration,
}

impl InfluxClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for InfluxClientFactory {
    fn create(&self, config: &ConnectionConfig) -> Result<Arc<dyn QueryClient>, BackendError> {
        Ok(Arc::new(InfluxClient::new(config, self.timeout)?))
    }
}
