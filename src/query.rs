use std::collections::BTreeMap;

use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use thiserror::Error;

use crate::http::{HttpClient, HttpError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("unexpected status code {0}")]
    UnexpectedStatus(StatusCode),
    #[error("deserialize response failed, {0}")]
    Deserialize(#[from] serde_json::Error),
}

/// One matched series. `metric` maps label names to values; a well formed
/// fleet always carries `instance` and `exporter_port`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Sample {
    pub metric: BTreeMap<String, String>,
    /// Evaluation timestamp and value, e.g. `[1435781451.781, "1"]`.
    pub value: (f64, String),
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    pub result: Vec<Sample>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

/// Selector picking the `up` series of scrapeable exporters for a role.
fn role_selector(role: &str) -> String {
    format!("up{{role=~'{role}', exporter_port=~'.+', metrics_path=~'.+', app=~'.+'}}")
}

/// Runs instant queries against one Prometheus HTTP API.
#[derive(Clone, Debug)]
pub struct Client {
    client: HttpClient,
    endpoint: String,
}

impl Client {
    pub fn new(address: &str) -> Client {
        Client {
            client: HttpClient::new(),
            endpoint: format!("http://{address}/api/v1/query"),
        }
    }

    /// Run the instant query for `role` and decode the result set.
    ///
    /// The response body must hold exactly one JSON value; trailing data
    /// after the first value is rejected as a decode failure.
    pub async fn query(&self, role: &str) -> Result<QueryResponse, QueryError> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("query", &role_selector(role))
            .finish();

        let req = Request::builder()
            .method(Method::GET)
            .uri(format!("{}?{}", self.endpoint, query))
            .body(Full::default())
            .map_err(HttpError::BuildRequest)?;

        let resp = self.client.send(req).await?;
        let (parts, incoming) = resp.into_parts();
        if !parts.status.is_success() {
            return Err(QueryError::UnexpectedStatus(parts.status));
        }

        let body = incoming
            .collect()
            .await
            .map_err(HttpError::from)?
            .to_bytes();

        serde_json::from_slice(&body).map_err(Into::into)
    }
}
