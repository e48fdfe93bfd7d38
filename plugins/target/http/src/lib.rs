use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use relay_api::{RelayError, TargetClient, TargetRequest, TargetResponse};

/// Header carrying the source event id so the target can deduplicate redeliveries.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Basic credentials for the target endpoint, supplied out of band.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// HTTP(S) target: `POST <endpoint>` with the correlation id as path parameter.
///
/// The endpoint may contain a `*` placeholder (`https://host/prod/*`) which is
/// replaced by the url-encoded path parameter; otherwise the parameter is
/// appended as the last path segment.
pub struct HttpTargetClient {
    http: reqwest::Client,
    endpoint_url: String,
    credentials: Option<BasicCredentials>,
}

impl HttpTargetClient {
    pub fn new(
        endpoint_url: &str,
        credentials: Option<BasicCredentials>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        if !(endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://")) {
            return Err(RelayError::config(format!(
                "endpoint '{endpoint_url}': expected http:// or https:// URL"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint_url: endpoint_url.to_string(),
            credentials,
        })
    }

    /// Build the request URL for a path parameter.
    pub fn url_for(&self, path_param: &str) -> String {
        let encoded = urlencoding::encode(path_param);
        if self.endpoint_url.contains('*') {
            self.endpoint_url.replacen('*', &encoded, 1)
        } else {
            format!("{}/{encoded}", self.endpoint_url.trim_end_matches('/'))
        }
    }

    async fn exec(&self, request: TargetRequest) -> Result<TargetResponse, RelayError> {
        let url = self.url_for(&request.path_param);
        let mut builder = self
            .http
            .post(&url)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&request.body);
        if let Some(creds) = &self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = builder.send().await.map_err(|e| transport_error(&url, e))?;
        let status = resp.status().as_u16();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(%url, status, error = %e, "target response body unreadable");
                String::new()
            }
        };
        Ok(TargetResponse { status, body })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> RelayError {
    let what = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "request"
    };
    RelayError::transient(format!("{what} {url}: {e}"))
}

impl TargetClient for HttpTargetClient {
    fn send(
        &self,
        request: TargetRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TargetResponse, RelayError>> + Send + '_>> {
        Box::pin(self.exec(request))
    }
}
