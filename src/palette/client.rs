use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::{ApiConfig, Config};

use super::api_types::ApiHealthResponse;

/// Remote palette API.
///
/// One JSON request function; the cache builds the paths. Errors cover
/// unreachable hosts, timeouts and non-2xx responses alike.
pub trait PaletteRemote: Send + Sync {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<Value>>;
}

impl<T: PaletteRemote + ?Sized> PaletteRemote for Arc<T> {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<Value>> {
    (**self).request(method, path, body)
  }
}

/// Result of probing the API health endpoint
#[derive(Debug, Clone)]
pub struct ApiHealth {
  pub status: String,
  pub version: Option<String>,
  pub database_connection: bool,
  pub is_healthy: bool,
}

impl From<ApiHealthResponse> for ApiHealth {
  fn from(resp: ApiHealthResponse) -> Self {
    ApiHealth {
      is_healthy: resp.status == "ok" && resp.database_connection,
      status: resp.status,
      version: resp.version,
      database_connection: resp.database_connection,
    }
  }
}

/// HTTP client for the palette API
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(api: &ApiConfig) -> Result<Self> {
    // Without a trailing slash, Url::join would drop the last path segment
    let mut base = api.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", api.base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(api.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token: Config::get_api_token(),
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
    let url = self.url(path)?;
    debug!(%method, %url, "API request");

    let mut request = self
      .client
      .request(method.clone(), url)
      .header(reqwest::header::ACCEPT, "application/json");
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Failed to reach API for {} {}: {}", method, path, e))?;

    let status = response.status();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read API response for {} {}: {}", method, path, e))?;

    if !status.is_success() {
      return Err(eyre!("{}", describe_failure(status, &bytes)));
    }

    if bytes.is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes)
      .map_err(|e| eyre!("Failed to parse API response for {} {}: {}", method, path, e))
  }

  /// Probe `GET health`.
  pub async fn check_health(&self) -> Result<ApiHealth> {
    let value = self.send(Method::GET, "health", None).await?;
    let resp: ApiHealthResponse =
      serde_json::from_value(value).map_err(|e| eyre!("Failed to parse health response: {}", e))?;
    Ok(resp.into())
  }
}

impl PaletteRemote for HttpRemote {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<Value>> {
    self.send(method, path, body).boxed()
  }
}

/// `API returned 404`, plus the server's `message` or `error` when it sent one.
fn describe_failure(status: StatusCode, body: &[u8]) -> String {
  let detail = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
    ["message", "error"]
      .iter()
      .find_map(|k| v.get(*k).and_then(Value::as_str).map(String::from))
  });

  match detail {
    Some(detail) => format!("API returned {}: {}", status.as_u16(), detail),
    None => format!("API returned {}", status.as_u16()),
  }
}
