//! The remote API seam and its HTTP implementation.
//!
//! `ServerManager` only ever talks to [`ApiClient`] and [`ApiClientFactory`];
//! the HTTP types below are the production implementations, speaking the
//! Jenkins JSON API over an injected `reqwest::Client`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use super::api_types::{ApiCrumb, ApiJob, ApiJobsResponse, ApiUser};
use super::types::Job;
use crate::error::{Error, Result};

/// Username plus API token or password, as handed to the client factory
#[derive(Debug, Clone)]
pub struct Credentials {
  pub username: String,
  pub secret: String,
}

/// Remote job-list API, already decoded into domain types.
#[async_trait]
pub trait ApiClient: Send + Sync {
  /// Fetch every job known to the server, in server order.
  async fn all_jobs(&self) -> Result<Vec<Job>>;

  /// Obtain an authorization token for the bound credentials.
  async fn login(&self) -> Result<String>;
}

/// Builds an [`ApiClient`] bound to a resolved server URL and credentials.
pub trait ApiClientFactory: Send + Sync {
  fn create(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Arc<dyn ApiClient>>;
}

/// HTTP client for the Jenkins JSON API.
pub struct HttpApiClient {
  http: reqwest::Client,
  base: Url,
  credentials: Option<Credentials>,
}

impl HttpApiClient {
  pub fn new(http: reqwest::Client, base: Url, credentials: Option<Credentials>) -> Self {
    Self {
      http,
      base,
      credentials,
    }
  }

  /// GET a path relative to the server base, with basic auth when bound.
  ///
  /// Failures come back as plain messages so each call site can wrap them in
  /// the error kind that fits its operation.
  async fn get(&self, path: &str) -> std::result::Result<reqwest::Response, String> {
    // Relative paths keep any context prefix in the base URL (e.g. /jenkins/).
    let url = self
      .base
      .join(path)
      .map_err(|e| format!("invalid endpoint {}{}: {}", self.base, path, e))?;

    let mut request = self.http.get(url);
    if let Some(creds) = &self.credentials {
      request = request.basic_auth(&creds.username, Some(&creds.secret));
    }

    request
      .send()
      .await
      .map_err(|e| format!("failed to reach {}: {}", self.base, e))
  }
}

#[async_trait]
impl ApiClient for HttpApiClient {
  async fn all_jobs(&self) -> Result<Vec<Job>> {
    let response = self
      .get("api/json?tree=jobs[name,color,url]")
      .await
      .map_err(Error::Transport)?;

    if !response.status().is_success() {
      return Err(Error::Transport(format!(
        "job list request returned {}",
        response.status()
      )));
    }

    let decoded: ApiJobsResponse = response
      .json()
      .await
      .map_err(|e| Error::Transport(format!("failed to decode job list: {}", e)))?;

    Ok(decoded.jobs.into_iter().map(ApiJob::into_job).collect())
  }

  async fn login(&self) -> Result<String> {
    let response = self
      .get("crumbIssuer/api/json")
      .await
      .map_err(Error::Authentication)?;

    match response.status() {
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Authentication(format!(
        "server rejected credentials ({})",
        response.status()
      ))),
      // Servers with CSRF protection off have no crumb issuer; confirm the
      // credentials against the whoAmI endpoint instead.
      StatusCode::NOT_FOUND => self.login_via_who_am_i().await,
      status if status.is_success() => {
        let crumb: ApiCrumb = response
          .json()
          .await
          .map_err(|e| Error::Authentication(format!("failed to decode crumb: {}", e)))?;
        Ok(format!("{}={}", crumb.crumb_request_field, crumb.crumb))
      }
      status => Err(Error::Authentication(format!(
        "login request returned {}",
        status
      ))),
    }
  }
}

impl HttpApiClient {
  /// Confirm credentials against the whoAmI endpoint and derive a token
  /// from the authenticated user id.
  async fn login_via_who_am_i(&self) -> Result<String> {
    let response = self
      .get("me/api/json")
      .await
      .map_err(Error::Authentication)?;

    if !response.status().is_success() {
      return Err(Error::Authentication(format!(
        "server rejected credentials ({})",
        response.status()
      )));
    }

    let user: ApiUser = response
      .json()
      .await
      .map_err(|e| Error::Authentication(format!("failed to decode user: {}", e)))?;

    Ok(format!("user={}", user.id))
  }
}

/// Factory producing [`HttpApiClient`]s over a shared transport.
pub struct HttpClientFactory {
  http: reqwest::Client,
}

impl HttpClientFactory {
  /// The `reqwest::Client` is the injected transport; connection pools and
  /// TLS state are shared across every client this factory creates.
  pub fn new(http: reqwest::Client) -> Self {
    Self { http }
  }
}

impl ApiClientFactory for HttpClientFactory {
  fn create(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Arc<dyn ApiClient>> {
    Ok(Arc::new(HttpApiClient::new(
      self.http.clone(),
      url.clone(),
      credentials.cloned(),
    )))
  }
}
