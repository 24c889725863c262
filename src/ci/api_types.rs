//! Serde-deserializable types matching the server's JSON API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what the dashboard needs.

use serde::Deserialize;

use super::types::{Job, JobStatus};

/// One job entry from the job-tree endpoint
#[derive(Debug, Deserialize)]
pub struct ApiJob {
  pub name: String,
  #[serde(default)]
  pub color: String,
  #[serde(default)]
  pub url: String,
}

impl ApiJob {
  pub fn into_job(self) -> Job {
    Job {
      status: JobStatus::from_color(&self.color),
      name: self.name,
      url: self.url,
    }
  }
}

/// Response of `api/json?tree=jobs[name,color,url]`
#[derive(Debug, Deserialize)]
pub struct ApiJobsResponse {
  #[serde(default)]
  pub jobs: Vec<ApiJob>,
}

/// Response of `crumbIssuer/api/json`
#[derive(Debug, Deserialize)]
pub struct ApiCrumb {
  pub crumb: String,
  #[serde(rename = "crumbRequestField")]
  pub crumb_request_field: String,
}

/// Response of `me/api/json`, used when the crumb issuer is disabled
#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ci::types::BuildState;

  #[test]
  fn test_jobs_response_decodes() {
    let body = r#"{
      "jobs": [
        {"name": "core", "color": "blue", "url": "http://ci/job/core/"},
        {"name": "ui", "color": "red_anime", "url": "http://ci/job/ui/"}
      ]
    }"#;

    let decoded: ApiJobsResponse = serde_json::from_str(body).unwrap();
    assert_eq!(decoded.jobs.len(), 2);

    let core = decoded.jobs.into_iter().next().unwrap().into_job();
    assert_eq!(core.name, "core");
    assert_eq!(core.status.state, BuildState::Success);
  }

  #[test]
  fn test_missing_color_defaults_to_unknown() {
    let body = r#"{"jobs": [{"name": "bare"}]}"#;
    let decoded: ApiJobsResponse = serde_json::from_str(body).unwrap();
    let job = decoded.jobs.into_iter().next().unwrap().into_job();
    assert_eq!(job.status.state, BuildState::Unknown);
    assert!(job.url.is_empty());
  }

  #[test]
  fn test_crumb_decodes() {
    let body = r#"{"crumb": "abc123", "crumbRequestField": "Jenkins-Crumb"}"#;
    let crumb: ApiCrumb = serde_json::from_str(body).unwrap();
    assert_eq!(crumb.crumb_request_field, "Jenkins-Crumb");
  }
}
