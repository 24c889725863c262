//! The cache/session core: every job-list read goes through one manager that
//! decides, per call, whether to serve its cache or hit the remote API.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::ci::client::{ApiClient, ApiClientFactory, Credentials};
use crate::ci::types::{Job, ServerSnapshot};
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Cached job collection plus the timestamp of its last refresh.
///
/// The two fields are only ever replaced together. `jobs` stays `None` until
/// the first refresh, so "never populated" is distinguishable from "empty".
#[derive(Debug)]
struct JobCache {
  jobs: Option<Vec<Job>>,
  last_update: DateTime<Utc>,
}

impl JobCache {
  fn unpopulated() -> Self {
    Self {
      jobs: None,
      last_update: DateTime::UNIX_EPOCH,
    }
  }
}

/// Fronts one CI server's job-listing API with a time-bounded cache.
///
/// [`project_list`](Self::project_list) refreshes whenever the cache is older
/// than the freshness window; [`server_snapshot`](Self::server_snapshot) only
/// refreshes a cache that has never been populated at all. Both replace the
/// jobs and the refresh timestamp together, and a failed fetch leaves the
/// cache at its last good state.
///
/// Every operation takes `&mut self`, so a single manager cannot race its own
/// check-then-refresh sequence; to share one across tasks, wrap it in
/// `Arc<Mutex<_>>`.
pub struct ServerManager {
  factory: Arc<dyn ApiClientFactory>,
  clock: Arc<dyn Clock>,
  config: Option<ServerConfig>,
  client: Option<Arc<dyn ApiClient>>,
  cache: JobCache,
  authorization: String,
  stale_time: Duration,
}

impl ServerManager {
  /// Create a manager with no bound configuration or client; call
  /// [`initialize`](Self::initialize) before fetching anything.
  pub fn new(factory: Arc<dyn ApiClientFactory>, clock: Arc<dyn Clock>) -> Self {
    Self {
      factory,
      clock,
      config: None,
      client: None,
      cache: JobCache::unpopulated(),
      authorization: String::new(),
      stale_time: Duration::seconds(2),
    }
  }

  /// Set the freshness window for cached job lists (default 2 seconds).
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Bind configuration and construct an API client through the factory.
  ///
  /// Safe to call again: the bound client is replaced, cache and
  /// authorization state are kept.
  pub fn initialize(
    &mut self,
    config: ServerConfig,
    credentials: Option<Credentials>,
  ) -> Result<()> {
    let url = config.resolved_url()?;
    let client = self.factory.create(&url, credentials.as_ref())?;
    self.client = Some(client);
    self.config = Some(config);
    Ok(())
  }

  /// Replace the server settings without rebuilding the client or refetching.
  pub fn set_configuration(&mut self, config: ServerConfig) {
    self.config = Some(config);
  }

  pub fn configuration(&self) -> Option<&ServerConfig> {
    self.config.as_ref()
  }

  /// Current authorization token; empty when logged out.
  pub fn authorization(&self) -> &str {
    &self.authorization
  }

  pub fn is_logged_in(&self) -> bool {
    !self.authorization.is_empty()
  }

  /// When the job cache was last refreshed; the epoch if it never was.
  pub fn last_update(&self) -> DateTime<Utc> {
    self.cache.last_update
  }

  /// Obtain an authorization token from the server and store it.
  ///
  /// On failure the stored token is left untouched, so a failed login from a
  /// logged-out state stays logged out.
  pub async fn login(&mut self) -> Result<()> {
    let client = self.client()?;
    let token = client.login().await?;
    self.authorization = token;
    info!("logged in");
    Ok(())
  }

  /// Drop the authorization token. Clearing local state never fails.
  pub fn logout(&mut self) {
    self.authorization.clear();
    info!("logged out");
  }

  /// All known jobs, refreshing first when the cache is older than the
  /// freshness window. A fresh cache is served with zero remote calls.
  pub async fn project_list(&mut self) -> Result<Vec<Job>> {
    // One clock reading covers the whole check-then-refresh sequence.
    let now = self.clock.now();

    if now - self.cache.last_update >= self.stale_time {
      self.refresh_jobs(now).await?;
    } else {
      debug!(
        age_ms = (now - self.cache.last_update).num_milliseconds(),
        "serving job list from cache"
      );
    }

    Ok(self.cache.jobs.clone().unwrap_or_default())
  }

  /// Aggregate status snapshot built from the job cache.
  ///
  /// Unlike [`project_list`](Self::project_list), a populated cache is served
  /// as-is even past the freshness window; only a cache that has never been
  /// populated forces a refresh, and exactly one.
  pub async fn server_snapshot(&mut self) -> Result<ServerSnapshot> {
    if self.cache.jobs.is_none() {
      let now = self.clock.now();
      self.refresh_jobs(now).await?;
    }

    let jobs = self.cache.jobs.as_deref().unwrap_or(&[]);
    Ok(ServerSnapshot::from_jobs(jobs))
  }

  /// Overwrite the cached jobs without touching the refresh timestamp.
  ///
  /// Seam for tests and administrative seeding. An empty collection still
  /// counts as populated.
  pub fn set_all_jobs(&mut self, jobs: Vec<Job>) {
    self.cache.jobs = Some(jobs);
  }

  fn client(&self) -> Result<Arc<dyn ApiClient>> {
    self.client.clone().ok_or(Error::NotInitialized)
  }

  /// Fetch the full job list and replace jobs + `last_update` together.
  ///
  /// `now` is the reading the caller's freshness check used. On error the
  /// cache is untouched: both fields are only written after a successful
  /// fetch.
  async fn refresh_jobs(&mut self, now: DateTime<Utc>) -> Result<()> {
    let client = self.client()?;
    let jobs = client.all_jobs().await?;
    debug!(jobs = jobs.len(), "refreshed job cache");
    self.cache.jobs = Some(jobs);
    self.cache.last_update = now;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ci::types::{BuildState, JobStatus};
  use crate::clock::ManualClock;
  use async_trait::async_trait;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  struct MockApiClient {
    jobs: Vec<Job>,
    jobs_calls: AtomicUsize,
    fail_jobs: AtomicBool,
    fail_login: AtomicBool,
  }

  impl MockApiClient {
    fn new(jobs: Vec<Job>) -> Self {
      Self {
        jobs,
        jobs_calls: AtomicUsize::new(0),
        fail_jobs: AtomicBool::new(false),
        fail_login: AtomicBool::new(false),
      }
    }

    fn jobs_calls(&self) -> usize {
      self.jobs_calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl ApiClient for MockApiClient {
    async fn all_jobs(&self) -> Result<Vec<Job>> {
      self.jobs_calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_jobs.load(Ordering::SeqCst) {
        return Err(Error::Transport("connection refused".to_string()));
      }
      Ok(self.jobs.clone())
    }

    async fn login(&self) -> Result<String> {
      if self.fail_login.load(Ordering::SeqCst) {
        return Err(Error::Authentication("bad credentials".to_string()));
      }
      Ok("Jenkins-Crumb=deadbeef".to_string())
    }
  }

  struct MockFactory {
    client: Arc<MockApiClient>,
  }

  impl ApiClientFactory for MockFactory {
    fn create(
      &self,
      _url: &url::Url,
      _credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn ApiClient>> {
      Ok(self.client.clone())
    }
  }

  fn job(name: &str, color: &str) -> Job {
    Job {
      name: name.to_string(),
      status: JobStatus::from_color(color),
      url: format!("http://ci.example.com/job/{}/", name),
    }
  }

  fn test_config() -> ServerConfig {
    ServerConfig {
      url: "http://ci.example.com".to_string(),
      view: None,
      username: None,
    }
  }

  fn ten_oclock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
  }

  fn setup(jobs: Vec<Job>) -> (ServerManager, Arc<MockApiClient>, Arc<ManualClock>) {
    let client = Arc::new(MockApiClient::new(jobs));
    let clock = Arc::new(ManualClock::new(ten_oclock()));
    let factory = Arc::new(MockFactory {
      client: client.clone(),
    });

    let mut manager = ServerManager::new(factory, clock.clone());
    manager.initialize(test_config(), None).unwrap();
    (manager, client, clock)
  }

  #[tokio::test]
  async fn test_first_access_forces_refresh() {
    let (mut manager, client, _clock) = setup(vec![job("core", "blue")]);

    let jobs = manager.project_list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(client.jobs_calls(), 1);
    assert_eq!(manager.last_update(), ten_oclock());
  }

  #[tokio::test]
  async fn test_fresh_cache_serves_without_remote_call() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();
    clock.advance(Duration::seconds(1));

    let jobs = manager.project_list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(client.jobs_calls(), 1);
  }

  #[tokio::test]
  async fn test_stale_cache_refetches_and_stamps_clock() {
    // Cache refreshed at 10:00:00, TTL 2s, clock at 10:00:03: stale.
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();
    clock.set(ten_oclock() + Duration::seconds(3));

    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 2);
    assert_eq!(manager.last_update(), ten_oclock() + Duration::seconds(3));
  }

  #[tokio::test]
  async fn test_within_ttl_keeps_last_update() {
    // Same setup, clock at 10:00:01: fresh, timestamp untouched.
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();
    clock.set(ten_oclock() + Duration::seconds(1));

    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
    assert_eq!(manager.last_update(), ten_oclock());
  }

  #[tokio::test]
  async fn test_exactly_ttl_old_is_stale() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();
    clock.advance(Duration::seconds(2));

    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 2);
  }

  #[tokio::test]
  async fn test_snapshot_skips_refresh_when_populated() {
    let (mut manager, client, clock) = setup(vec![job("core", "red")]);

    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);

    // Well past the TTL; the snapshot path does not care.
    clock.advance(Duration::seconds(30));
    let snapshot = manager.server_snapshot().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
    assert_eq!(snapshot.count(BuildState::Failed), 1);
  }

  #[tokio::test]
  async fn test_snapshot_fetches_once_when_never_populated() {
    let (mut manager, client, _clock) = setup(vec![job("core", "blue"), job("ui", "red")]);

    let snapshot = manager.server_snapshot().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
    assert_eq!(snapshot.projects.len(), 2);

    // And only once: the cache is now populated.
    manager.server_snapshot().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
  }

  #[tokio::test]
  async fn test_snapshot_refresh_stamps_last_update() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.server_snapshot().await.unwrap();
    assert_eq!(manager.last_update(), ten_oclock());

    // The forced refresh left the cache fresh for the TTL-gated path too.
    clock.advance(Duration::seconds(1));
    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
  }

  #[tokio::test]
  async fn test_seeded_cache_counts_as_populated() {
    let (mut manager, client, _clock) = setup(vec![job("core", "blue")]);

    manager.set_all_jobs(vec![]);
    assert_eq!(manager.last_update(), DateTime::UNIX_EPOCH);

    let snapshot = manager.server_snapshot().await.unwrap();
    assert_eq!(client.jobs_calls(), 0);
    assert!(snapshot.projects.is_empty());
  }

  #[tokio::test]
  async fn test_login_stores_token_and_logout_clears() {
    let (mut manager, _client, _clock) = setup(vec![]);

    assert!(!manager.is_logged_in());
    assert_eq!(manager.authorization(), "");

    manager.login().await.unwrap();
    assert!(manager.is_logged_in());
    assert_eq!(manager.authorization(), "Jenkins-Crumb=deadbeef");

    manager.logout();
    assert!(!manager.is_logged_in());
    assert_eq!(manager.authorization(), "");

    // Logout from a logged-out state is legal and still lands logged out.
    manager.logout();
    assert_eq!(manager.authorization(), "");
  }

  #[tokio::test]
  async fn test_login_failure_leaves_state_unchanged() {
    let (mut manager, client, _clock) = setup(vec![]);
    client.fail_login.store(true, Ordering::SeqCst);

    let err = manager.login().await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert!(!manager.is_logged_in());
    assert_eq!(manager.authorization(), "");
  }

  #[tokio::test]
  async fn test_set_configuration_does_not_touch_cache() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();

    manager.set_configuration(ServerConfig {
      url: "http://other.example.com".to_string(),
      view: None,
      username: None,
    });

    assert_eq!(
      manager.configuration().unwrap().url,
      "http://other.example.com"
    );
    assert_eq!(manager.last_update(), ten_oclock());

    // Still fresh: no refetch was triggered by the reconfiguration.
    clock.advance(Duration::seconds(1));
    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_last_good_cache() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();

    client.fail_jobs.store(true, Ordering::SeqCst);
    clock.advance(Duration::seconds(5));

    let err = manager.project_list().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // Jobs and timestamp both survive the failed fetch.
    assert_eq!(manager.last_update(), ten_oclock());
    client.fail_jobs.store(false, Ordering::SeqCst);
    let snapshot = manager.server_snapshot().await.unwrap();
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(client.jobs_calls(), 2);
  }

  #[tokio::test]
  async fn test_operations_require_initialize() {
    let client = Arc::new(MockApiClient::new(vec![]));
    let clock = Arc::new(ManualClock::new(ten_oclock()));
    let factory = Arc::new(MockFactory {
      client: client.clone(),
    });
    let mut manager = ServerManager::new(factory, clock);

    assert!(matches!(
      manager.project_list().await.unwrap_err(),
      Error::NotInitialized
    ));
    assert!(matches!(
      manager.login().await.unwrap_err(),
      Error::NotInitialized
    ));
    assert_eq!(client.jobs_calls(), 0);
  }

  #[tokio::test]
  async fn test_reinitialize_keeps_cache() {
    let (mut manager, client, clock) = setup(vec![job("core", "blue")]);

    manager.project_list().await.unwrap();
    manager.initialize(test_config(), None).unwrap();

    clock.advance(Duration::seconds(1));
    let jobs = manager.project_list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(client.jobs_calls(), 1);
  }

  #[tokio::test]
  async fn test_custom_stale_time() {
    let (manager, client, clock) = setup(vec![job("core", "blue")]);
    let mut manager = manager.with_stale_time(Duration::seconds(60));

    manager.project_list().await.unwrap();
    clock.advance(Duration::seconds(30));

    manager.project_list().await.unwrap();
    assert_eq!(client.jobs_calls(), 1);
  }
}
