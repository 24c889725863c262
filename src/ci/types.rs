use std::fmt;

/// A single job/build known to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
  pub name: String,
  pub status: JobStatus,
  pub url: String,
}

/// Outcome of a job's last completed build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
  Success,
  Failed,
  Unstable,
  Disabled,
  Aborted,
  NotBuilt,
  Unknown,
}

impl BuildState {
  /// All states, in dashboard display order
  pub const ALL: &'static [BuildState] = &[
    BuildState::Success,
    BuildState::Failed,
    BuildState::Unstable,
    BuildState::Aborted,
    BuildState::Disabled,
    BuildState::NotBuilt,
    BuildState::Unknown,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      BuildState::Success => "success",
      BuildState::Failed => "failed",
      BuildState::Unstable => "unstable",
      BuildState::Disabled => "disabled",
      BuildState::Aborted => "aborted",
      BuildState::NotBuilt => "not built",
      BuildState::Unknown => "unknown",
    }
  }
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Last-build outcome plus whether a build is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
  pub state: BuildState,
  pub building: bool,
}

impl JobStatus {
  /// Parse a server color string ("blue", "red_anime", "disabled", ...).
  ///
  /// The `_anime` suffix marks a build in progress; the base color carries
  /// the outcome of the last completed build. Unrecognized colors map to
  /// `Unknown` rather than failing, so new server states degrade gracefully.
  pub fn from_color(color: &str) -> Self {
    let (base, building) = match color.strip_suffix("_anime") {
      Some(base) => (base, true),
      None => (color, false),
    };

    let state = match base {
      "blue" | "green" => BuildState::Success,
      "red" => BuildState::Failed,
      "yellow" => BuildState::Unstable,
      "disabled" => BuildState::Disabled,
      "aborted" => BuildState::Aborted,
      "notbuilt" => BuildState::NotBuilt,
      _ => BuildState::Unknown,
    };

    Self { state, building }
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.building {
      write!(f, "{} (building)", self.state)
    } else {
      write!(f, "{}", self.state)
    }
  }
}

/// Dashboard-facing status of one project
#[derive(Debug, Clone)]
pub struct ProjectStatus {
  pub name: String,
  pub state: BuildState,
  pub building: bool,
  pub web_url: String,
}

/// Aggregate view of every known job, built from the job cache
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
  pub projects: Vec<ProjectStatus>,
}

impl ServerSnapshot {
  /// Build a snapshot from cached jobs, preserving server order.
  pub fn from_jobs(jobs: &[Job]) -> Self {
    let projects = jobs
      .iter()
      .map(|job| ProjectStatus {
        name: job.name.clone(),
        state: job.status.state,
        building: job.status.building,
        web_url: job.url.clone(),
      })
      .collect();

    Self { projects }
  }

  /// Number of projects whose last build landed in `state`
  pub fn count(&self, state: BuildState) -> usize {
    self.projects.iter().filter(|p| p.state == state).count()
  }

  /// Number of projects currently building
  pub fn building_count(&self) -> usize {
    self.projects.iter().filter(|p| p.building).count()
  }
}
