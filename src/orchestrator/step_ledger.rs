//! Step ledger (§3 `StepLedger`): persists resumable-step state as marker files under
//! `${STATE_DIR}`. A marker surviving a process exit identifies an incomplete step that
//! the next invocation should retry rather than skip.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Lifecycle state of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// No marker has ever been created for this step.
    NotStarted,
    /// A marker exists; the step began but has not been recorded complete.
    InFlight,
    /// The step completed and its marker was removed.
    Complete,
}

/// Filesystem-backed step ledger rooted at a state directory created with mode 0700.
#[derive(Debug, Clone)]
pub struct StepLedger {
    state_dir: PathBuf,
}

impl StepLedger {
    /// Open (creating if necessary) a ledger rooted at `state_dir`. The directory is
    /// created with permissions restricted to the owner.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&state_dir, perms)?;
        }

        Ok(Self { state_dir })
    }

    fn marker_path(&self, step: &str) -> PathBuf {
        self.state_dir.join(format!("{step}.state"))
    }

    /// Resolve the `STATE_DIR` default per spec.md §6: `$XDG_RUNTIME_DIR/splunk-pkg-state`
    /// if set, else `/tmp/splunk-pkg-state-<uid>`.
    #[must_use]
    pub fn default_state_dir() -> PathBuf {
        if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
            if !xdg.is_empty() {
                return Path::new(&xdg).join("splunk-pkg-state");
            }
        }
        let uid_suffix = current_uid_suffix();
        PathBuf::from(format!("/tmp/splunk-pkg-state-{uid_suffix}"))
    }

    /// Create a marker for `step`, idempotently. Calling this twice for the same step
    /// leaves exactly one marker present.
    pub fn begin_step(&self, step: &str) -> Result<()> {
        let path = self.marker_path(step);
        if !path.exists() {
            std::fs::write(&path, step.as_bytes())?;
        }
        Ok(())
    }

    /// Remove the marker for `step`, if present.
    pub fn complete_step(&self, step: &str) -> Result<()> {
        let path = self.marker_path(step);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Whether a step's marker survives, i.e. it began but never completed.
    #[must_use]
    pub fn step_incomplete(&self, step: &str) -> bool {
        self.marker_path(step).exists()
    }

    /// Current lifecycle state for `step`.
    #[must_use]
    pub fn state(&self, step: &str) -> StepState {
        if self.marker_path(step).exists() {
            StepState::InFlight
        } else {
            StepState::NotStarted
        }
    }

    /// Every step name with a surviving marker, for the resumption report.
    #[must_use]
    pub fn incomplete_steps(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.state_dir) else {
            return Vec::new();
        };
        let mut steps: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".state").map(str::to_string)
            })
            .collect();
        steps.sort();
        steps
    }
}

#[cfg(unix)]
fn current_uid_suffix() -> String {
    // SAFETY: getuid has no preconditions and never fails.
    unsafe { libc::getuid().to_string() }
}

#[cfg(not(unix))]
fn current_uid_suffix() -> String {
    "0".to_string()
}
