//! # splunk-orchestrator
//!
//! Deploys and manages a containerized Splunk cluster (indexers, search heads, optional
//! cluster master) with optional monitoring (Prometheus + Grafana) and application
//! sidecars (app + Redis), on top of a detected local container runtime (Docker or
//! Podman) and its associated compose implementation.
//!
//! The crate is organized around three tightly coupled subsystems:
//!
//! - **Runtime & capability negotiation** ([`platform`]): detects the available
//!   container runtime and compose implementation and exposes a single `compose`
//!   invocation abstraction.
//! - **Deterministic compose synthesis** ([`compose`]): from a validated
//!   [`config::EffectiveConfig`], synthesizes a Compose-specification document
//!   atomically, with conditional blocks gated by detected capabilities.
//! - **Resilient orchestration** ([`orchestrator`]): a pipeline of idempotent,
//!   resumable steps that validates the host, pulls images, writes supporting
//!   configs, brings services up under retry and backoff, and waits for health.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use splunk_orchestrator::config::{NullCredentialsProvider, RawOverrides};
//! use splunk_orchestrator::error::Result;
//! use splunk_orchestrator::manifest::VersionsManifest;
//! use splunk_orchestrator::orchestrator::Pipeline;
//!
//! # async fn run() -> Result<()> {
//! let manifest = VersionsManifest::load("versions.env")?;
//! let outcome = splunk_orchestrator::config::resolve(
//!     None,
//!     &RawOverrides::new(),
//!     &RawOverrides::new(),
//!     &std::env::current_dir()?,
//!     &NullCredentialsProvider,
//! )?;
//! let pipeline = Pipeline::new(
//!     std::path::PathBuf::from("."),
//!     splunk_orchestrator::clock::utc_now_rfc3339(),
//! );
//! let _report = splunk_orchestrator::orchestrator::run(&outcome.config, &manifest, &pipeline).await?;
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod clock;
pub mod collaborators;
pub mod compose;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod platform;
pub mod preflight;
pub mod supply_chain;

pub use collaborators::{Installer, NullInstaller, NullPlatformHelpers, PlatformHelpers};
pub use compose::ComposeDocument;
pub use config::{CredentialsProvider, EffectiveConfig, NullCredentialsProvider};
pub use error::{OrchestratorError, Result};
pub use health::ServiceHealth;
pub use manifest::VersionsManifest;
pub use orchestrator::{Pipeline, PipelineReport};
pub use platform::Capabilities;
