//! Atomic compose-document rendering: write to a sibling temp file, then rename over
//! the destination so a reader never observes a partially-written artifact.

use std::io::Write as _;
use std::path::Path;

use crate::error::Result;
use crate::orchestrator::cleanup::CleanupRegistry;
use crate::platform::Capabilities;

use super::types::ComposeDocument;

/// Compose-spec schema version this crate emits.
pub const SCHEMA_VERSION: &str = "3.9";

fn metadata_header(capabilities: &Capabilities, generated_at_utc: &str) -> String {
    format!(
        "# Generated by splunk-orchestrator at {generated_at_utc}\n\
         # runtime={} compose_impl={:?} schema_version={SCHEMA_VERSION}\n\
         # Do not edit by hand; regenerate via `splunk-orchestrator render`.\n",
        capabilities.runtime(),
        capabilities.compose_impl(),
    )
}

/// Serialize `doc` to Compose-spec YAML with the metadata header prepended. Pure
/// function of its inputs except for the timestamp line, satisfying the determinism
/// invariant ("identical modulo the timestamp header line").
pub fn render_yaml(doc: &ComposeDocument, capabilities: &Capabilities, generated_at_utc: &str) -> Result<String> {
    let body = serde_yaml::to_string(doc)?;
    Ok(format!("{}{}", metadata_header(capabilities, generated_at_utc), body))
}

/// Write `contents` to `path` atomically: create a sibling temp file in the same
/// directory (guaranteeing a same-filesystem rename), write and flush it, then rename
/// over `path`. Registers the temp path with `cleanup` so an abnormal exit before the
/// rename removes it.
pub fn write_atomic(path: &Path, contents: &str, cleanup: &CleanupRegistry) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(contents.as_bytes())?;
    temp.flush()?;

    let temp_path = temp.path().to_path_buf();
    cleanup.register(move || {
        let _ = std::fs::remove_file(&temp_path);
    });

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::types::ComposeFile;
    use crate::platform::{Capabilities, ComposeImpl};

    fn fake_capabilities() -> Capabilities {
        Capabilities::for_test(ComposeImpl::DockerComposeV2)
    }

    #[test]
    fn header_contains_timestamp_and_schema_version() {
        let caps = fake_capabilities();
        let doc = ComposeFile {
            name: "demo".to_string(),
            ..Default::default()
        };
        let yaml = render_yaml(&doc, &caps, "2026-01-01T00:00:00Z").unwrap();
        assert!(yaml.contains("2026-01-01T00:00:00Z"));
        assert!(yaml.contains(SCHEMA_VERSION));
    }

    #[test]
    fn render_is_deterministic_modulo_timestamp() {
        let caps = fake_capabilities();
        let doc = ComposeFile {
            name: "demo".to_string(),
            ..Default::default()
        };
        let yaml1 = render_yaml(&doc, &caps, "2026-01-01T00:00:00Z").unwrap();
        let yaml2 = render_yaml(&doc, &caps, "2026-01-02T00:00:00Z").unwrap();
        let body1: String = yaml1.lines().skip(3).collect();
        let body2: String = yaml2.lines().skip(3).collect();
        assert_eq!(body1, body2);
    }

    #[test]
    fn write_atomic_produces_final_file_and_no_temp_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("compose.yaml");
        let cleanup = CleanupRegistry::new();
        write_atomic(&target, "services: {}\n", &cleanup).unwrap();
        assert!(target.exists());
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
