//! Versions manifest (C1): an immutable key-value table of image repos, digests, and
//! version tags, loaded once at process start.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrchestratorError, Result};

/// A single image identity: repository, content digest, and a human version tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Registry repository, e.g. `splunk/splunk`.
    pub repo: String,
    /// Content digest in `sha256:<64-hex>` form, if known.
    pub digest: Option<String>,
    /// Human version tag, e.g. `9.1.2`.
    pub version_tag: Option<String>,
}

/// Immutable mapping from logical image key (`SPLUNK`, `REDIS`, `PROMETHEUS`, ...) to
/// its `ImageEntry`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionsManifest {
    entries: BTreeMap<String, ImageEntry>,
}

fn is_valid_digest(digest: &str) -> bool {
    digest
        .strip_prefix("sha256:")
        .is_some_and(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Permissive semver check: `MAJOR.MINOR.PATCH` with an optional pre-release/build
/// suffix, matching the "permissive semver" rule in the data model.
fn is_valid_version(version: &str) -> bool {
    let core = version
        .split(['-', '+'])
        .next()
        .unwrap_or(version);
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() >= 2
        && parts.len() <= 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Parse a single `KEY=value` line, tolerating an `export` prefix, surrounding
/// single/double quotes, and CRLF line endings. Returns `None` for comments and
/// blank lines. Values are never evaluated as shell expressions.
pub fn parse_kv_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim_end_matches('\r').trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = if value.len() >= 2 {
        let bytes = value.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            &value[1..value.len() - 1]
        } else {
            value
        }
    } else {
        value
    };
    Some((key.to_string(), value.to_string()))
}

/// Interpolate `${KEY}` / `$KEY` references against an already-parsed key-value map.
/// No shell evaluation occurs; unresolvable references are left verbatim.
fn interpolate(value: &str, resolved: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if bytes.get(i + 1) == Some(&b'{') {
                if let Some(end) = value[i + 2..].find('}') {
                    let key = &value[i + 2..i + 2 + end];
                    if let Some(v) = resolved.get(key) {
                        out.push_str(v);
                    } else {
                        out.push_str(&value[i..i + 3 + end]);
                    }
                    i += 3 + end;
                    continue;
                }
            } else {
                let rest = &value[i + 1..];
                let key_len = rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                if key_len > 0 {
                    let key = &rest[..key_len];
                    if let Some(v) = resolved.get(key) {
                        out.push_str(v);
                        i += 1 + key_len;
                        continue;
                    }
                }
            }
        }
        let ch = value[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    let _ = chars.peek();
    out
}

impl VersionsManifest {
    /// Load a versions manifest from a K=V file. Values may reference other keys in
    /// the same file for string interpolation of image references; no shell
    /// evaluation ever occurs.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    /// Parse manifest text directly (used by `load` and by tests).
    pub fn parse(text: &str) -> Result<Self> {
        let mut raw: BTreeMap<String, String> = BTreeMap::new();
        for line in text.lines() {
            if let Some((key, value)) = parse_kv_line(line) {
                raw.insert(key, value);
            }
        }

        let mut resolved: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in &raw {
            resolved.insert(key.clone(), interpolate(value, &raw));
        }

        let mut repos: BTreeMap<String, String> = BTreeMap::new();
        let mut digests: BTreeMap<String, String> = BTreeMap::new();
        let mut tags: BTreeMap<String, String> = BTreeMap::new();

        for (key, value) in &resolved {
            if let Some(logical) = key.strip_suffix("_IMAGE") {
                repos.insert(logical.to_string(), value.clone());
            } else if let Some(logical) = key.strip_suffix("_DIGEST") {
                digests.insert(logical.to_string(), value.clone());
            } else if let Some(logical) = key.strip_suffix("_VERSION") {
                tags.insert(logical.to_string(), value.clone());
            }
        }

        let mut entries = BTreeMap::new();
        for (logical, repo) in repos {
            let digest = digests.remove(&logical);
            let version_tag = tags.remove(&logical);
            entries.insert(
                logical,
                ImageEntry {
                    repo,
                    digest,
                    version_tag,
                },
            );
        }

        Ok(Self { entries })
    }

    /// All logical keys present, in sorted order (`BTreeMap` iteration order).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look up a single entry by logical key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ImageEntry> {
        self.entries.get(key)
    }

    /// Assert every `*_DIGEST` matches the sha256 shape and every `*_VERSION`
    /// matches a permissive semver. Returns the list of failing keys (does not
    /// short-circuit on the first failure).
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for (key, entry) in &self.entries {
            if let Some(digest) = &entry.digest {
                if !is_valid_digest(digest) {
                    failures.push(format!("{key}_DIGEST"));
                }
            }
            if let Some(version) = &entry.version_tag {
                if !is_valid_version(version) {
                    failures.push(format!("{key}_VERSION"));
                }
            }
        }
        failures
    }

    /// Build the canonical reference for a logical key: `repo@digest` if the digest
    /// validates, else `repo:tag` with a recorded warning, else an error.
    pub fn image_ref(&self, key: &str) -> Result<String> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| OrchestratorError::invalid_input(format!("unknown image key: {key}")))?;
        image_ref(&entry.repo, entry.digest.as_deref(), entry.version_tag.as_deref())
    }

    /// Whether an entry is digest-pinned (has a validating digest).
    #[must_use]
    pub fn is_pinned(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .and_then(|e| e.digest.as_deref())
            .is_some_and(is_valid_digest)
    }
}

/// Standalone helper mirroring `VersionsManifest::image_ref` for a repo/digest/tag
/// triple that didn't necessarily come from a loaded manifest (used by the compose
/// synthesizer when assembling references from resolved config).
pub fn image_ref(repo: &str, digest: Option<&str>, tag: Option<&str>) -> Result<String> {
    if let Some(digest) = digest {
        if is_valid_digest(digest) {
            return Ok(format!("{repo}@{digest}"));
        }
        warn!(repo, digest, "image digest failed validation, falling back to tag");
    }
    if let Some(tag) = tag {
        warn!(repo, tag, "using mutable tag reference instead of a pinned digest");
        return Ok(format!("{repo}:{tag}"));
    }
    Err(OrchestratorError::invalid_input(format!(
        "no usable digest or tag for image repo {repo}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kv_lines() {
        assert_eq!(
            parse_kv_line("FOO=bar"),
            Some(("FOO".into(), "bar".into()))
        );
        assert_eq!(
            parse_kv_line("export FOO=\"bar baz\""),
            Some(("FOO".into(), "bar baz".into()))
        );
        assert_eq!(parse_kv_line("  # comment"), None);
        assert_eq!(parse_kv_line(""), None);
        assert_eq!(
            parse_kv_line("FOO='bar'\r"),
            Some(("FOO".into(), "bar".into()))
        );
    }

    #[test]
    fn loads_and_verifies_manifest() {
        let text = "\
SPLUNK_IMAGE=splunk/splunk
SPLUNK_DIGEST=sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
SPLUNK_VERSION=9.1.2
REDIS_IMAGE=redis
REDIS_DIGEST=notadigest
";
        let manifest = VersionsManifest::parse(text).unwrap();
        let failures = manifest.verify();
        assert_eq!(failures, vec!["REDIS_DIGEST".to_string()]);
        assert!(manifest.is_pinned("SPLUNK"));
        assert!(!manifest.is_pinned("REDIS"));
        assert_eq!(
            manifest.image_ref("SPLUNK").unwrap(),
            "splunk/splunk@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn image_ref_falls_back_to_tag_with_warning() {
        let result = image_ref("redis", Some("bogus"), Some("7.2")).unwrap();
        assert_eq!(result, "redis:7.2");
    }

    #[test]
    fn image_ref_fails_with_neither_digest_nor_tag() {
        assert!(image_ref("redis", None, None).is_err());
    }

    #[test]
    fn interpolation_resolves_same_file_keys() {
        let text = "\
REGISTRY=example.com
APP_IMAGE=${REGISTRY}/app
APP_DIGEST=sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
";
        let manifest = VersionsManifest::parse(text).unwrap();
        assert_eq!(manifest.get("APP").unwrap().repo, "example.com/app");
    }
}
