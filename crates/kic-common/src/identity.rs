//! Cluster identity and the artifacts derived from its name
//!
//! A [`ClusterIdentity`] is rebuilt from the cluster name on every invocation.
//! The containers it labels are the only persisted state, so the label and the
//! credentials path must be pure functions of the name.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result, CLUSTER_LABEL_KEY, DEFAULT_CLUSTER_NAME};

/// Pattern cluster names must match before resources are created.
///
/// Similar to valid docker container names, relaxed slightly since node
/// containers get a prefix and a suffix around the cluster name.
pub const VALID_NAME_PATTERN: &str = r"^[a-zA-Z0-9_.-]+$";

static VALID_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(VALID_NAME_PATTERN).expect("cluster name pattern is valid"));

/// Prefix of the generated credentials (kubeconfig) file name
const CREDENTIALS_FILE_PREFIX: &str = "kic-config-";

/// Directory holding generated credentials files when none is configured
const CREDENTIALS_DIR_NAME: &str = ".kube";

/// Identity of one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdentity {
    name: String,
    credentials_dir: PathBuf,
}

impl ClusterIdentity {
    /// Create an identity; an empty name resolves to [`DEFAULT_CLUSTER_NAME`].
    ///
    /// The name is not validated here, see [`ClusterIdentity::validate`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_credentials_dir(name, default_credentials_dir())
    }

    /// Create an identity whose credentials file lives under `dir`
    pub fn with_credentials_dir(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        let mut name = name.into();
        if name.is_empty() {
            name = DEFAULT_CLUSTER_NAME.to_string();
        }
        Self {
            name,
            credentials_dir: dir.into(),
        }
    }

    /// The cluster name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label selector matching every node container of this cluster
    pub fn label(&self) -> String {
        format!("{}={}", CLUSTER_LABEL_KEY, self.name)
    }

    /// Directory the credentials file is written to
    pub fn credentials_dir(&self) -> &Path {
        &self.credentials_dir
    }

    /// Path of the generated credentials (kubeconfig) file
    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_dir
            .join(format!("{}{}", CREDENTIALS_FILE_PREFIX, self.name))
    }

    /// Check the name invariant.
    ///
    /// Called before creating new resources only. Deletion and listing skip it
    /// so clusters created under older, looser rules stay manageable.
    pub fn validate(&self) -> Result<()> {
        if !VALID_NAME_RE.is_match(&self.name) {
            return Err(Error::InvalidName {
                name: self.name.clone(),
                pattern: VALID_NAME_PATTERN.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ClusterIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER_NAME)
    }
}

fn default_credentials_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CREDENTIALS_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_resolves_to_default() {
        let empty = ClusterIdentity::new("");
        let explicit = ClusterIdentity::new(DEFAULT_CLUSTER_NAME);
        assert_eq!(empty.name(), DEFAULT_CLUSTER_NAME);
        assert_eq!(empty.label(), explicit.label());
        assert_eq!(empty.credentials_path(), explicit.credentials_path());
        assert_eq!(empty, explicit);
    }

    #[test]
    fn label_is_keyed_by_name() {
        let id = ClusterIdentity::new("dev");
        assert_eq!(id.label(), "io.x-k8s.kic.cluster=dev");
        assert_eq!(id.label(), ClusterIdentity::new("dev").label());
    }

    #[test]
    fn credentials_path_is_deterministic() {
        let a = ClusterIdentity::with_credentials_dir("dev", "/home/u/.kube");
        let b = ClusterIdentity::with_credentials_dir("dev", "/home/u/.kube");
        let c = ClusterIdentity::with_credentials_dir("prod", "/home/u/.kube");
        assert_eq!(a.credentials_path(), b.credentials_path());
        assert_ne!(a.credentials_path(), c.credentials_path());
        assert_eq!(
            a.credentials_path(),
            PathBuf::from("/home/u/.kube/kic-config-dev")
        );
    }

    #[test]
    fn default_credentials_dir_is_under_kube() {
        let id = ClusterIdentity::new("dev");
        assert!(id.credentials_dir().ends_with(".kube"));
    }

    #[test]
    fn valid_names_pass() {
        for name in ["kic", "dev", "my-cluster", "a.b_c-d", "CAPS", "0", "x.y.z"] {
            assert!(
                ClusterIdentity::new(name).validate().is_ok(),
                "expected {name} to be valid"
            );
        }
    }

    #[test]
    fn invalid_names_fail_with_pattern() {
        for name in ["has space", "slash/name", "colon:name", "ünïcode", "semi;colon", "a*"] {
            match ClusterIdentity::new(name).validate() {
                Err(Error::InvalidName { name: got, pattern }) => {
                    assert_eq!(got, name);
                    assert_eq!(pattern, VALID_NAME_PATTERN);
                }
                other => panic!("expected InvalidName for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn construction_does_not_validate() {
        let id = ClusterIdentity::new("legacy name");
        assert_eq!(id.label(), "io.x-k8s.kic.cluster=legacy name");
        assert!(id.validate().is_err());
    }
}
