//! Error types for kic
//!
//! Errors are structured with fields so a failure can be traced back to the
//! lifecycle stage that produced it: the offending cluster name, the pipeline
//! action, the label selector or the file path involved.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for cluster lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Cluster name does not match the accepted character class
    #[error("'{name}' is not a valid cluster name, cluster names must match `{pattern}`")]
    InvalidName {
        /// The rejected name
        name: String,
        /// The pattern names must match
        pattern: String,
    },

    /// The (defaulted) cluster configuration failed validation
    #[error("invalid cluster configuration: {message}")]
    ConfigInvalid {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "nodes[1].image")
        field: Option<String>,
    },

    /// Node topology could not be derived from the configuration
    #[error("failed to derive node topology: {message}")]
    Derivation {
        /// Description of what failed
        message: String,
    },

    /// The derived node topology is inconsistent
    #[error("invalid node topology: {message}")]
    TopologyInvalid {
        /// Description of what's invalid
        message: String,
    },

    /// A node container could not be created
    #[error("failed to provision node [{node}]: {message}")]
    Provisioning {
        /// Container name of the node, or "unknown"
        node: String,
        /// Description of what failed
        message: String,
    },

    /// A named action of the post-provisioning pipeline failed
    #[error("action '{action}' failed: {message}")]
    Pipeline {
        /// Name of the failed action (e.g., "control-plane-init")
        action: String,
        /// Description of what failed
        message: String,
    },

    /// Listing the nodes of a cluster failed
    #[error("error listing nodes for {selector}: {source}")]
    List {
        /// The label selector that was queried
        selector: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Removing node containers failed
    #[error("failed to delete nodes: {message}")]
    NodeDeletion {
        /// Description of what failed
        message: String,
    },

    /// The credentials file could not be removed (never fatal)
    #[error("tried to remove {} but received error: {source}", .path.display())]
    CredentialsRemoval {
        /// The credentials file path
        path: PathBuf,
        /// The underlying io failure
        #[source]
        source: std::io::Error,
    },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed: {message}")]
    Command {
        /// The command line that was run
        command: String,
        /// Captured stderr or spawn failure
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "wait_for_nodes_ready")
        context: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML decoding error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration error without a field path
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        let field = field.into();
        Self::ConfigInvalid {
            message: format!("{}: {}", field, msg.into()),
            field: Some(field),
        }
    }

    /// Create a topology derivation error
    pub fn derivation(msg: impl Into<String>) -> Self {
        Self::Derivation {
            message: msg.into(),
        }
    }

    /// Create a topology validation error
    pub fn topology_invalid(msg: impl Into<String>) -> Self {
        Self::TopologyInvalid {
            message: msg.into(),
        }
    }

    /// Create a provisioning error not tied to a single node
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning {
            node: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a provisioning error for a specific node
    pub fn provisioning_for(node: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            node: node.into(),
            message: msg.into(),
        }
    }

    /// Create a pipeline error for the named action
    pub fn pipeline(action: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Pipeline {
            action: action.into(),
            message: msg.into(),
        }
    }

    /// Wrap a listing failure with the selector that was queried
    pub fn list(selector: impl Into<String>, source: Error) -> Self {
        Self::List {
            selector: selector.into(),
            source: Box::new(source),
        }
    }

    /// Create a node deletion error
    pub fn node_deletion(msg: impl Into<String>) -> Self {
        Self::NodeDeletion {
            message: msg.into(),
        }
    }

    /// Create a command failure error
    pub fn command(command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Name of the pipeline action that failed, if this is a pipeline error
    pub fn failed_action(&self) -> Option<&str> {
        match self {
            Self::Pipeline { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Whether this error happened before any container was touched.
    ///
    /// Such errors never require cleanup.
    pub fn is_pre_provisioning(&self) -> bool {
        matches!(
            self,
            Self::InvalidName { .. }
                | Self::ConfigInvalid { .. }
                | Self::Derivation { .. }
                | Self::TopologyInvalid { .. }
        )
    }
}
