use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("K8s wait error: {0}")]
    KubeWaitError(#[from] kube::runtime::wait::Error),

    #[error("Kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    #[error("Elapsed wait error: {0}")]
    Elapsed(#[from] tokio::time::error::Elapsed),

    #[error("UTF8 error {0}")]
    UTF8(#[from] std::string::FromUtf8Error),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{0} not ready yet")]
    NotReady(String),

    #[error("retries exhausted waiting for {operation} after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("{resource} reached terminal status {status}")]
    TerminalStatus { resource: String, status: String },

    #[error("command {command_id} finished with status {status}")]
    CommandFailed {
        command_id: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("error moving CAPI management from source to target: {0}")]
    MoveFailed(#[source] Box<Error>),

    #[error("error waiting for {what}: {source}")]
    Wait {
        what: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{phase} failed while {step}: {source}")]
    Workflow {
        phase: Phase,
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Command channel error: {0}")]
    ChannelError(String),

    #[error("{0} failed: {1}")]
    ProcessFailed(String, String),

    #[error("Unsupported resource {0}")]
    UnsupportedResource(String),

    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Strips the context added by the orchestrator
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Workflow { source, .. } | Error::Wait { source, .. } => source.root(),
            e => e,
        }
    }

    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self.root(), Error::Precondition(_))
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.root(), Error::RetriesExhausted { .. })
    }

    /// The polled resource finished, but not successfully
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.root(),
            Error::TerminalStatus { .. } | Error::CommandFailed { .. }
        )
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.root(),
            Error::Precondition(_) | Error::Cancelled | Error::MoveFailed(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Workflow phase reported in errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Upgrade,
    Delete,
    Move,
    Pause,
    Resume,
    Install,
    Logs,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Create => "create",
            Phase::Upgrade => "upgrade",
            Phase::Delete => "delete",
            Phase::Move => "move",
            Phase::Pause => "pause",
            Phase::Resume => "resume",
            Phase::Install => "install",
            Phase::Logs => "logs",
        };
        f.write_str(name)
    }
}

/// Attach the workflow phase and step to a failing result
pub trait WorkflowContext<T> {
    fn step(self, phase: Phase, step: &str) -> Result<T>;
}

impl<T> WorkflowContext<T> for Result<T> {
    fn step(self, phase: Phase, step: &str) -> Result<T> {
        self.map_err(|e| Error::Workflow {
            phase,
            step: step.to_string(),
            source: Box::new(e),
        })
    }
}

/// Name the resource a failing wait was about
pub fn waiting_for<T>(res: Result<T>, what: impl Into<String>) -> Result<T> {
    res.map_err(|e| Error::Wait {
        what: what.into(),
        source: Box::new(e),
    })
}

pub mod context;
pub mod retrier;
pub mod tables;
pub mod types;
pub use retrier::Retrier;
pub use types::{
    Bundles, CapiCluster, Cluster, ClusterConfig, ClusterSpec, DatacenterConfig, Deployment, Machine,
    MachineConfig,
};

/// Namespace holding the cluster lifecycle objects on the management cluster
pub static SYSTEM_NAMESPACE: &str = "eksa-system";
/// API group of the cluster lifecycle custom resources
pub static API_GROUP: &str = "anywhere.eks.amazonaws.com";
pub static API_VERSION: &str = "anywhere.eks.amazonaws.com/v1alpha1";
