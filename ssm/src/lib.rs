//! Remote shell commands over an SSM style channel
use async_trait::async_trait;
use common::Result;
#[cfg(test)]
use mockall::automock;
use std::fmt;

pub mod aws;
pub mod command;
pub use aws::AwsSsmChannel;
pub use command::{CommandOptions, CommandRunner};

pub static RUN_SHELL_SCRIPT: &str = "AWS-RunShellScript";
/// Seconds a command may run on the instance
pub static EXECUTION_TIMEOUT: &str = "10800";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Output {
    pub bucket: String,
    pub prefix: String,
}

/// Command submission, one instance at a time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendCommand {
    pub document_name: String,
    pub instance_id: String,
    pub commands: Vec<String>,
    pub execution_timeout: String,
    pub output_s3: Option<S3Output>,
}

impl SendCommand {
    #[must_use]
    pub fn shell(instance_id: &str, command: &str) -> SendCommand {
        SendCommand {
            document_name: RUN_SHELL_SCRIPT.to_string(),
            instance_id: instance_id.to_string(),
            commands: vec![command.to_string()],
            execution_timeout: EXECUTION_TIMEOUT.to_string(),
            output_s3: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvocationStatus {
    Pending,
    InProgress,
    Delayed,
    Success,
    Cancelled,
    Cancelling,
    TimedOut,
    Failed,
    Unknown(String),
}

impl InvocationStatus {
    /// Anything but the three in-flight statuses is final, unknown ones included
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(
            self,
            InvocationStatus::Pending | InvocationStatus::InProgress | InvocationStatus::Delayed
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        *self == InvocationStatus::Success
    }
}

impl From<&str> for InvocationStatus {
    fn from(status: &str) -> Self {
        match status {
            "Pending" => InvocationStatus::Pending,
            "InProgress" => InvocationStatus::InProgress,
            "Delayed" => InvocationStatus::Delayed,
            "Success" => InvocationStatus::Success,
            "Cancelled" => InvocationStatus::Cancelled,
            "Cancelling" => InvocationStatus::Cancelling,
            "TimedOut" => InvocationStatus::TimedOut,
            "Failed" => InvocationStatus::Failed,
            other => InvocationStatus::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            InvocationStatus::Pending => "Pending",
            InvocationStatus::InProgress => "InProgress",
            InvocationStatus::Delayed => "Delayed",
            InvocationStatus::Success => "Success",
            InvocationStatus::Cancelled => "Cancelled",
            InvocationStatus::Cancelling => "Cancelling",
            InvocationStatus::TimedOut => "TimedOut",
            InvocationStatus::Failed => "Failed",
            InvocationStatus::Unknown(s) => s,
        };
        f.write_str(status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub status: InvocationStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    #[must_use]
    pub fn new(status: &str, stdout: &str, stderr: &str) -> Invocation {
        Invocation {
            status: status.into(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Submit the command, returns its id
    async fn send_command(&self, command: &SendCommand) -> Result<String>;
    /// Fails until the command is registered for the instance
    async fn get_invocation(&self, command_id: &str, instance_id: &str) -> Result<Invocation>;
}
