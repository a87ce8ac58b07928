use crate::{CommandChannel, Invocation, S3Output, SendCommand};
use common::{Error, Result, Retrier};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const REGISTRATION_ATTEMPTS: u32 = 10;
pub const REGISTRATION_DELAY: Duration = Duration::from_secs(5);
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(180 * 60);
pub const READY_ATTEMPTS: u32 = 10;
pub const READY_DELAY: Duration = Duration::from_secs(20);

#[derive(Clone, Debug, Default)]
pub struct CommandOptions {
    pub output_s3: Option<S3Output>,
}

impl CommandOptions {
    #[must_use]
    pub fn with_output_to_s3(mut self, bucket: &str, prefix: &str) -> CommandOptions {
        self.output_s3 = Some(S3Output {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        self
    }
}

/// Runs shell commands on instances and waits for them to finish
#[derive(Clone)]
pub struct CommandRunner {
    channel: Arc<dyn CommandChannel>,
    cancel: CancellationToken,
}

impl CommandRunner {
    #[must_use]
    pub fn new(channel: Arc<dyn CommandChannel>) -> CommandRunner {
        CommandRunner {
            channel,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> CommandRunner {
        self.cancel = token;
        self
    }

    /// Wait until the agent on `instance_id` accepts commands
    pub async fn wait_for_ready(&self, instance_id: &str) -> Result<()> {
        Retrier::with_max_retries(READY_ATTEMPTS, READY_DELAY)
            .with_cancellation(self.cancel.clone())
            .retry("ssm to be ready", || async move {
                self.run(instance_id, "ls", &CommandOptions::default())
                    .await
                    .map(|_| ())
            })
            .await
    }

    /// Run `command` on `instance_id` and wait for a final status
    ///
    /// Submission is not retried. A final status other than success is a
    /// `CommandFailed` error carrying the outputs.
    pub async fn run(&self, instance_id: &str, command: &str, options: &CommandOptions) -> Result<Invocation> {
        let mut request = SendCommand::shell(instance_id, command);
        request.output_s3 = options.output_s3.clone();
        debug!(cmd = command, "Running ssm command");
        let command_id = self.channel.send_command(&request).await?;
        debug!(command_id = %command_id, "SSM command started");
        if let Some(s3) = &request.output_s3 {
            debug!(
                url = format!(
                    "s3://{}/{}/{}/{}/awsrunShellScript/0.awsrunShellScript/stderr",
                    s3.bucket, s3.prefix, command_id, instance_id
                ),
                "SSM command output to S3"
            );
        }

        let id = &command_id;
        debug!("Waiting for ssm command to be registered");
        Retrier::with_max_retries(REGISTRATION_ATTEMPTS, REGISTRATION_DELAY)
            .with_cancellation(self.cancel.clone())
            .retry("ssm command registration", || {
                self.channel.get_invocation(id, instance_id)
            })
            .await?;

        debug!("Waiting for ssm command to finish");
        let invocation = Retrier::new(COMPLETION_TIMEOUT)
            .with_cancellation(self.cancel.clone())
            .retry("ssm command to finish", || async move {
                let invocation = self.channel.get_invocation(id, instance_id).await?;
                if invocation.status.is_final() {
                    Ok(invocation)
                } else {
                    Err(Error::NotReady(format!(
                        "command {id} with status {}",
                        invocation.status
                    )))
                }
            })
            .await?;

        info!(command_id = %command_id, status = %invocation.status, "SSM command finished");
        info!("Command stdout:\n{}", invocation.stdout);
        info!("Command stderr:\n{}", invocation.stderr);
        if !invocation.status.is_success() {
            return Err(Error::CommandFailed {
                command_id,
                status: invocation.status.to_string(),
                stdout: invocation.stdout,
                stderr: invocation.stderr,
            });
        }
        Ok(invocation)
    }
}
