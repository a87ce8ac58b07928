use crate::{CommandChannel, Invocation, InvocationStatus, SendCommand};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ssm::{Client, error::DisplayErrorContext};
use common::{Error, Result};

/// `CommandChannel` backed by the AWS Systems Manager API
#[derive(Clone, Debug)]
pub struct AwsSsmChannel {
    client: Client,
}

impl AwsSsmChannel {
    #[must_use]
    pub fn new(client: Client) -> AwsSsmChannel {
        AwsSsmChannel { client }
    }

    /// Credentials and region from the usual environment chain
    pub async fn from_env(region: Option<String>) -> AwsSsmChannel {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        AwsSsmChannel::new(Client::new(&loader.load().await))
    }
}

#[async_trait]
impl CommandChannel for AwsSsmChannel {
    async fn send_command(&self, command: &SendCommand) -> Result<String> {
        let mut request = self
            .client
            .send_command()
            .document_name(&command.document_name)
            .instance_ids(&command.instance_id)
            .parameters("commands", command.commands.clone())
            .parameters("executionTimeout", vec![command.execution_timeout.clone()]);
        if let Some(s3) = &command.output_s3 {
            request = request
                .output_s3_bucket_name(&s3.bucket)
                .output_s3_key_prefix(&s3.prefix);
        }
        let output = request
            .send()
            .await
            .map_err(|e| Error::ChannelError(format!("error sending ssm command: {}", DisplayErrorContext(&e))))?;
        output
            .command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .ok_or_else(|| Error::ChannelError("ssm command has no id".to_string()))
    }

    async fn get_invocation(&self, command_id: &str, instance_id: &str) -> Result<Invocation> {
        let output = self
            .client
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| {
                Error::ChannelError(format!(
                    "error getting ssm command invocation: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(Invocation {
            status: output
                .status()
                .map_or(InvocationStatus::Unknown(String::new()), |s| s.as_str().into()),
            stdout: output.standard_output_content().unwrap_or_default().to_string(),
            stderr: output.standard_error_content().unwrap_or_default().to_string(),
        })
    }
}
