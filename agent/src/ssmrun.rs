use clap::Args;
use common::Result;
use ssm::{AwsSsmChannel, CommandOptions, CommandRunner};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct Parameters {
    /// Target instance
    #[arg(short, long, env = "INSTANCE_ID")]
    instance_id: String,
    /// Shell command to run
    #[arg(short, long)]
    command: String,
    /// Bucket receiving the command output
    #[arg(long, env = "SSM_OUTPUT_BUCKET", requires = "s3_prefix")]
    s3_bucket: Option<String>,
    #[arg(long, env = "SSM_OUTPUT_PREFIX", requires = "s3_bucket")]
    s3_prefix: Option<String>,
    /// AWS region, from the environment when unset
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,
    /// Wait for the instance to accept commands first
    #[arg(long)]
    wait_ready: bool,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let channel = AwsSsmChannel::from_env(args.region.clone()).await;
    let runner = CommandRunner::new(Arc::new(channel)).with_cancellation(agent::shutdown_token());
    if args.wait_ready {
        runner.wait_for_ready(&args.instance_id).await?;
    }
    let mut options = CommandOptions::default();
    if let (Some(bucket), Some(prefix)) = (&args.s3_bucket, &args.s3_prefix) {
        options = options.with_output_to_s3(bucket, prefix);
    }
    let invocation = runner.run(&args.instance_id, &args.command, &options).await?;
    print!("{}", invocation.stdout);
    Ok(())
}
