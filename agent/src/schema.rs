use agent::ClusterFile;
use clap::Args;
use common::Result;

#[derive(Args, Debug)]
pub struct Parameters {}

/// Print the JSON schema of the cluster configuration file
pub async fn run(_args: &Parameters) -> Result<()> {
    let schema = schemars::schema_for!(ClusterFile);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
