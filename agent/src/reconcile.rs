use agent::{ClusterArgs, Workflow};
use clap::Args;
use common::Result;
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    cluster: ClusterArgs,
}

pub async fn pause(args: &Parameters) -> Result<()> {
    let wf = Workflow::load(&args.cluster).await?;
    wf.manager
        .pause_reconcile(&wf.stored(), &wf.file.cluster, &wf.provider)
        .await?;
    info!(cluster = %wf.file.cluster.name, "Reconciliation paused");
    Ok(())
}

pub async fn resume(args: &Parameters) -> Result<()> {
    let mut wf = Workflow::load(&args.cluster).await?;
    let stored = wf.stored();
    wf.manager
        .resume_reconcile(&stored, &mut wf.file.cluster, &mut wf.provider)
        .await?;
    info!(cluster = %stored.name, "Reconciliation resumed");
    Ok(())
}
