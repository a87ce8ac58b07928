use agent::{ClusterArgs, Workflow};
use clap::Args;
use common::Result;
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    cluster: ClusterArgs,
    /// Upgrade even when the stored cluster matches the configuration
    #[arg(long)]
    force: bool,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let mut wf = Workflow::load(&args.cluster).await?;
    let workload = wf.workload();
    let stored = wf.stored();
    let manager = &wf.manager;
    let changed = manager
        .cluster_spec_changed(
            &stored,
            &wf.file.cluster,
            &wf.file.datacenter,
            &wf.file.machine_configs,
            &wf.provider,
        )
        .await?;
    if !changed && !args.force {
        info!(cluster = %workload.name, "No upgrade needed");
        return Ok(());
    }

    manager
        .upgrade_paused(
            &wf.management,
            &stored,
            &workload,
            &mut wf.file.cluster,
            &wf.file.datacenter,
            &wf.file.machine_configs,
            &mut wf.provider,
        )
        .await?;
    info!(cluster = %workload.name, "Cluster upgraded");
    Ok(())
}
