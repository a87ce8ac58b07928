use agent::{ClusterArgs, Workflow};
use clap::Args;
use common::{Phase, Result, WorkflowContext};
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    cluster: ClusterArgs,
    /// Install the CAPI components on the management cluster first
    #[arg(long, env = "INSTALL_CAPI")]
    install_capi: bool,
    /// Move the management objects into the new cluster once it is up
    #[arg(long, env = "SELF_MANAGED")]
    self_managed: bool,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let wf = Workflow::load(&args.cluster).await?;
    let spec = &wf.file.cluster;
    let manager = &wf.manager;
    if args.install_capi {
        manager
            .install_capi(spec, &wf.management, &wf.provider)
            .await?;
    }
    let workload = manager
        .create_workload_cluster(&wf.management, spec, &wf.provider)
        .await?;
    manager.install_networking(&workload, spec).await?;
    manager
        .install_storage_class(&workload, &wf.provider)
        .await?;

    let target = if args.self_managed {
        manager.install_capi(spec, &workload, &wf.provider).await?;
        manager.move_capi(&wf.management, &workload).await?;
        workload.clone()
    } else {
        wf.management.clone()
    };
    if spec.bundles.as_ref().is_some_and(|b| b.components.is_some()) {
        manager.install_custom_components(spec, &target).await?;
    }
    manager
        .create_cluster_resources(&target, spec, &wf.file.datacenter, &wf.file.machine_configs)
        .await?;
    manager
        .install_machine_health_checks(&target, &wf.provider)
        .await?;
    wf.writer
        .clean_up_temp()
        .step(Phase::Create, "removing generated files")?;
    info!(
        cluster = %workload.name,
        kubeconfig = ?workload.kubeconfig_file,
        "Cluster created"
    );
    Ok(())
}
