use clap::Args;
use common::{Cluster, Result};
use manager::{ClusterManager, DirWriter, FileWriter, KubeClusterClient};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub mod config;
pub mod provider;
pub use config::ClusterFile;
pub use provider::{StaticNetworking, StaticProvider};

#[derive(Args, Debug, Clone)]
pub struct ManagementArgs {
    /// Kubeconfig of the management cluster
    #[arg(short, long, env = "KUBECONFIG", value_name = "KUBECONFIG")]
    pub kubeconfig: PathBuf,
    /// Name of the management cluster
    #[arg(long, env = "MANAGEMENT_CLUSTER", default_value = "management")]
    pub management_name: String,
    /// Directory receiving kubeconfigs, manifests and logs
    #[arg(short, long, env = "OUTPUT_DIR", value_name = "DIR", default_value = ".")]
    pub output: PathBuf,
    /// clusterctl binary
    #[arg(long, env = "CLUSTERCTL", default_value = "clusterctl")]
    pub clusterctl: PathBuf,
}

impl ManagementArgs {
    #[must_use]
    pub fn management(&self) -> Cluster {
        Cluster::new(&self.management_name, Some(self.kubeconfig.clone()))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    #[command(flatten)]
    pub management: ManagementArgs,
    /// Cluster configuration file
    #[arg(short, long, env = "CLUSTER_CONFIG", value_name = "FILE")]
    pub config: PathBuf,
}

/// Cancelled on the first interrupt, workflows stop at their next wait
#[must_use]
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next wait");
            cancel.cancel();
        }
    });
    token
}

/// What a cluster workflow runs with
pub struct Workflow {
    pub manager: ClusterManager,
    pub writer: Arc<dyn FileWriter>,
    pub file: ClusterFile,
    pub provider: StaticProvider,
    pub management: Cluster,
}

impl Workflow {
    pub async fn load(args: &ClusterArgs) -> Result<Workflow> {
        let file = ClusterFile::load(&args.config).await?;
        let writer: Arc<dyn FileWriter> = Arc::new(DirWriter::new(&args.management.output)?);
        let provider =
            StaticProvider::load(file.provider.clone(), file.datacenter.clone(), writer.clone()).await?;
        let networking = StaticNetworking::load(&file.networking).await?;
        Ok(Workflow {
            manager: manager_for(&args.management, writer.clone(), Arc::new(networking)),
            writer,
            file,
            provider,
            management: args.management.management(),
        })
    }

    /// The lifecycle objects of the cluster, stored on the management cluster
    #[must_use]
    pub fn stored(&self) -> Cluster {
        Cluster::new(&self.file.cluster.name, self.management.kubeconfig_file.clone())
    }

    /// The workload cluster, with the kubeconfig a previous create wrote
    #[must_use]
    pub fn workload(&self) -> Cluster {
        let name = &self.file.cluster.name;
        Cluster::new(
            name,
            Some(self.writer.dir().join(format!("{name}-eks-a-cluster.kubeconfig"))),
        )
    }
}

#[must_use]
pub fn manager_for(
    args: &ManagementArgs,
    writer: Arc<dyn FileWriter>,
    networking: Arc<dyn manager::Networking>,
) -> ClusterManager {
    ClusterManager::new(Arc::new(KubeClusterClient::new(&args.clusterctl)), networking, writer)
        .with_cancellation(shutdown_token())
}
