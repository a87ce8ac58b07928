use async_trait::async_trait;
use common::{
    CapiCluster, Cluster, ClusterSpec, DatacenterConfig, Deployment, Machine, MachineConfig, Result,
    tables::DeploymentsByNamespace,
};
#[cfg(test)]
use mockall::automock;
use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

/// Transport to the cluster-API objects of a management cluster
///
/// Every method takes the cluster it talks to. An empty namespace means the
/// default namespace of that cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Hand the CAPI objects of `from` over to `to`
    async fn move_management(&self, from: &Cluster, to: &Cluster) -> Result<()>;
    async fn apply_kube_spec(&self, cluster: &Cluster, file: &Path) -> Result<()>;
    async fn apply_kube_spec_with_namespace(&self, cluster: &Cluster, file: &Path, namespace: &str) -> Result<()>;
    async fn apply_kube_spec_from_bytes(&self, cluster: &Cluster, data: &[u8]) -> Result<()>;
    async fn apply_kube_spec_from_bytes_force(&self, cluster: &Cluster, data: &[u8]) -> Result<()>;
    async fn wait_for_control_plane_ready(&self, cluster: &Cluster, timeout: Duration, cluster_name: &str) -> Result<()>;
    async fn wait_for_managed_external_etcd_ready(
        &self,
        cluster: &Cluster,
        timeout: Duration,
        cluster_name: &str,
    ) -> Result<()>;
    async fn wait_for_deployment(
        &self,
        cluster: &Cluster,
        timeout: Duration,
        condition: &str,
        target: &str,
        namespace: &str,
    ) -> Result<()>;
    async fn get_workload_kubeconfig(&self, cluster_name: &str, cluster: &Cluster) -> Result<Vec<u8>>;
    async fn delete_cluster(&self, management: &Cluster, cluster: &Cluster) -> Result<()>;
    /// Install the CAPI core components and the infrastructure provider named `provider`
    async fn init_infrastructure(&self, spec: &ClusterSpec, cluster: &Cluster, provider: &str) -> Result<()>;
    /// Logs of the first pod of a deployment
    async fn get_deployment_logs(&self, cluster: &Cluster, deployment: &Deployment) -> Result<Vec<u8>>;
    async fn get_machines(&self, cluster: &Cluster) -> Result<Vec<Machine>>;
    async fn get_clusters(&self, cluster: &Cluster) -> Result<Vec<CapiCluster>>;
    /// The cluster spec stored on the management cluster
    async fn get_cluster_spec(&self, cluster: &Cluster) -> Result<ClusterSpec>;
    async fn get_datacenter_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<DatacenterConfig>;
    async fn get_machine_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<MachineConfig>;
    async fn update_annotation_in_namespace(
        &self,
        resource_type: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()>;
    /// Removing an absent key is not an error
    async fn remove_annotation_in_namespace(
        &self,
        resource_type: &str,
        name: &str,
        key: &str,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()>;
}

/// Infrastructure provider capabilities, selected once per workflow
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> String;
    async fn generate_deployment_file_for_create(
        &self,
        workload: &Cluster,
        spec: &ClusterSpec,
        file_name: &str,
    ) -> Result<PathBuf>;
    async fn generate_deployment_file_for_upgrade(
        &self,
        bootstrap: &Cluster,
        workload: &Cluster,
        spec: &ClusterSpec,
        file_name: &str,
    ) -> Result<PathBuf>;
    /// Provider controllers to wait for, on top of the CAPI ones
    fn get_deployments(&self) -> DeploymentsByNamespace;
    fn generate_storage_class(&self) -> Option<Vec<u8>>;
    fn generate_mhc(&self) -> Result<Vec<u8>>;
    fn update_kubeconfig(&self, kubeconfig: Vec<u8>, cluster_name: &str) -> Result<Vec<u8>>;
    fn datacenter_resource_type(&self) -> String;
    /// None for providers without machine configs
    fn machine_resource_type(&self) -> Option<String>;
    fn clear_datacenter_pause_annotation(&mut self);
}

#[cfg_attr(test, automock)]
pub trait Networking: Send + Sync {
    /// CNI manifest for the cluster
    fn generate_manifest(&self, spec: &ClusterSpec) -> Result<Vec<u8>>;
}

pub mod filewriter;
pub use filewriter::{DirWriter, FileWriter, WriteOptions};
pub mod clustermanager;
pub use clustermanager::ClusterManager;
pub mod k8sclient;
pub use k8sclient::KubeClusterClient;
mod logs;
mod movecapi;
mod readiness;
mod reconcile;
#[cfg(test)]
mod testutil;
