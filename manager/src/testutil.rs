use crate::{ClusterClient, MockClusterClient};
use async_trait::async_trait;
use common::{
    CapiCluster, Cluster, ClusterConfig, ClusterSpec, DatacenterConfig, Deployment, Machine, MachineConfig, Result,
    types::{
        ControlPlaneConfiguration, MACHINE_CONTROL_PLANE_LABEL, MACHINE_DEPLOYMENT_LABEL, MachineStatus, NodeRef,
        ObjectMetadata, Ref, WorkerNodeGroupConfiguration,
    },
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

pub fn management() -> Cluster {
    Cluster::new("management", Some(PathBuf::from("/out/management.kubeconfig")))
}

pub fn workload() -> Cluster {
    Cluster::new("test-cluster", Some(PathBuf::from("/out/test-cluster-eks-a-cluster.kubeconfig")))
}

pub fn machine_ref(name: &str) -> Option<Ref> {
    Some(Ref {
        kind: "VSphereMachineConfig".into(),
        name: name.into(),
    })
}

pub fn cluster_spec() -> ClusterSpec {
    ClusterSpec {
        name: "test-cluster".into(),
        spec: ClusterConfig {
            kubernetes_version: "1.21".into(),
            control_plane_configuration: ControlPlaneConfiguration {
                count: 1,
                machine_group_ref: machine_ref("cp"),
                ..Default::default()
            },
            worker_node_group_configurations: vec![WorkerNodeGroupConfiguration {
                name: "md-0".into(),
                count: 1,
                machine_group_ref: machine_ref("worker"),
            }],
            datacenter_ref: Ref {
                kind: "VSphereDatacenterConfig".into(),
                name: "datacenter".into(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn datacenter() -> DatacenterConfig {
    DatacenterConfig {
        kind: "VSphereDatacenterConfig".into(),
        name: "datacenter".into(),
        annotations: BTreeMap::new(),
        spec: serde_json::json!({"server": "vcenter.local"}),
    }
}

pub fn machine_configs() -> Vec<MachineConfig> {
    ["cp", "worker"]
        .into_iter()
        .map(|name| MachineConfig {
            kind: "VSphereMachineConfig".into(),
            name: name.into(),
            spec: serde_json::Value::Null,
        })
        .collect()
}

/// `total` labelled machines, the first `ready` of them with a node
pub fn machines(total: usize, ready: usize) -> Vec<Machine> {
    (0..total)
        .map(|i| {
            let label = if i == 0 {
                MACHINE_CONTROL_PLANE_LABEL
            } else {
                MACHINE_DEPLOYMENT_LABEL
            };
            Machine {
                metadata: ObjectMetadata {
                    name: format!("machine-{i}"),
                    labels: BTreeMap::from([(label.to_string(), "md-0".to_string())]),
                },
                status: MachineStatus {
                    node_ref: (i < ready).then(|| NodeRef {
                        name: format!("node-{i}"),
                    }),
                    phase: None,
                },
            }
        })
        .collect()
}

/// Client whose condition waits take their whole timeout before answering
///
/// Every other call goes to `inner`.
pub struct SlowWaits {
    pub inner: MockClusterClient,
}

#[async_trait]
impl ClusterClient for SlowWaits {
    async fn move_management(&self, from: &Cluster, to: &Cluster) -> Result<()> {
        self.inner.move_management(from, to).await
    }

    async fn apply_kube_spec(&self, cluster: &Cluster, file: &Path) -> Result<()> {
        self.inner.apply_kube_spec(cluster, file).await
    }

    async fn apply_kube_spec_with_namespace(&self, cluster: &Cluster, file: &Path, namespace: &str) -> Result<()> {
        self.inner
            .apply_kube_spec_with_namespace(cluster, file, namespace)
            .await
    }

    async fn apply_kube_spec_from_bytes(&self, cluster: &Cluster, data: &[u8]) -> Result<()> {
        self.inner.apply_kube_spec_from_bytes(cluster, data).await
    }

    async fn apply_kube_spec_from_bytes_force(&self, cluster: &Cluster, data: &[u8]) -> Result<()> {
        self.inner.apply_kube_spec_from_bytes_force(cluster, data).await
    }

    async fn wait_for_control_plane_ready(&self, cluster: &Cluster, timeout: Duration, cluster_name: &str) -> Result<()> {
        tokio::time::sleep(timeout).await;
        self.inner
            .wait_for_control_plane_ready(cluster, timeout, cluster_name)
            .await
    }

    async fn wait_for_managed_external_etcd_ready(
        &self,
        cluster: &Cluster,
        timeout: Duration,
        cluster_name: &str,
    ) -> Result<()> {
        tokio::time::sleep(timeout).await;
        self.inner
            .wait_for_managed_external_etcd_ready(cluster, timeout, cluster_name)
            .await
    }

    async fn wait_for_deployment(
        &self,
        cluster: &Cluster,
        timeout: Duration,
        condition: &str,
        target: &str,
        namespace: &str,
    ) -> Result<()> {
        tokio::time::sleep(timeout).await;
        self.inner
            .wait_for_deployment(cluster, timeout, condition, target, namespace)
            .await
    }

    async fn get_workload_kubeconfig(&self, cluster_name: &str, cluster: &Cluster) -> Result<Vec<u8>> {
        self.inner.get_workload_kubeconfig(cluster_name, cluster).await
    }

    async fn delete_cluster(&self, management: &Cluster, cluster: &Cluster) -> Result<()> {
        self.inner.delete_cluster(management, cluster).await
    }

    async fn init_infrastructure(&self, spec: &ClusterSpec, cluster: &Cluster, provider: &str) -> Result<()> {
        self.inner.init_infrastructure(spec, cluster, provider).await
    }

    async fn get_deployment_logs(&self, cluster: &Cluster, deployment: &Deployment) -> Result<Vec<u8>> {
        self.inner.get_deployment_logs(cluster, deployment).await
    }

    async fn get_machines(&self, cluster: &Cluster) -> Result<Vec<Machine>> {
        self.inner.get_machines(cluster).await
    }

    async fn get_clusters(&self, cluster: &Cluster) -> Result<Vec<CapiCluster>> {
        self.inner.get_clusters(cluster).await
    }

    async fn get_cluster_spec(&self, cluster: &Cluster) -> Result<ClusterSpec> {
        self.inner.get_cluster_spec(cluster).await
    }

    async fn get_datacenter_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<DatacenterConfig> {
        self.inner.get_datacenter_config(kind, name, cluster).await
    }

    async fn get_machine_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<MachineConfig> {
        self.inner.get_machine_config(kind, name, cluster).await
    }

    async fn update_annotation_in_namespace(
        &self,
        resource_type: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()> {
        self.inner
            .update_annotation_in_namespace(resource_type, name, annotations, cluster, namespace)
            .await
    }

    async fn remove_annotation_in_namespace(
        &self,
        resource_type: &str,
        name: &str,
        key: &str,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()> {
        self.inner
            .remove_annotation_in_namespace(resource_type, name, key, cluster, namespace)
            .await
    }
}
