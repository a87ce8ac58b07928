use crate::{API_GROUP, API_VERSION, Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

/// Label set by CAPI on control-plane machines
pub static MACHINE_CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";
/// Label set by CAPI on machines owned by a MachineDeployment
pub static MACHINE_DEPLOYMENT_LABEL: &str = "cluster.x-k8s.io/deployment-name";

/// A management or workload cluster reachable through a kubeconfig
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Name of the cluster
    pub name: String,
    /// Kubeconfig used to reach the cluster, the default client config when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_file: Option<PathBuf>,
}

impl Cluster {
    #[must_use]
    pub fn new(name: &str, kubeconfig: Option<PathBuf>) -> Cluster {
        Cluster {
            name: name.to_string(),
            kubeconfig_file: kubeconfig,
        }
    }
}

/// Reference to another object by kind and name
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    pub kind: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub host: String,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfiguration {
    pub endpoint: Endpoint,
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNodeGroupConfiguration {
    #[serde(default)]
    pub name: String,
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEtcdConfiguration {
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_group_ref: Option<Ref>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CidrBlocks {
    pub cidr_blocks: Vec<String>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    pub pods: CidrBlocks,
    pub services: CidrBlocks,
    #[serde(default)]
    pub cni: String,
}

/// Declarative part of a cluster, compared as a whole during upgrades
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub kubernetes_version: String,
    pub control_plane_configuration: ControlPlaneConfiguration,
    #[serde(default)]
    pub worker_node_group_configurations: Vec<WorkerNodeGroupConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_etcd_configuration: Option<ExternalEtcdConfiguration>,
    pub datacenter_ref: Ref,
    #[serde(default)]
    pub cluster_network: ClusterNetwork,
}

/// Version bundle published alongside the cluster
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bundles {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
    /// Manifest of the lifecycle controllers shipped with this bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<PathBuf>,
    /// Objects applied to the workload cluster once it is created or upgraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_objects: Option<PathBuf>,
}

impl Bundles {
    #[must_use]
    pub fn to_manifest(&self) -> serde_json::Value {
        json!({
            "apiVersion": API_VERSION,
            "kind": "Bundles",
            "metadata": { "name": self.name },
            "spec": self.spec,
        })
    }
}

/// Desired state of a cluster
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub spec: ClusterConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundles: Option<Bundles>,
    /// Pre-rendered cluster manifest used instead of the provider generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_cluster_spec_file: Option<PathBuf>,
}

impl ClusterSpec {
    #[must_use]
    pub fn paused_annotation(&self) -> String {
        format!("{API_GROUP}/paused")
    }

    #[must_use]
    pub fn resource_type(&self) -> String {
        format!("clusters.{API_GROUP}")
    }

    pub fn clear_pause_annotation(&mut self) {
        let key = self.paused_annotation();
        self.annotations.remove(&key);
    }

    #[must_use]
    pub fn control_plane_machine_ref(&self) -> Option<&Ref> {
        self.spec.control_plane_configuration.machine_group_ref.as_ref()
    }

    /// Machine group of the first worker node group, the one the reconcilers track
    #[must_use]
    pub fn worker_machine_ref(&self) -> Option<&Ref> {
        self.spec
            .worker_node_group_configurations
            .first()
            .and_then(|w| w.machine_group_ref.as_ref())
    }

    #[must_use]
    pub fn etcd_machine_ref(&self) -> Option<&Ref> {
        self.spec
            .external_etcd_configuration
            .as_ref()
            .and_then(|e| e.machine_group_ref.as_ref())
    }

    /// Check that every machine group reference resolves to a known machine config
    pub fn validate(&self, machine_configs: &[MachineConfig]) -> Result<()> {
        let known: BTreeSet<&str> = machine_configs.iter().map(|m| m.name.as_str()).collect();
        let check = |what: &str, r: Option<&Ref>| -> Result<()> {
            match r {
                None => Err(Error::Precondition(format!("machineGroupRef for {what} is not defined"))),
                Some(r) if !known.contains(r.name.as_str()) => Err(Error::Precondition(format!(
                    "cannot find machine config {} referenced by {what}",
                    r.name
                ))),
                Some(_) => Ok(()),
            }
        };
        check("control plane", self.control_plane_machine_ref())?;
        if self.spec.worker_node_group_configurations.is_empty() {
            return Err(Error::Precondition("no worker node group defined".to_string()));
        }
        for group in &self.spec.worker_node_group_configurations {
            check("worker nodes", group.machine_group_ref.as_ref())?;
        }
        if self.spec.external_etcd_configuration.is_some() {
            check("etcd machines", self.etcd_machine_ref())?;
        }
        Ok(())
    }

    #[must_use]
    pub fn to_manifest(&self) -> serde_json::Value {
        let mut metadata = json!({ "name": self.name });
        if let Some(ns) = &self.namespace {
            metadata["namespace"] = json!(ns);
        }
        if !self.annotations.is_empty() {
            metadata["annotations"] = json!(self.annotations);
        }
        json!({
            "apiVersion": API_VERSION,
            "kind": "Cluster",
            "metadata": metadata,
            "spec": self.spec,
        })
    }
}

/// Provider datacenter object
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterConfig {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl DatacenterConfig {
    pub fn clear_pause_annotation(&mut self) {
        self.annotations.remove(&format!("{API_GROUP}/paused"));
    }

    #[must_use]
    pub fn to_manifest(&self) -> serde_json::Value {
        let mut metadata = json!({ "name": self.name });
        if !self.annotations.is_empty() {
            metadata["annotations"] = json!(self.annotations);
        }
        json!({
            "apiVersion": API_VERSION,
            "kind": self.kind,
            "metadata": metadata,
            "spec": self.spec,
        })
    }
}

/// Provider machine object a machine group reference points to
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl MachineConfig {
    #[must_use]
    pub fn to_manifest(&self) -> serde_json::Value {
        json!({
            "apiVersion": API_VERSION,
            "kind": self.kind,
            "metadata": { "name": self.name },
            "spec": self.spec,
        })
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// CAPI Machine as observed on the management cluster
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(default)]
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub status: MachineStatus,
}

impl Machine {
    /// A machine is ready once it joined as a node, provisioning status alone does not count
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.node_ref.is_some()
    }

    #[must_use]
    pub fn is_control_plane(&self) -> bool {
        self.metadata.labels.contains_key(MACHINE_CONTROL_PLANE_LABEL)
    }

    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.metadata.labels.contains_key(MACHINE_DEPLOYMENT_LABEL)
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// CAPI Cluster as observed on the management cluster
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CapiCluster {
    #[serde(default)]
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub status: CapiClusterStatus,
}

/// Namespaced workload whose availability or logs are needed
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl Deployment {
    #[must_use]
    pub fn new(name: &str, namespace: &str, container: Option<&str>) -> Deployment {
        Deployment {
            name: name.to_string(),
            namespace: namespace.to_string(),
            container: container.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_ref(name: &str) -> Option<Ref> {
        Some(Ref {
            kind: "VSphereMachineConfig".into(),
            name: name.into(),
        })
    }

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "test-cluster".into(),
            spec: ClusterConfig {
                kubernetes_version: "1.21".into(),
                control_plane_configuration: ControlPlaneConfiguration {
                    count: 3,
                    machine_group_ref: machine_ref("cp"),
                    ..Default::default()
                },
                worker_node_group_configurations: vec![WorkerNodeGroupConfiguration {
                    name: "md-0".into(),
                    count: 3,
                    machine_group_ref: machine_ref("worker"),
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn machine_configs(names: &[&str]) -> Vec<MachineConfig> {
        names
            .iter()
            .map(|n| MachineConfig {
                kind: "VSphereMachineConfig".into(),
                name: n.to_string(),
                spec: serde_json::Value::Null,
            })
            .collect()
    }

    #[test]
    fn test_machine_readiness_uses_node_ref() {
        let m: Machine = serde_json::from_value(json!({
            "metadata": {"name": "m1", "labels": {"cluster.x-k8s.io/control-plane": ""}},
            "status": {"phase": "Running"}
        }))
        .unwrap();
        assert!(m.is_control_plane());
        assert!(!m.is_worker());
        assert!(!m.is_ready());

        let m: Machine = serde_json::from_value(json!({
            "metadata": {"name": "m2", "labels": {"cluster.x-k8s.io/deployment-name": "md-0"}},
            "status": {"nodeRef": {"name": "node-2"}}
        }))
        .unwrap();
        assert!(m.is_worker());
        assert!(m.is_ready());
    }

    #[test]
    fn test_validate_resolves_machine_refs() {
        assert!(spec().validate(&machine_configs(&["cp", "worker"])).is_ok());
        let err = spec().validate(&machine_configs(&["cp"])).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_validate_requires_etcd_ref_when_configured() {
        let mut s = spec();
        s.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: None,
        });
        let err = s.validate(&machine_configs(&["cp", "worker"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Precondition failed: machineGroupRef for etcd machines is not defined"
        );
    }

    #[test]
    fn test_clear_pause_annotation() {
        let mut s = spec();
        s.annotations.insert(s.paused_annotation(), "true".into());
        s.annotations.insert("other".into(), "kept".into());
        s.clear_pause_annotation();
        assert_eq!(s.annotations.len(), 1);
        assert_eq!(s.paused_annotation(), "anywhere.eks.amazonaws.com/paused");
        assert_eq!(s.resource_type(), "clusters.anywhere.eks.amazonaws.com");
    }

    #[test]
    fn test_cluster_manifest() {
        let mut s = spec();
        s.namespace = Some("default".into());
        let manifest = s.to_manifest();
        assert_eq!(manifest["kind"], "Cluster");
        assert_eq!(manifest["metadata"]["namespace"], "default");
        assert_eq!(manifest["spec"]["controlPlaneConfiguration"]["machineGroupRef"]["name"], "cp");
        assert!(manifest["metadata"].get("annotations").is_none());
    }
}
