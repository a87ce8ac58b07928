use common::{ClusterSpec, DatacenterConfig, Error, MachineConfig, Result, tables::DeploymentsByNamespace};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Infrastructure provider backed by pre-rendered manifests
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// clusterctl infrastructure provider name
    pub name: String,
    /// Resource type of the datacenter object, `plural.group`
    pub datacenter_resource_type: String,
    /// Resource type of the machine configs, unset for providers without any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_resource_type: Option<String>,
    /// CAPI manifest applied to create the cluster
    pub create_manifest: PathBuf,
    /// CAPI manifest applied to upgrade the cluster, the create one when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_manifest: Option<PathBuf>,
    /// Provider controllers to wait for
    #[serde(default)]
    pub deployments: DeploymentsByNamespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_health_checks: Option<PathBuf>,
    /// API server address written in the workload kubeconfig instead of the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_server: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingConfig {
    /// CNI manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
}

/// Everything a workflow needs to know about one cluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFile {
    pub cluster: ClusterSpec,
    pub datacenter: DatacenterConfig,
    #[serde(default)]
    pub machine_configs: Vec<MachineConfig>,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub networking: NetworkingConfig,
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

impl ClusterFile {
    pub fn from_yaml(data: &str) -> Result<ClusterFile> {
        let file: ClusterFile = serde_yaml::from_str(data)?;
        file.validate()?;
        Ok(file)
    }

    /// Read `path`, relative manifest paths are taken from its directory
    pub async fn load(path: &Path) -> Result<ClusterFile> {
        let data = tokio::fs::read_to_string(path).await?;
        let mut file = ClusterFile::from_yaml(&data)?;
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        file.resolve_paths(&base);
        Ok(file)
    }

    fn resolve_paths(&mut self, base: &Path) {
        resolve(base, &mut self.provider.create_manifest);
        for path in [
            &mut self.provider.upgrade_manifest,
            &mut self.provider.storage_class,
            &mut self.provider.machine_health_checks,
            &mut self.networking.manifest,
            &mut self.cluster.override_cluster_spec_file,
        ]
        .into_iter()
        .flatten()
        {
            resolve(base, path);
        }
        if let Some(bundles) = self.cluster.bundles.as_mut() {
            for path in [&mut bundles.components, &mut bundles.extra_objects].into_iter().flatten() {
                resolve(base, path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.is_empty() {
            return Err(Error::Precondition("cluster name is not set".to_string()));
        }
        if self.cluster.spec.datacenter_ref.name != self.datacenter.name {
            return Err(Error::Precondition(format!(
                "datacenter {} is not the one referenced by the cluster",
                self.datacenter.name
            )));
        }
        if self.provider.machine_resource_type.is_some() {
            self.cluster.validate(&self.machine_configs)?;
        }
        Ok(())
    }
}
