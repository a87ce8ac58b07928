use crate::config::{NetworkingConfig, ProviderConfig};
use async_trait::async_trait;
use common::{Cluster, ClusterSpec, DatacenterConfig, Error, Result, tables::DeploymentsByNamespace};
use manager::{FileWriter, Networking, Provider, WriteOptions};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

async fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        Some(p) => Ok(Some(tokio::fs::read(p).await?)),
        None => Ok(None),
    }
}

/// Provider serving manifests rendered ahead of time
pub struct StaticProvider {
    config: ProviderConfig,
    datacenter: DatacenterConfig,
    storage_class: Option<Vec<u8>>,
    mhc: Option<Vec<u8>>,
    writer: Arc<dyn FileWriter>,
}

impl StaticProvider {
    pub async fn load(
        config: ProviderConfig,
        datacenter: DatacenterConfig,
        writer: Arc<dyn FileWriter>,
    ) -> Result<StaticProvider> {
        let storage_class = read_optional(config.storage_class.as_deref()).await?;
        let mhc = read_optional(config.machine_health_checks.as_deref()).await?;
        Ok(StaticProvider {
            config,
            datacenter,
            storage_class,
            mhc,
            writer,
        })
    }

    #[must_use]
    pub fn datacenter(&self) -> &DatacenterConfig {
        &self.datacenter
    }

    async fn write_manifest(&self, manifest: &Path, file_name: &str) -> Result<PathBuf> {
        debug!(manifest = %manifest.display(), "Using provider manifest");
        let content = tokio::fs::read(manifest).await?;
        self.writer.write(file_name, &content, WriteOptions::default())
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    async fn generate_deployment_file_for_create(
        &self,
        _workload: &Cluster,
        _spec: &ClusterSpec,
        file_name: &str,
    ) -> Result<PathBuf> {
        self.write_manifest(&self.config.create_manifest, file_name)
            .await
    }

    async fn generate_deployment_file_for_upgrade(
        &self,
        _bootstrap: &Cluster,
        _workload: &Cluster,
        _spec: &ClusterSpec,
        file_name: &str,
    ) -> Result<PathBuf> {
        let manifest = self
            .config
            .upgrade_manifest
            .as_ref()
            .unwrap_or(&self.config.create_manifest);
        self.write_manifest(manifest, file_name).await
    }

    fn get_deployments(&self) -> DeploymentsByNamespace {
        self.config.deployments.clone()
    }

    fn generate_storage_class(&self) -> Option<Vec<u8>> {
        self.storage_class.clone()
    }

    fn generate_mhc(&self) -> Result<Vec<u8>> {
        Ok(self.mhc.clone().unwrap_or_default())
    }

    /// Point every cluster of the kubeconfig at the configured server
    fn update_kubeconfig(&self, kubeconfig: Vec<u8>, cluster_name: &str) -> Result<Vec<u8>> {
        let Some(server) = &self.config.kubeconfig_server else {
            return Ok(kubeconfig);
        };
        let mut config: serde_yaml::Value = serde_yaml::from_slice(&kubeconfig)?;
        let clusters = config
            .get_mut("clusters")
            .and_then(|c| c.as_sequence_mut())
            .ok_or_else(|| Error::Other(format!("kubeconfig of {cluster_name} has no clusters")))?;
        for entry in clusters {
            if let Some(cluster) = entry.get_mut("cluster").and_then(|c| c.as_mapping_mut()) {
                cluster.insert("server".into(), server.as_str().into());
            }
        }
        debug!(cluster = cluster_name, server = %server, "Rewrote kubeconfig server");
        Ok(serde_yaml::to_string(&config)?.into_bytes())
    }

    fn datacenter_resource_type(&self) -> String {
        self.config.datacenter_resource_type.clone()
    }

    fn machine_resource_type(&self) -> Option<String> {
        self.config.machine_resource_type.clone()
    }

    fn clear_datacenter_pause_annotation(&mut self) {
        self.datacenter.clear_pause_annotation();
    }
}

/// CNI manifest read from disk
#[derive(Default)]
pub struct StaticNetworking {
    manifest: Option<Vec<u8>>,
}

impl StaticNetworking {
    pub async fn load(config: &NetworkingConfig) -> Result<StaticNetworking> {
        Ok(StaticNetworking {
            manifest: read_optional(config.manifest.as_deref()).await?,
        })
    }
}

impl Networking for StaticNetworking {
    fn generate_manifest(&self, spec: &ClusterSpec) -> Result<Vec<u8>> {
        self.manifest.clone().ok_or_else(|| {
            Error::Precondition(format!(
                "no manifest configured for cni {}",
                spec.spec.cluster_network.cni
            ))
        })
    }
}
