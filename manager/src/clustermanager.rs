use crate::{ClusterClient, FileWriter, Networking, Provider, WriteOptions};
use common::{
    Cluster, ClusterSpec, DatacenterConfig, Error, MachineConfig, Phase, Result, Retrier, SYSTEM_NAMESPACE,
    WorkflowContext,
    tables::{
        BACKOFF_PERIOD, CONTROL_PLANE_WAIT, ETCD_WAIT, MACHINE_BACKOFF, MACHINE_MAX_WAIT, MACHINES_MIN_WAIT,
        MAX_RETRIES,
    },
    types::Ref,
};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Drives cluster lifecycle workflows against a management cluster
///
/// Workflows only borrow `self`, so independent clusters can be handled
/// concurrently by the same manager.
#[derive(Clone)]
pub struct ClusterManager {
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) networking: Arc<dyn Networking>,
    pub(crate) writer: Arc<dyn FileWriter>,
    /// Shared by every single-call retry of the workflows
    pub(crate) retrier: Retrier,
    pub(crate) machine_max_wait: Duration,
    pub(crate) machine_backoff: Duration,
    pub(crate) machines_min_wait: Duration,
    pub(crate) cancel: CancellationToken,
}

impl ClusterManager {
    #[must_use]
    pub fn new(
        client: Arc<dyn ClusterClient>,
        networking: Arc<dyn Networking>,
        writer: Arc<dyn FileWriter>,
    ) -> ClusterManager {
        ClusterManager {
            client,
            networking,
            writer,
            retrier: Retrier::with_max_retries(MAX_RETRIES, BACKOFF_PERIOD),
            machine_max_wait: MACHINE_MAX_WAIT,
            machine_backoff: MACHINE_BACKOFF,
            machines_min_wait: MACHINES_MIN_WAIT,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_wait_for_machines(
        mut self,
        machine_backoff: Duration,
        machine_max_wait: Duration,
        machines_min_wait: Duration,
    ) -> ClusterManager {
        self.machine_backoff = machine_backoff;
        self.machine_max_wait = machine_max_wait;
        self.machines_min_wait = machines_min_wait;
        self
    }

    #[must_use]
    pub fn with_retrier(mut self, retrier: Retrier) -> ClusterManager {
        self.retrier = retrier.with_cancellation(self.cancel.clone());
        self
    }

    /// Every retry sleep and collaborator wait of this manager stops with
    /// `Error::Cancelled` once `token` fires
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> ClusterManager {
        self.retrier = self.retrier.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    /// Run a collaborator call until it completes or the manager is cancelled
    pub(crate) async fn cancellable<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            res = call => res,
        }
    }

    /// Create a workload cluster from the management cluster and return it with its kubeconfig
    pub async fn create_workload_cluster(
        &self,
        management: &Cluster,
        spec: &ClusterSpec,
        provider: &dyn Provider,
    ) -> Result<Cluster> {
        let mut workload = Cluster::new(&spec.name, None);
        self.apply_cluster(management, &mut workload, spec, provider, false)
            .await?;
        self.apply_extra_objects(&workload, spec, Phase::Create)
            .await?;
        info!(cluster = %workload.name, "Workload cluster created");
        Ok(workload)
    }

    pub async fn upgrade_cluster(
        &self,
        management: &Cluster,
        workload: &Cluster,
        spec: &ClusterSpec,
        provider: &dyn Provider,
    ) -> Result<()> {
        let mut target = workload.clone();
        self.apply_cluster(management, &mut target, spec, provider, true)
            .await?;
        if spec.spec.external_etcd_configuration.is_some() {
            debug!("Waiting for external etcd to be ready after upgrade");
            self.cancellable(
                self.client
                    .wait_for_managed_external_etcd_ready(management, ETCD_WAIT, &workload.name),
            )
            .await
                .step(Phase::Upgrade, "waiting for workload cluster etcd")?;
        }
        debug!("Waiting for control plane to be ready after upgrade");
        self.cancellable(
            self.client
                .wait_for_control_plane_ready(management, CONTROL_PLANE_WAIT, &workload.name),
        )
        .await
            .step(Phase::Upgrade, "waiting for workload cluster control plane")?;
        debug!("Waiting for workload cluster capi components to be ready after upgrade");
        self.wait_for_capi(workload, provider)
            .await
            .step(Phase::Upgrade, "waiting for workload cluster capi components")?;
        self.apply_extra_objects(workload, spec, Phase::Upgrade)
            .await?;
        info!(cluster = %workload.name, "Workload cluster upgraded");
        Ok(())
    }

    pub async fn delete_cluster(&self, management: &Cluster, cluster: &Cluster) -> Result<()> {
        self.retrier
            .retry("delete cluster", || self.client.delete_cluster(management, cluster))
            .await
            .step(Phase::Delete, "deleting cluster")
    }

    async fn apply_cluster(
        &self,
        management: &Cluster,
        workload: &mut Cluster,
        spec: &ClusterSpec,
        provider: &dyn Provider,
        upgrade: bool,
    ) -> Result<()> {
        let phase = if upgrade { Phase::Upgrade } else { Phase::Create };
        let spec_file = self
            .generate_deployment_file(management, workload, spec, provider, upgrade)
            .await
            .step(phase, "generating workload spec")?;
        self.retrier
            .retry("apply workload spec", || {
                self.client
                    .apply_kube_spec_with_namespace(management, &spec_file, SYSTEM_NAMESPACE)
            })
            .await
            .step(phase, "applying workload spec")?;

        if spec.spec.external_etcd_configuration.is_some() {
            debug!("Waiting for external etcd to be ready");
            self.cancellable(
                self.client
                    .wait_for_managed_external_etcd_ready(management, ETCD_WAIT, &workload.name),
            )
            .await
                .step(phase, "waiting for external etcd")?;
            debug!("External etcd is ready");
        }

        debug!("Waiting for control plane to be ready");
        self.cancellable(
            self.client
                .wait_for_control_plane_ready(management, CONTROL_PLANE_WAIT, &workload.name),
        )
        .await
            .step(phase, "waiting for workload cluster control plane")?;

        if !upgrade {
            let name = workload.name.clone();
            let kubeconfig = self
                .retrier
                .retry("generate workload kubeconfig", || {
                    self.generate_workload_kubeconfig(&name, management, provider)
                })
                .await
                .step(phase, "generating workload kubeconfig")?;
            workload.kubeconfig_file = Some(kubeconfig);
        }

        debug!("Waiting for controlplane and worker machines to be ready");
        self.wait_for_nodes_ready(management)
            .await
            .step(phase, "waiting for machines")
    }

    /// Objects of the version bundle that only go to the workload cluster
    async fn apply_extra_objects(&self, workload: &Cluster, spec: &ClusterSpec, phase: Phase) -> Result<()> {
        let Some(path) = spec.bundles.as_ref().and_then(|b| b.extra_objects.as_ref()) else {
            return Ok(());
        };
        let manifest = tokio::fs::read(path)
            .await
            .map_err(Error::Stdio)
            .step(phase, "loading extra resources")?;
        debug!(path = %path.display(), "Applying extra resources to workload cluster");
        self.retrier
            .retry("apply extra resources", || {
                self.client.apply_kube_spec_from_bytes(workload, &manifest)
            })
            .await
            .step(phase, "applying extra resources to workload cluster")
    }

    async fn generate_workload_kubeconfig(
        &self,
        cluster_name: &str,
        management: &Cluster,
        provider: &dyn Provider,
    ) -> Result<PathBuf> {
        let file_name = format!("{cluster_name}-eks-a-cluster.kubeconfig");
        let kubeconfig = self
            .client
            .get_workload_kubeconfig(cluster_name, management)
            .await?;
        let kubeconfig = provider.update_kubeconfig(kubeconfig, cluster_name)?;
        self.writer
            .write(&file_name, &kubeconfig, WriteOptions::persistent(0o600))
    }

    /// Cluster manifest for the workload, the override file when the spec sets one
    pub async fn generate_deployment_file(
        &self,
        bootstrap: &Cluster,
        workload: &Cluster,
        spec: &ClusterSpec,
        provider: &dyn Provider,
        upgrade: bool,
    ) -> Result<PathBuf> {
        let file_name = format!("{}-eks-a-cluster.yaml", spec.name);
        match &spec.override_cluster_spec_file {
            None if upgrade => {
                provider
                    .generate_deployment_file_for_upgrade(bootstrap, workload, spec, &file_name)
                    .await
            }
            None => {
                provider
                    .generate_deployment_file_for_create(workload, spec, &file_name)
                    .await
            }
            Some(path) => {
                debug!(path = %path.display(), "Using override cluster spec file");
                let content = tokio::fs::read(path).await?;
                self.writer
                    .write(&file_name, &content, WriteOptions::default())
            }
        }
    }

    pub async fn install_capi(&self, spec: &ClusterSpec, cluster: &Cluster, provider: &dyn Provider) -> Result<()> {
        self.client
            .init_infrastructure(spec, cluster, &provider.name())
            .await
            .step(Phase::Install, "initializing capi resources in cluster")?;
        self.wait_for_capi(cluster, provider)
            .await
            .step(Phase::Install, "waiting for capi components")
    }

    pub async fn install_networking(&self, cluster: &Cluster, spec: &ClusterSpec) -> Result<()> {
        let manifest = self
            .networking
            .generate_manifest(spec)
            .step(Phase::Install, "generating networking manifest")?;
        self.retrier
            .retry("apply networking manifest", || {
                self.client.apply_kube_spec_from_bytes(cluster, &manifest)
            })
            .await
            .step(Phase::Install, "applying networking manifest")
    }

    pub async fn install_storage_class(&self, cluster: &Cluster, provider: &dyn Provider) -> Result<()> {
        let Some(storage_class) = provider.generate_storage_class() else {
            return Ok(());
        };
        self.retrier
            .retry("apply storage class", || {
                self.client.apply_kube_spec_from_bytes(cluster, &storage_class)
            })
            .await
            .step(Phase::Install, "applying storage class manifest")
    }

    pub async fn install_machine_health_checks(&self, workload: &Cluster, provider: &dyn Provider) -> Result<()> {
        let mhc = provider
            .generate_mhc()
            .step(Phase::Install, "generating machine health checks")?;
        if mhc.is_empty() {
            debug!("Skipping machine health checks");
            return Ok(());
        }
        self.retrier
            .retry("apply machine health checks", || {
                self.client.apply_kube_spec_from_bytes(workload, &mhc)
            })
            .await
            .step(Phase::Install, "applying machine health checks")
    }

    /// Apply the lifecycle controllers shipped with the version bundle
    pub async fn install_custom_components(&self, spec: &ClusterSpec, cluster: &Cluster) -> Result<()> {
        let path = spec
            .bundles
            .as_ref()
            .and_then(|b| b.components.as_ref())
            .ok_or_else(|| Error::Precondition("version bundle has no components manifest".to_string()))
            .step(Phase::Install, "loading components manifest")?;
        let manifest = tokio::fs::read(path)
            .await
            .map_err(Error::Stdio)
            .step(Phase::Install, "loading components manifest")?;
        self.retrier
            .retry("apply components", || {
                self.client.apply_kube_spec_from_bytes(cluster, &manifest)
            })
            .await
            .step(Phase::Install, "applying components spec")
    }

    /// Store the cluster, datacenter and machine objects, then the version bundle
    pub async fn create_cluster_resources(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        datacenter: &DatacenterConfig,
        machine_configs: &[MachineConfig],
    ) -> Result<()> {
        let resources =
            marshal_cluster_spec(spec, datacenter, machine_configs).step(Phase::Install, "marshalling resources")?;
        debug!("Applying cluster resources");
        trace!("{}", String::from_utf8_lossy(&resources));
        self.retrier
            .retry("apply cluster resources", || {
                self.client.apply_kube_spec_from_bytes_force(cluster, &resources)
            })
            .await
            .step(Phase::Install, "applying cluster resources")?;
        self.apply_version_bundle(spec, cluster).await
    }

    async fn apply_version_bundle(&self, spec: &ClusterSpec, cluster: &Cluster) -> Result<()> {
        let Some(bundles) = &spec.bundles else {
            debug!("No version bundle to apply");
            return Ok(());
        };
        let mut bundles = bundles.clone();
        bundles.name = spec.name.clone();
        let manifest = serde_yaml::to_string(&bundles.to_manifest())
            .map_err(Error::YamlError)
            .step(Phase::Install, "marshalling version bundle")?;
        self.retrier
            .retry("apply version bundle", || {
                self.client.apply_kube_spec_from_bytes(cluster, manifest.as_bytes())
            })
            .await
            .step(Phase::Install, "applying bundle spec")
    }

    /// Whether the stored cluster differs from `spec` or from its provider objects
    pub async fn cluster_spec_changed(
        &self,
        cluster: &Cluster,
        spec: &ClusterSpec,
        datacenter: &DatacenterConfig,
        machine_configs: &[MachineConfig],
        provider: &dyn Provider,
    ) -> Result<bool> {
        let current = self.client.get_cluster_spec(cluster).await?;
        if current.spec != spec.spec {
            debug!("Existing cluster and new cluster spec differ");
            return Ok(true);
        }
        debug!("Clusters are the same, checking provider spec");
        let dc_ref = &current.spec.datacenter_ref;
        let existing_dc = self
            .client
            .get_datacenter_config(&dc_ref.kind, &dc_ref.name, cluster)
            .await?;
        if existing_dc.spec != datacenter.spec {
            debug!("New provider spec is different from the existing spec");
            return Ok(true);
        }
        if provider.machine_resource_type().is_none() {
            return Ok(false);
        }

        let by_name: BTreeMap<&str, &MachineConfig> = machine_configs.iter().map(|m| (m.name.as_str(), m)).collect();
        let mut groups = vec![
            ("control plane", current.control_plane_machine_ref(), spec.control_plane_machine_ref()),
            ("worker node", current.worker_machine_ref(), spec.worker_machine_ref()),
        ];
        if current.spec.external_etcd_configuration.is_some() {
            groups.push(("etcd", current.etcd_machine_ref(), spec.etcd_machine_ref()));
        }
        for (group, existing_ref, new_ref) in groups {
            let (existing_ref, new_ref) = refs_pair(group, existing_ref, new_ref)?;
            let existing = self
                .client
                .get_machine_config(&existing_ref.kind, &existing_ref.name, cluster)
                .await?;
            let Some(new) = by_name.get(new_ref.name.as_str()) else {
                return Err(Error::Precondition(format!(
                    "cannot find machine config {} for {group}",
                    new_ref.name
                )));
            };
            if existing.spec != new.spec {
                debug!(group, "New machine config spec is different from the existing spec");
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn refs_pair<'a>(group: &str, existing: Option<&'a Ref>, new: Option<&'a Ref>) -> Result<(&'a Ref, &'a Ref)> {
    match (existing, new) {
        (Some(e), Some(n)) => Ok((e, n)),
        _ => Err(Error::Precondition(format!("machineGroupRef for {group} is not defined"))),
    }
}

/// Multi-document YAML with the cluster, its datacenter and its machine configs
pub fn marshal_cluster_spec(
    spec: &ClusterSpec,
    datacenter: &DatacenterConfig,
    machine_configs: &[MachineConfig],
) -> Result<Vec<u8>> {
    let mut docs = vec![
        serde_yaml::to_string(&spec.to_manifest())?,
        serde_yaml::to_string(&datacenter.to_manifest())?,
    ];
    for m in machine_configs {
        docs.push(serde_yaml::to_string(&m.to_manifest())?);
    }
    Ok(docs.join("---\n").into_bytes())
}
