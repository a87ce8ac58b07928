use crate::ClusterClient;
use async_trait::async_trait;
use common::{
    API_GROUP, CapiCluster, Cluster, ClusterSpec, DatacenterConfig, Deployment, Error, Machine, MachineConfig,
    Result, SYSTEM_NAMESPACE,
    context::{client_for, get_client_name},
};
use k8s_openapi::api::{
    apps::v1::Deployment as K8sDeployment,
    core::v1::{Pod, Secret},
};
use kube::{
    Client, ResourceExt,
    api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    runtime::wait::{Condition, await_condition},
};
use serde::Deserialize;
use serde_json::json;
use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

static CAPI_GROUP: &str = "cluster.x-k8s.io";
static CAPI_VERSION: &str = "v1beta1";

fn capi_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(CAPI_GROUP, CAPI_VERSION, kind), plural)
}

fn lifecycle_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(API_GROUP, "v1alpha1", kind))
}

/// True once the object reports condition `cond` with status True
pub fn is_condition(cond: &str) -> impl Condition<DynamicObject> + '_ {
    move |obj: Option<&DynamicObject>| {
        obj.and_then(|o| o.data.get("status"))
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
            .is_some_and(|conditions| {
                conditions.iter().any(|c| {
                    c.get("type").and_then(|t| t.as_str()) == Some(cond)
                        && c.get("status").and_then(|s| s.as_str()) == Some("True")
                })
            })
    }
}

pub fn is_deployment_condition(cond: &str) -> impl Condition<K8sDeployment> + '_ {
    move |obj: Option<&K8sDeployment>| {
        obj.and_then(|d| d.status.as_ref())
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == cond && c.status == "True"))
    }
}

fn from_object<T: serde::de::DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn split_resource_type(resource_type: &str) -> Result<(&str, &str)> {
    resource_type
        .split_once('.')
        .ok_or_else(|| Error::UnsupportedResource(resource_type.to_string()))
}

/// Find a resource by `plural.group` the way kubectl does
fn resolve_resource_type(discovery: &Discovery, resource_type: &str) -> Result<(ApiResource, ApiCapabilities)> {
    let (plural, group) = split_resource_type(resource_type)?;
    discovery
        .groups()
        .filter(|g| g.name() == group)
        .flat_map(|g| g.recommended_resources())
        .find(|(ar, _)| ar.plural == plural)
        .ok_or_else(|| Error::UnsupportedResource(resource_type.to_string()))
}

fn dynamic_api(client: &Client, ar: &ApiResource, caps: &ApiCapabilities, namespace: Option<&str>) -> Api<DynamicObject> {
    match (&caps.scope, namespace) {
        (Scope::Cluster, _) => Api::all_with(client.clone(), ar),
        (_, Some(ns)) if !ns.is_empty() => Api::namespaced_with(client.clone(), ns, ar),
        _ => Api::default_namespaced_with(client.clone(), ar),
    }
}

/// Every non-empty document of a multi-document manifest
fn parse_documents(data: &[u8]) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_slice(data) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value)?);
    }
    Ok(objects)
}

fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| Error::UnsupportedResource(format!("{} has no apiVersion or kind", obj.name_any())))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// `ClusterClient` talking to the API servers directly, `clusterctl` for init and move
#[derive(Clone, Debug)]
pub struct KubeClusterClient {
    clusterctl: PathBuf,
}

impl Default for KubeClusterClient {
    fn default() -> Self {
        Self::new("clusterctl")
    }
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(clusterctl: impl Into<PathBuf>) -> KubeClusterClient {
        KubeClusterClient {
            clusterctl: clusterctl.into(),
        }
    }

    async fn client(&self, cluster: &Cluster) -> Result<Client> {
        client_for(cluster.kubeconfig_file.as_deref()).await
    }

    fn kubeconfig<'a>(&self, cluster: &'a Cluster) -> Result<&'a Path> {
        cluster
            .kubeconfig_file
            .as_deref()
            .ok_or_else(|| Error::Precondition(format!("cluster {} has no kubeconfig", cluster.name)))
    }

    async fn clusterctl(&self, args: &[&OsStr], description: &str) -> Result<()> {
        info!("{}", description);
        let output = Command::new(&self.clusterctl).args(args).output().await?;
        if output.status.success() {
            debug!("{} succeeded", description);
            Ok(())
        } else {
            let err = String::from_utf8_lossy(&output.stderr).to_string();
            warn!("{} failed: {}", description, err);
            Err(Error::ProcessFailed(description.to_string(), err))
        }
    }

    async fn apply_documents(&self, cluster: &Cluster, data: &[u8], namespace: Option<&str>, force: bool) -> Result<()> {
        let objects = parse_documents(data)?;
        let client = self.client(cluster).await?;
        let discovery = Discovery::new(client.clone()).run().await?;
        let mut params = PatchParams::apply(&get_client_name());
        if force {
            params = params.force();
        }
        for obj in objects {
            let gvk = gvk_of(&obj)?;
            let name = obj.name_any();
            let (ar, caps) = discovery
                .resolve_gvk(&gvk)
                .ok_or_else(|| Error::UnsupportedResource(gvk.kind.clone()))?;
            let api = dynamic_api(&client, &ar, &caps, obj.metadata.namespace.as_deref().or(namespace));
            debug!(kind = %gvk.kind, %name, "Applying");
            api.patch(&name, &params, &Patch::Apply(serde_json::to_value(&obj)?))
                .await?;
        }
        Ok(())
    }

    async fn wait_capi_condition(&self, cluster: &Cluster, cluster_name: &str, cond: &str, timeout: Duration) -> Result<()> {
        let client = self.client(cluster).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, SYSTEM_NAMESPACE, &capi_resource("Cluster", "clusters"));
        debug!(cluster = cluster_name, condition = cond, "Waiting for condition");
        tokio::time::timeout(timeout, await_condition(api, cluster_name, is_condition(cond))).await??;
        Ok(())
    }

    async fn annotate(
        &self,
        resource_type: &str,
        name: &str,
        annotations: serde_json::Value,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()> {
        let client = self.client(cluster).await?;
        let discovery = Discovery::new(client.clone()).run().await?;
        let (ar, caps) = resolve_resource_type(&discovery, resource_type)?;
        let api = dynamic_api(&client, &ar, &caps, Some(namespace));
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_lifecycle_object(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<DynamicObject> {
        let client = self.client(cluster).await?;
        let api: Api<DynamicObject> = Api::default_namespaced_with(client, &lifecycle_resource(kind));
        Ok(api.get(name).await?)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn move_management(&self, from: &Cluster, to: &Cluster) -> Result<()> {
        let from_kc = self.kubeconfig(from)?;
        let to_kc = self.kubeconfig(to)?;
        self.clusterctl(
            &[
                OsStr::new("move"),
                OsStr::new("--kubeconfig"),
                from_kc.as_os_str(),
                OsStr::new("--to-kubeconfig"),
                to_kc.as_os_str(),
                OsStr::new("--namespace"),
                OsStr::new(SYSTEM_NAMESPACE),
            ],
            &format!("clusterctl move from {} to {}", from.name, to.name),
        )
        .await
    }

    async fn apply_kube_spec(&self, cluster: &Cluster, file: &Path) -> Result<()> {
        let data = tokio::fs::read(file).await?;
        self.apply_documents(cluster, &data, None, false).await
    }

    async fn apply_kube_spec_with_namespace(&self, cluster: &Cluster, file: &Path, namespace: &str) -> Result<()> {
        let data = tokio::fs::read(file).await?;
        self.apply_documents(cluster, &data, Some(namespace), false)
            .await
    }

    async fn apply_kube_spec_from_bytes(&self, cluster: &Cluster, data: &[u8]) -> Result<()> {
        self.apply_documents(cluster, data, None, false).await
    }

    async fn apply_kube_spec_from_bytes_force(&self, cluster: &Cluster, data: &[u8]) -> Result<()> {
        self.apply_documents(cluster, data, None, true).await
    }

    async fn wait_for_control_plane_ready(&self, cluster: &Cluster, timeout: Duration, cluster_name: &str) -> Result<()> {
        self.wait_capi_condition(cluster, cluster_name, "ControlPlaneReady", timeout)
            .await
    }

    async fn wait_for_managed_external_etcd_ready(
        &self,
        cluster: &Cluster,
        timeout: Duration,
        cluster_name: &str,
    ) -> Result<()> {
        self.wait_capi_condition(cluster, cluster_name, "ManagedExternalEtcdReady", timeout)
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
        let client = self.client(cluster).await?;
        let api: Api<K8sDeployment> = Api::namespaced(client, namespace);
        tokio::time::timeout(timeout, await_condition(api, target, is_deployment_condition(condition))).await??;
        Ok(())
    }

    async fn get_workload_kubeconfig(&self, cluster_name: &str, cluster: &Cluster) -> Result<Vec<u8>> {
        let client = self.client(cluster).await?;
        let secrets: Api<Secret> = Api::namespaced(client, SYSTEM_NAMESPACE);
        let secret_name = format!("{cluster_name}-kubeconfig");
        let secret = secrets.get(&secret_name).await?;
        secret
            .data
            .and_then(|mut d| d.remove("value"))
            .map(|v| v.0)
            .ok_or_else(|| Error::NotReady(format!("kubeconfig in secret {secret_name}")))
    }

    async fn delete_cluster(&self, management: &Cluster, cluster: &Cluster) -> Result<()> {
        let client = self.client(management).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, SYSTEM_NAMESPACE, &capi_resource("Cluster", "clusters"));
        match api.delete(&cluster.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn init_infrastructure(&self, _spec: &ClusterSpec, cluster: &Cluster, provider: &str) -> Result<()> {
        let kubeconfig = self.kubeconfig(cluster)?;
        self.clusterctl(
            &[
                OsStr::new("init"),
                OsStr::new("--infrastructure"),
                OsStr::new(provider),
                OsStr::new("--kubeconfig"),
                kubeconfig.as_os_str(),
            ],
            &format!("clusterctl init {provider} on {}", cluster.name),
        )
        .await
    }

    async fn get_deployment_logs(&self, cluster: &Cluster, deployment: &Deployment) -> Result<Vec<u8>> {
        let client = self.client(cluster).await?;
        let deployments: Api<K8sDeployment> = Api::namespaced(client.clone(), &deployment.namespace);
        let dep = deployments.get(&deployment.name).await?;
        let selector = dep
            .spec
            .and_then(|s| s.selector.match_labels)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let pods: Api<Pod> = Api::namespaced(client, &deployment.namespace);
        let pod = pods
            .list(&ListParams::default().labels(&selector))
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotReady(format!("pod of {}", deployment.name)))?;
        let params = LogParams {
            container: deployment.container.clone(),
            ..LogParams::default()
        };
        Ok(pods.logs(&pod.name_any(), &params).await?.into_bytes())
    }

    async fn get_machines(&self, cluster: &Cluster) -> Result<Vec<Machine>> {
        let client = self.client(cluster).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, SYSTEM_NAMESPACE, &capi_resource("Machine", "machines"));
        api.list(&ListParams::default())
            .await?
            .items
            .iter()
            .map(from_object)
            .collect()
    }

    async fn get_clusters(&self, cluster: &Cluster) -> Result<Vec<CapiCluster>> {
        let client = self.client(cluster).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(client, SYSTEM_NAMESPACE, &capi_resource("Cluster", "clusters"));
        api.list(&ListParams::default())
            .await?
            .items
            .iter()
            .map(from_object)
            .collect()
    }

    async fn get_cluster_spec(&self, cluster: &Cluster) -> Result<ClusterSpec> {
        let obj = self.get_lifecycle_object("Cluster", &cluster.name, cluster).await?;
        Ok(ClusterSpec {
            name: obj.name_any(),
            namespace: obj.namespace(),
            annotations: obj.annotations().clone(),
            spec: serde_json::from_value(obj.data.get("spec").cloned().unwrap_or_default())?,
            ..ClusterSpec::default()
        })
    }

    async fn get_datacenter_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<DatacenterConfig> {
        let obj = self.get_lifecycle_object(kind, name, cluster).await?;
        Ok(DatacenterConfig {
            kind: kind.to_string(),
            name: obj.name_any(),
            annotations: obj.annotations().clone(),
            spec: obj.data.get("spec").cloned().unwrap_or_default(),
        })
    }

    async fn get_machine_config(&self, kind: &str, name: &str, cluster: &Cluster) -> Result<MachineConfig> {
        let obj = self.get_lifecycle_object(kind, name, cluster).await?;
        Ok(MachineConfig {
            kind: kind.to_string(),
            name: obj.name_any(),
            spec: obj.data.get("spec").cloned().unwrap_or_default(),
        })
    }

    async fn update_annotation_in_namespace(
        &self,
        resource_type: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<()> {
        self.annotate(resource_type, name, json!(annotations), cluster, namespace)
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
        // a null value in a merge patch deletes the key, and is a no-op when absent
        self.annotate(resource_type, name, json!({ key: null }), cluster, namespace)
            .await
    }
}
