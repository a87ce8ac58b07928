use crate::types::Deployment;
use std::{collections::BTreeMap, time::Duration};

/// Deployment names keyed by namespace
pub type DeploymentsByNamespace = BTreeMap<String, Vec<String>>;

pub const MAX_RETRIES: u32 = 30;
pub const BACKOFF_PERIOD: Duration = Duration::from_secs(5);
pub const MACHINE_MAX_WAIT: Duration = Duration::from_secs(10 * 60);
pub const MACHINE_BACKOFF: Duration = Duration::from_secs(1);
pub const MACHINES_MIN_WAIT: Duration = Duration::from_secs(30 * 60);
pub const MOVE_CAPI_WAIT: Duration = Duration::from_secs(5 * 60);
pub const CONTROL_PLANE_WAIT: Duration = Duration::from_secs(60 * 60);
pub const ETCD_WAIT: Duration = Duration::from_secs(60 * 60);
pub const DEPLOYMENT_WAIT: Duration = Duration::from_secs(30 * 60);
pub const DEPLOYMENT_AVAILABLE: &str = "Available";
pub const LOG_DIR: &str = "logs";

fn by_namespace(entries: &[(&str, &[&str])]) -> DeploymentsByNamespace {
    entries
        .iter()
        .map(|(ns, deps)| (ns.to_string(), deps.iter().map(|d| d.to_string()).collect()))
        .collect()
}

lazy_static::lazy_static! {
    /// Core CAPI controllers that must be available before a cluster is usable
    pub static ref CAPI_DEPLOYMENTS: DeploymentsByNamespace = by_namespace(&[
        ("capi-kubeadm-bootstrap-system", &["capi-kubeadm-bootstrap-controller-manager"]),
        ("capi-kubeadm-control-plane-system", &["capi-kubeadm-control-plane-controller-manager"]),
        ("capi-system", &["capi-controller-manager"]),
        ("capi-webhook-system", &[
            "capi-controller-manager",
            "capi-kubeadm-bootstrap-controller-manager",
            "capi-kubeadm-control-plane-controller-manager",
        ]),
        ("cert-manager", &["cert-manager", "cert-manager-cainjector", "cert-manager-webhook"]),
    ]);

    /// Log file name for every controller whose logs are collected
    pub static ref LOG_TARGETS: BTreeMap<String, Deployment> = [
        ("kubeadm-bootstrap-controller-manager.log", Deployment::new("capi-kubeadm-bootstrap-controller-manager", "capi-kubeadm-bootstrap-system", Some("manager"))),
        ("kubeadm-control-plane-controller-manager.log", Deployment::new("capi-kubeadm-control-plane-controller-manager", "capi-kubeadm-control-plane-system", Some("manager"))),
        ("capi-controller-manager.log", Deployment::new("capi-controller-manager", "capi-system", Some("manager"))),
        ("wh-capi-controller-manager.log", Deployment::new("capi-controller-manager", "capi-webhook-system", Some("manager"))),
        ("wh-capi-kubeadm-bootstrap-controller-manager.log", Deployment::new("capi-kubeadm-bootstrap-controller-manager", "capi-webhook-system", Some("manager"))),
        ("wh-kubeadm-control-plane-controller-manager.log", Deployment::new("capi-kubeadm-control-plane-controller-manager", "capi-webhook-system", Some("manager"))),
        ("cert-manager.log", Deployment::new("cert-manager", "cert-manager", None)),
        ("cert-manager-cainjector.log", Deployment::new("cert-manager-cainjector", "cert-manager", None)),
        ("cert-manager-webhook.log", Deployment::new("cert-manager-webhook", "cert-manager", None)),
        ("coredns.log", Deployment::new("coredns", "kube-system", None)),
        ("local-path-provisioner.log", Deployment::new("local-path-provisioner", "local-path-storage", None)),
        ("capv-controller-manager.log", Deployment::new("capv-controller-manager", "capv-system", Some("manager"))),
        ("wh-capv-controller-manager.log", Deployment::new("capv-controller-manager", "capi-webhook-system", Some("manager"))),
    ]
    .into_iter()
    .map(|(file, dep)| (file.to_string(), dep))
    .collect();
}
