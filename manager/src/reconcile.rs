use crate::{ClusterManager, Provider};
use common::{
    Cluster, ClusterSpec, DatacenterConfig, Error, MachineConfig, Phase, Result, WorkflowContext, types::Ref,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An object carrying the pause annotation
#[derive(Debug, Clone, PartialEq, Eq)]
struct PauseTarget {
    what: &'static str,
    resource_type: String,
    name: String,
}

fn required<'a>(r: Option<&'a Ref>, what: &str) -> Result<&'a Ref> {
    r.ok_or_else(|| Error::Precondition(format!("machineGroupRef for {what} is not defined")))
}

/// Objects to annotate, in order
///
/// Machine configs shared between groups are only listed once. Missing
/// machine group references are reported before anything is listed.
fn pause_targets(cluster: &Cluster, spec: &ClusterSpec, provider: &dyn Provider) -> Result<Vec<PauseTarget>> {
    let mut targets = vec![PauseTarget {
        what: "datacenterconfig",
        resource_type: provider.datacenter_resource_type(),
        name: spec.spec.datacenter_ref.name.clone(),
    }];
    if let Some(machine_type) = provider.machine_resource_type() {
        let cp = required(spec.control_plane_machine_ref(), "control plane")?;
        let worker = required(spec.worker_machine_ref(), "worker nodes")?;
        let etcd = match &spec.spec.external_etcd_configuration {
            Some(etcd) => Some(required(etcd.machine_group_ref.as_ref(), "etcd machines")?),
            None => None,
        };
        let machine = |what, r: &Ref| PauseTarget {
            what,
            resource_type: machine_type.clone(),
            name: r.name.clone(),
        };
        targets.push(machine("control plane machineconfig", cp));
        if worker.name != cp.name {
            targets.push(machine("worker node machineconfig", worker));
        }
        if let Some(etcd) = etcd {
            if etcd.name != cp.name && etcd.name != worker.name {
                targets.push(machine("etcd machineconfig", etcd));
            }
        }
    }
    targets.push(PauseTarget {
        what: "cluster",
        resource_type: spec.resource_type(),
        name: cluster.name.clone(),
    });
    Ok(targets)
}

impl ClusterManager {
    /// Stop the lifecycle controllers from reconciling the cluster and its provider objects
    pub async fn pause_reconcile(&self, cluster: &Cluster, spec: &ClusterSpec, provider: &dyn Provider) -> Result<()> {
        let targets =
            pause_targets(cluster, spec, provider).step(Phase::Pause, "validating machine group references")?;
        let annotations = BTreeMap::from([(spec.paused_annotation(), "true".to_string())]);
        for target in &targets {
            debug!(kind = %target.resource_type, name = %target.name, "Pausing reconciliation");
            self.retrier
                .retry(&format!("pause {}", target.what), || {
                    self.client.update_annotation_in_namespace(
                        &target.resource_type,
                        &target.name,
                        &annotations,
                        cluster,
                        "",
                    )
                })
                .await
                .step(Phase::Pause, &format!("pausing {} reconciliation", target.what))?;
        }
        Ok(())
    }

    /// Remove the pause annotation everywhere pause may have put it
    ///
    /// Every object is attempted even when one fails, the first failure is
    /// returned. The in-memory markers are only cleared when all succeeded.
    pub async fn resume_reconcile(
        &self,
        cluster: &Cluster,
        spec: &mut ClusterSpec,
        provider: &mut dyn Provider,
    ) -> Result<()> {
        let targets =
            pause_targets(cluster, spec, provider).step(Phase::Resume, "validating machine group references")?;
        let key = spec.paused_annotation();
        let mut first_error = None;
        for target in &targets {
            debug!(kind = %target.resource_type, name = %target.name, "Resuming reconciliation");
            let res = self
                .retrier
                .retry(&format!("resume {}", target.what), || {
                    self.client
                        .remove_annotation_in_namespace(&target.resource_type, &target.name, &key, cluster, "")
                })
                .await
                .step(Phase::Resume, &format!("resuming {} reconciliation", target.what));
            if let Err(e) = res {
                warn!(name = %target.name, error = %e, "Failed to resume reconciliation");
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        spec.clear_pause_annotation();
        provider.clear_datacenter_pause_annotation();
        Ok(())
    }

    /// Upgrade `workload` and store its new objects with reconciliation paused
    ///
    /// Reconciliation is resumed even when the upgrade fails. The upgrade error
    /// is the one returned, a failed resume is only logged then.
    #[allow(clippy::too_many_arguments)]
    pub async fn upgrade_paused(
        &self,
        management: &Cluster,
        stored: &Cluster,
        workload: &Cluster,
        spec: &mut ClusterSpec,
        datacenter: &DatacenterConfig,
        machine_configs: &[MachineConfig],
        provider: &mut dyn Provider,
    ) -> Result<()> {
        self.pause_reconcile(stored, spec, &*provider).await?;
        let upgraded = async {
            self.upgrade_cluster(management, workload, spec, &*provider)
                .await?;
            self.create_cluster_resources(stored, spec, datacenter, machine_configs)
                .await
        }
        .await;
        let resumed = self.resume_reconcile(stored, spec, provider).await;
        match (upgraded, resumed) {
            (Err(e), Err(resume)) => {
                warn!(
                    cluster = %stored.name,
                    error = %resume,
                    "Reconciliation is still paused, run resume once the upgrade is fixed"
                );
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockClusterClient, MockNetworking, MockProvider, filewriter::MockFileWriter, testutil::*};
    use common::{Retrier, types::ExternalEtcdConfiguration};
    use mockall::Sequence;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    const DC_TYPE: &str = "vspheredatacenterconfigs.anywhere.eks.amazonaws.com";
    const MACHINE_TYPE: &str = "vspheremachineconfigs.anywhere.eks.amazonaws.com";
    const CLUSTER_TYPE: &str = "clusters.anywhere.eks.amazonaws.com";

    fn provider() -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_datacenter_resource_type().returning(|| DC_TYPE.to_string());
        provider
            .expect_machine_resource_type()
            .returning(|| Some(MACHINE_TYPE.to_string()));
        provider
    }

    fn manager(client: MockClusterClient) -> ClusterManager {
        ClusterManager::new(Arc::new(client), Arc::new(MockNetworking::new()), Arc::new(MockFileWriter::new()))
            .with_retrier(Retrier::with_max_retries(2, Duration::from_secs(1)))
    }

    fn expect_order(client: &mut MockClusterClient, seq: &mut Sequence, order: &[(&'static str, &'static str)]) {
        for (kind, name) in order.iter().copied() {
            client
                .expect_update_annotation_in_namespace()
                .withf(move |rt, n, annotations, cluster, ns| {
                    rt == kind
                        && n == name
                        && annotations.get("anywhere.eks.amazonaws.com/paused").map(String::as_str) == Some("true")
                        && cluster.name == "test-cluster"
                        && ns.is_empty()
                })
                .times(1)
                .in_sequence(seq)
                .returning(|_, _, _, _, _| Ok(()));
        }
        for (kind, name) in order.iter().copied() {
            client
                .expect_remove_annotation_in_namespace()
                .withf(move |rt, n, key, _, ns| {
                    rt == kind && n == name && key == "anywhere.eks.amazonaws.com/paused" && ns.is_empty()
                })
                .times(1)
                .in_sequence(seq)
                .returning(|_, _, _, _, _| Ok(()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_distinct_groups() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_order(
            &mut client,
            &mut seq,
            &[
                (DC_TYPE, "datacenter"),
                (MACHINE_TYPE, "cp"),
                (MACHINE_TYPE, "worker"),
                (CLUSTER_TYPE, "test-cluster"),
            ],
        );
        let manager = manager(client);
        let mut provider = provider();
        provider.expect_clear_datacenter_pause_annotation().times(1).return_const(());
        let mut spec = cluster_spec();
        spec.annotations
            .insert(spec.paused_annotation(), "true".to_string());

        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
        assert!(spec.annotations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_with_distinct_etcd_group() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_order(
            &mut client,
            &mut seq,
            &[
                (DC_TYPE, "datacenter"),
                (MACHINE_TYPE, "cp"),
                (MACHINE_TYPE, "worker"),
                (MACHINE_TYPE, "etcd"),
                (CLUSTER_TYPE, "test-cluster"),
            ],
        );
        let manager = manager(client);
        let mut provider = provider();
        provider.expect_clear_datacenter_pause_annotation().return_const(());
        let mut spec = cluster_spec();
        spec.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: machine_ref("etcd"),
        });

        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_worker_group_is_annotated_once() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_order(
            &mut client,
            &mut seq,
            &[(DC_TYPE, "datacenter"), (MACHINE_TYPE, "cp"), (CLUSTER_TYPE, "test-cluster")],
        );
        let manager = manager(client);
        let mut provider = provider();
        provider.expect_clear_datacenter_pause_annotation().return_const(());
        let mut spec = cluster_spec();
        spec.spec.worker_node_group_configurations[0].machine_group_ref = machine_ref("cp");
        // etcd sharing the control plane group is skipped too
        spec.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 1,
            machine_group_ref: machine_ref("cp"),
        });

        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_refs_fail_before_any_write() {
        let mut no_cp = cluster_spec();
        no_cp.spec.control_plane_configuration.machine_group_ref = None;
        let mut no_worker = cluster_spec();
        no_worker.spec.worker_node_group_configurations[0].machine_group_ref = None;
        let mut no_groups = cluster_spec();
        no_groups.spec.worker_node_group_configurations.clear();
        let mut no_etcd = cluster_spec();
        no_etcd.spec.external_etcd_configuration = Some(ExternalEtcdConfiguration {
            count: 3,
            machine_group_ref: None,
        });

        for mut spec in [no_cp, no_worker, no_groups, no_etcd] {
            let mut client = MockClusterClient::new();
            client.expect_update_annotation_in_namespace().never();
            client.expect_remove_annotation_in_namespace().never();
            let manager = manager(client);
            let mut provider = provider();
            provider.expect_clear_datacenter_pause_annotation().never();

            let err = manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap_err();
            assert!(err.is_precondition(), "{err}");
            let err = manager
                .resume_reconcile(&workload(), &mut spec, &mut provider)
                .await
                .unwrap_err();
            assert!(err.is_precondition(), "{err}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_without_machine_configs() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_order(
            &mut client,
            &mut seq,
            &[("dockerdatacenterconfigs.anywhere.eks.amazonaws.com", "datacenter"), (CLUSTER_TYPE, "test-cluster")],
        );
        let manager = manager(client);
        let mut provider = MockProvider::new();
        provider
            .expect_datacenter_resource_type()
            .returning(|| "dockerdatacenterconfigs.anywhere.eks.amazonaws.com".to_string());
        provider.expect_machine_resource_type().returning(|| None);
        provider.expect_clear_datacenter_pause_annotation().return_const(());
        let mut spec = cluster_spec();
        spec.spec.control_plane_configuration.machine_group_ref = None;

        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_at_first_failing_write() {
        let mut client = MockClusterClient::new();
        client
            .expect_update_annotation_in_namespace()
            .withf(|rt, _, _, _, _| rt == DC_TYPE)
            .returning(|_, _, _, _, _| Ok(()));
        client
            .expect_update_annotation_in_namespace()
            .withf(|_, n, _, _, _| n == "cp")
            .times(2)
            .returning(|_, _, _, _, _| Err(Error::Other("conflict".into())));
        client
            .expect_update_annotation_in_namespace()
            .withf(|_, n, _, _, _| n == "worker" || n == "test-cluster")
            .never();
        let err = manager(client)
            .pause_reconcile(&workload(), &cluster_spec(), &provider())
            .await
            .unwrap_err();
        assert!(err.is_exhausted());
        assert!(err.to_string().starts_with("pause failed while pausing control plane machineconfig reconciliation"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_attempts_every_target() {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let r = removed.clone();
        let mut client = MockClusterClient::new();
        client
            .expect_remove_annotation_in_namespace()
            .returning(move |_, name, _, _, _| {
                if name == "cp" {
                    return Err(Error::Other("conflict".into()));
                }
                r.lock().unwrap().push(name.to_string());
                Ok(())
            });
        let manager = manager(client);
        let mut provider = provider();
        provider.expect_clear_datacenter_pause_annotation().never();
        let mut spec = cluster_spec();
        spec.annotations
            .insert(spec.paused_annotation(), "true".to_string());

        let err = manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("resuming control plane machineconfig reconciliation"));
        assert_eq!(*removed.lock().unwrap(), vec!["datacenter", "worker", "test-cluster"]);
        assert_eq!(spec.annotations.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_are_idempotent() {
        // annotations per object name, removal of an absent key is a no-op
        let store: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>> = Arc::default();
        let mut client = MockClusterClient::new();
        let s = store.clone();
        client
            .expect_update_annotation_in_namespace()
            .returning(move |_, name, annotations, _, _| {
                let mut store = s.lock().unwrap();
                store.entry(name.to_string()).or_default().extend(annotations.clone());
                Ok(())
            });
        let s = store.clone();
        client
            .expect_remove_annotation_in_namespace()
            .returning(move |_, name, key, _, _| {
                if let Some(a) = s.lock().unwrap().get_mut(name) {
                    a.remove(key);
                }
                Ok(())
            });
        let manager = manager(client);
        let mut provider = provider();
        provider.expect_clear_datacenter_pause_annotation().times(2).return_const(());
        let mut spec = cluster_spec();

        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        manager.pause_reconcile(&workload(), &spec, &provider).await.unwrap();
        assert_eq!(store.lock().unwrap().len(), 4);
        assert!(store.lock().unwrap().values().all(|a| a.len() == 1));
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
        manager
            .resume_reconcile(&workload(), &mut spec, &mut provider)
            .await
            .unwrap();
        assert!(store.lock().unwrap().values().all(BTreeMap::is_empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upgrade_resumes_reconciliation() {
        let mut client = MockClusterClient::new();
        let mut seq = Sequence::new();
        expect_order(
            &mut client,
            &mut seq,
            &[
                (DC_TYPE, "datacenter"),
                (MACHINE_TYPE, "cp"),
                (MACHINE_TYPE, "worker"),
                (CLUSTER_TYPE, "test-cluster"),
            ],
        );
        client.expect_apply_kube_spec_with_namespace().never();
        client.expect_apply_kube_spec_from_bytes_force().never();
        let manager = manager(client);
        let mut provider = provider();
        provider
            .expect_generate_deployment_file_for_upgrade()
            .times(1)
            .returning(|_, _, _, _| Err(Error::Other("template error".into())));
        provider.expect_clear_datacenter_pause_annotation().times(1).return_const(());
        let mut spec = cluster_spec();

        let err = manager
            .upgrade_paused(
                &management(),
                &workload(),
                &workload(),
                &mut spec,
                &datacenter(),
                &machine_configs(),
                &mut provider,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upgrade failed while generating workload spec: Error: template error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_error_wins_over_resume_error() {
        let mut client = MockClusterClient::new();
        client
            .expect_update_annotation_in_namespace()
            .returning(|_, _, _, _, _| Ok(()));
        client
            .expect_remove_annotation_in_namespace()
            .returning(|_, _, _, _, _| Err(Error::Other("forbidden".into())));
        let manager = manager(client);
        let mut provider = provider();
        provider
            .expect_generate_deployment_file_for_upgrade()
            .returning(|_, _, _, _| Err(Error::Other("template error".into())));
        provider.expect_clear_datacenter_pause_annotation().never();
        let mut spec = cluster_spec();

        let err = manager
            .upgrade_paused(
                &management(),
                &workload(),
                &workload(),
                &mut spec,
                &datacenter(),
                &machine_configs(),
                &mut provider,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upgrade failed while generating workload spec: Error: template error");
    }
}
