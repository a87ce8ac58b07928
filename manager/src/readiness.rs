use crate::{ClusterManager, Provider};
use common::{
    Cluster, Error, Result, Retrier, waiting_for,
    tables::{CAPI_DEPLOYMENTS, DEPLOYMENT_AVAILABLE, DEPLOYMENT_WAIT, DeploymentsByNamespace},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing::debug;

/// Last node count observed by a readiness poll
#[derive(Default)]
struct NodeCount {
    ready: AtomicUsize,
    total: AtomicUsize,
}

impl NodeCount {
    fn deficit(&self) -> usize {
        self.total
            .load(Ordering::SeqCst)
            .saturating_sub(self.ready.load(Ordering::SeqCst))
    }
}

impl ClusterManager {
    /// Number of machines with a node, and of control plane plus worker machines
    pub async fn count_nodes_ready(&self, cluster: &Cluster) -> Result<(usize, usize)> {
        let machines = self.client.get_machines(cluster).await?;
        let ready = machines.iter().filter(|m| m.is_ready()).count();
        let control_planes = machines.iter().filter(|m| m.is_control_plane()).count();
        let workers = machines.iter().filter(|m| m.is_worker()).count();
        Ok((ready, control_planes + workers))
    }

    async fn nodes_ready_once(&self, cluster: &Cluster, count: &NodeCount) -> Result<()> {
        let (ready, total) = self.count_nodes_ready(cluster).await?;
        count.ready.store(ready, Ordering::SeqCst);
        count.total.store(total, Ordering::SeqCst);
        if ready != total {
            debug!(total, ready, "Nodes are not ready yet");
            return Err(Error::NotReady(format!("{ready} of {total} nodes")));
        }
        debug!(total, "Nodes ready");
        Ok(())
    }

    /// Wait until every machine of `cluster` has joined as a node
    ///
    /// The time between polls grows with the number of missing nodes.
    pub async fn wait_for_nodes_ready(&self, cluster: &Cluster) -> Result<()> {
        let count = Arc::new(NodeCount::default());
        match self.nodes_ready_once(cluster, &count).await {
            Ok(()) => return Ok(()),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(_) => {}
        }

        let total = u32::try_from(count.total.load(Ordering::SeqCst)).unwrap_or(u32::MAX);
        let timeout = self.machine_max_wait.saturating_mul(total).max(self.machines_min_wait);
        let backoff = self.machine_backoff;
        let policy_count = count.clone();
        let retrier = Retrier::new(timeout)
            .with_policy(move |_, _| {
                let deficit = u32::try_from(policy_count.deficit().max(1)).unwrap_or(u32::MAX);
                (true, backoff.saturating_mul(deficit))
            })
            .with_cancellation(self.cancel.clone());
        retrier
            .retry("machines to be ready", || self.nodes_ready_once(cluster, &count))
            .await
    }

    /// Wait for the control plane of every CAPI cluster known to `cluster`
    pub async fn wait_for_all_control_planes(&self, cluster: &Cluster, timeout: Duration) -> Result<()> {
        let clusters = waiting_for(self.client.get_clusters(cluster).await, "clusters list")?;
        for capi in clusters {
            let name = &capi.metadata.name;
            waiting_for(
                self.cancellable(self.client.wait_for_control_plane_ready(cluster, timeout, name))
                    .await,
                format!("control plane of cluster {name}"),
            )?;
        }
        Ok(())
    }

    /// Stops at the first deployment that is not available in time
    pub async fn wait_for_deployments(
        &self,
        cluster: &Cluster,
        deployments: &DeploymentsByNamespace,
    ) -> Result<()> {
        for (namespace, names) in deployments {
            for name in names {
                waiting_for(
                    self.cancellable(self.client.wait_for_deployment(
                        cluster,
                        DEPLOYMENT_WAIT,
                        DEPLOYMENT_AVAILABLE,
                        name,
                        namespace,
                    ))
                    .await,
                    format!("{name} in namespace {namespace}"),
                )?;
            }
        }
        Ok(())
    }

    pub async fn wait_for_capi(&self, cluster: &Cluster, provider: &dyn Provider) -> Result<()> {
        self.wait_for_deployments(cluster, &CAPI_DEPLOYMENTS).await?;
        self.wait_for_deployments(cluster, &provider.get_deployments())
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClusterManager, MockClusterClient, MockNetworking, MockProvider, filewriter::MockFileWriter, testutil::*};
    use common::{
        Error,
        tables::{CAPI_DEPLOYMENTS, DeploymentsByNamespace},
    };
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn manager(client: MockClusterClient) -> ClusterManager {
        ClusterManager::new(Arc::new(client), Arc::new(MockNetworking::new()), Arc::new(MockFileWriter::new()))
    }

    /// Client answering the node count sequence `ready` out of `total`
    fn machines_client(total: usize, ready: Vec<usize>) -> (MockClusterClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut client = MockClusterClient::new();
        client.expect_get_machines().returning(move |_| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            let r = ready[n.min(ready.len() - 1)];
            Ok(machines(total, r))
        });
        (client, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_ready_on_first_check_does_not_retry() {
        for total in 0..5 {
            let (client, calls) = machines_client(total, vec![total]);
            let started = Instant::now();
            manager(client).wait_for_nodes_ready(&management()).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(started.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_scales_with_missing_nodes() {
        for (total, ready) in [(3usize, 1usize), (5, 1), (4, 3)] {
            // first check and first retry see the deficit, the second retry sees every node
            let (client, calls) = machines_client(total, vec![ready, ready, total]);
            let started = Instant::now();
            manager(client).wait_for_nodes_ready(&management()).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            let expected = Duration::from_secs((total - ready) as u64);
            let elapsed = started.elapsed();
            assert!(elapsed >= expected && elapsed < expected + Duration::from_secs(1), "{elapsed:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_exhaust_the_floor_timeout() {
        let (client, calls) = machines_client(2, vec![0]);
        let manager = manager(client).with_wait_for_machines(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(9),
        );
        let err = manager.wait_for_nodes_ready(&management()).await.unwrap_err();
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("machines to be ready"));
        // one check, then polls every 2s at 0, 2, 4, 6 and 8, another sleep would cross the 9s floor
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut client = MockClusterClient::new();
        client.expect_get_machines().returning(move |_| {
            match c.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(Error::Other("connection refused".into())),
                _ => Ok(machines(2, 2)),
            }
        });
        manager(client).wait_for_nodes_ready(&management()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_node_wait() {
        let (client, _) = machines_client(3, vec![0]);
        let token = CancellationToken::new();
        let manager = manager(client).with_cancellation(token.clone());
        token.cancel();
        let err = manager.wait_for_nodes_ready(&management()).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_deployments_stop_at_first_failure() {
        let mut client = MockClusterClient::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        client
            .expect_wait_for_deployment()
            .withf(|_, timeout, condition, _, _| *timeout == Duration::from_secs(1800) && condition == "Available")
            .returning(move |_, _, _, target, _| {
                c.fetch_add(1, Ordering::SeqCst);
                if target == "capi-controller-manager" {
                    Err(Error::Other("timed out".into()))
                } else {
                    Ok(())
                }
            });
        let deployments: DeploymentsByNamespace = [
            ("capi-kubeadm-bootstrap-system".to_string(), vec!["capi-kubeadm-bootstrap-controller-manager".to_string()]),
            ("capi-system".to_string(), vec!["capi-controller-manager".to_string()]),
            ("cert-manager".to_string(), vec!["cert-manager".to_string()]),
        ]
        .into_iter()
        .collect();
        let err = manager(client)
            .wait_for_deployments(&workload(), &deployments)
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            err.to_string(),
            "error waiting for capi-controller-manager in namespace capi-system: Error: timed out"
        );
    }

    #[tokio::test]
    async fn test_wait_for_capi_then_provider_deployments() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o = order.clone();
        let mut client = MockClusterClient::new();
        client.expect_wait_for_deployment().returning(move |_, _, _, target, ns| {
            o.lock().unwrap().push(format!("{ns}/{target}"));
            Ok(())
        });
        let mut provider = MockProvider::new();
        provider.expect_get_deployments().returning(|| {
            [("capv-system".to_string(), vec!["capv-controller-manager".to_string()])]
                .into_iter()
                .collect()
        });
        manager(client).wait_for_capi(&workload(), &provider).await.unwrap();
        let order = order.lock().unwrap();
        assert_eq!(order.len(), 10);
        assert_eq!(order.last().unwrap(), "capv-system/capv-controller-manager");
    }

    #[tokio::test]
    async fn test_all_control_planes_are_waited_for() {
        let mut client = MockClusterClient::new();
        client.expect_get_clusters().returning(|_| {
            Ok(["management", "test-cluster"]
                .into_iter()
                .map(|name| common::CapiCluster {
                    metadata: common::types::ObjectMetadata {
                        name: name.into(),
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .collect())
        });
        let mut seq = mockall::Sequence::new();
        for name in ["management", "test-cluster"] {
            client
                .expect_wait_for_control_plane_ready()
                .withf(move |_, timeout, n| *timeout == Duration::from_secs(300) && n == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }
        manager(client)
            .wait_for_all_control_planes(&management(), Duration::from_secs(300))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_deployment_wait() {
        let mut inner = MockClusterClient::new();
        inner
            .expect_wait_for_deployment()
            .returning(|_, _, _, target, _| Err(Error::NotReady(target.to_string())));
        let token = CancellationToken::new();
        let manager = ClusterManager::new(
            Arc::new(SlowWaits { inner }),
            Arc::new(MockNetworking::new()),
            Arc::new(MockFileWriter::new()),
        )
        .with_cancellation(token.clone());
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            token.cancel();
        };
        let workload = workload();
        let started = Instant::now();
        let (res, ()) = tokio::join!(manager.wait_for_deployments(&workload, &CAPI_DEPLOYMENTS), cancel);
        let err = res.unwrap_err();
        assert!(err.is_cancelled(), "{err}");
        assert!(err.to_string().contains("in namespace capi-kubeadm-bootstrap-system"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61), "{elapsed:?}");
    }
}
