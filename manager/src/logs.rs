use crate::{ClusterManager, FileWriter, WriteOptions};
use common::{Cluster, Deployment, Phase, Result, WorkflowContext, tables::{LOG_DIR, LOG_TARGETS}};
use futures::future::join_all;
use tracing::debug;

impl ClusterManager {
    async fn save_log(
        &self,
        cluster: &Cluster,
        deployment: &Deployment,
        file_name: &str,
        writer: &dyn FileWriter,
    ) -> Result<()> {
        let logs = self.client.get_deployment_logs(cluster, deployment).await?;
        writer.write(file_name, &logs, WriteOptions::persistent(0o644))?;
        Ok(())
    }

    /// Collect the controller logs of `cluster` under the logs directory
    ///
    /// Best effort: failures of single targets are only logged.
    pub async fn save_logs(&self, cluster: &Cluster) -> Result<()> {
        let writer = self
            .writer
            .with_dir(LOG_DIR)
            .step(Phase::Logs, "creating logs directory")?;
        let writer = writer.as_ref();
        let saves = LOG_TARGETS.iter().map(|(file_name, deployment)| async move {
            if let Err(e) = self.save_log(cluster, deployment, file_name, writer).await {
                debug!(file = %file_name, error = %e, "Error saving logs");
            }
        });
        join_all(saves).await;
        Ok(())
    }
}
