use crate::ClusterManager;
use common::{Cluster, Error, Phase, Result, WorkflowContext, tables::MOVE_CAPI_WAIT};
use tracing::{debug, info};

impl ClusterManager {
    /// Move the CAPI management objects from `from` to `to`
    ///
    /// The move itself is never retried: a half moved management plane cannot
    /// be fixed by moving again. Nothing is rolled back on failure.
    pub async fn move_capi(&self, from: &Cluster, to: &Cluster) -> Result<()> {
        debug!("Waiting for management machines to be ready before move");
        self.wait_for_nodes_ready(from)
            .await
            .step(Phase::Move, "waiting for source machines")?;

        self.client
            .move_management(from, to)
            .await
            .map_err(|e| Error::MoveFailed(Box::new(e)))
            .step(Phase::Move, "moving management objects")?;

        debug!("Waiting for control planes to be ready after move");
        self.wait_for_all_control_planes(to, MOVE_CAPI_WAIT)
            .await
            .step(Phase::Move, "waiting for control planes")?;

        debug!("Waiting for machines to be ready after move");
        self.wait_for_nodes_ready(to)
            .await
            .step(Phase::Move, "waiting for target machines")?;
        info!(from = %from.name, to = %to.name, "CAPI management moved");
        Ok(())
    }
}
