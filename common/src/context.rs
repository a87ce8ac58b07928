use crate::Result;
use kube::{
    client::Client,
    config::{Config, KubeConfigOptions, Kubeconfig},
};
use std::path::Path;

fn get_prog_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()?
        .to_str()?
        .to_owned()
        .into()
}

/// Field manager name used for server side apply
pub fn get_client_name() -> String {
    match get_prog_name() {
        Some(p) if p == "agent" => "agent.anywhere.eks.amazonaws.com".to_string(),
        _ => "anywhere.eks.amazonaws.com".to_string(),
    }
}

/// Build a client for the cluster behind `kubeconfig`, or the default one when unset
pub async fn client_for(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await.map_err(|e| crate::Error::Other(e.to_string()))?,
    };
    Ok(Client::try_from(config)?)
}
