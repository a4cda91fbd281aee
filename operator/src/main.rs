//! Entrypoint: wires up the CD backend, then runs the three top-level
//! reconcilers (`Project`, `ControlPlane`, `KubernetesCluster`) concurrently,
//! each electing its own leader so a single replica set can be scaled for
//! availability without double-driving any one controller.

mod cluster;
mod controlplane;
mod domain;
mod project;
mod provisioner;
mod util;

use argus_common::args::ControllerArgs;
use clap::Parser;
use owo_colors::OwoColorize;
use provisioner::cd::{ArgoCdDriver, CdDriver};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    argus_common::init();
    let args = ControllerArgs::parse();

    println!("{}", "🚀 Starting argus-operator...".green());

    let client = kube::Client::try_default().await?;

    let cd: Arc<dyn CdDriver> = match args.cd_driver.as_str() {
        "argocd" => Arc::new(ArgoCdDriver::new(args.argocd_namespace.clone())),
        other => anyhow::bail!("unknown CD driver {other}"),
    };
    let manifest_root = PathBuf::from(&args.manifest_root);

    argus_common::metrics::maybe_spawn_metrics_server(args.metrics_port);

    let project = tokio::spawn(project::reconcile::run(client.clone(), args.namespace.clone()));
    let control_plane = tokio::spawn(controlplane::reconcile::run(
        client.clone(),
        args.namespace.clone(),
        cd.clone(),
        manifest_root.clone(),
    ));
    let cluster = tokio::spawn(cluster::reconcile::run(client.clone(), args.namespace.clone(), cd.clone()));

    argus_common::signal_ready();

    let (project, control_plane, cluster) = tokio::join!(project, control_plane, cluster);
    project??;
    control_plane??;
    cluster??;
    Ok(())
}
