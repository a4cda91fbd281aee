use argus_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/argus.io_projects_crd.yaml",
        serde_yaml::to_string(&Project::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/argus.io_controlplanes_crd.yaml",
        serde_yaml::to_string(&ControlPlane::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/argus.io_kubernetesclusters_crd.yaml",
        serde_yaml::to_string(&KubernetesCluster::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/argus.io_applicationbundles_crd.yaml",
        serde_yaml::to_string(&ApplicationBundle::crd()).unwrap(),
    )
    .unwrap();
}
