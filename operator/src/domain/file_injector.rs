//! file-injector: materializes each workload pool's declared `FileSpec`s as
//! a `Secret` the pool's machine template mounts via cloud-init, gated by
//! the `file_injection` feature toggle.

use crate::provisioner::aggregate::{Concurrent, ResourceProvisioner};
use crate::provisioner::remote::RemoteCluster;
use crate::provisioner::BoxedProvisioner;
use argus_types::WorkloadPool;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn secret_key(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "-")
}

fn pool_secret(namespace: &str, pool: &WorkloadPool) -> Secret {
    let mut data = BTreeMap::new();
    for file in &pool.files {
        data.insert(secret_key(&file.path), ByteString(file.content.clone().into_bytes()));
    }
    Secret {
        metadata: ObjectMeta {
            name: Some(format!("{}-files", pool.name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// One `ResourceProvisioner<Secret>` per workload pool that declares
/// files, fanned out concurrently and bound to `remote`. Does nothing if
/// `enabled` is false, regardless of what pools declare.
pub fn provisioner(remote: &RemoteCluster, namespace: &str, pools: &[WorkloadPool], enabled: bool) -> BoxedProvisioner {
    let children: Vec<BoxedProvisioner> = pools
        .iter()
        .filter(|pool| enabled && !pool.files.is_empty())
        .map(|pool| {
            remote.provision_on(
                ResourceProvisioner::new(format!("{}-files", pool.name), namespace, pool_secret(namespace, pool))
                    .boxed(),
            )
        })
        .collect();
    Concurrent::new("file-injector", children).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_key_strips_leading_slash_and_flattens_path() {
        assert_eq!(secret_key("/etc/cloud/cloud.cfg"), "etc-cloud-cloud.cfg");
    }
}
