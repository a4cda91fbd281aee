//! nvidia-gpu-operator: a fixed-namespace licence `ConfigMap` upserted
//! ahead of the Helm chart. The two steps are wired as a `serial` pair
//! (`provisioner()`) rather than folded into the generator, since the
//! licence object isn't a Helm application.

use crate::provisioner::aggregate::{ResourceProvisioner, Serial};
use crate::provisioner::application::{ApplicationProvisioner, Generator};
use crate::provisioner::remote::RemoteCluster;
use crate::provisioner::{BoxedProvisioner, ProvisionContext};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

const FIXED_NAMESPACE: &str = "gpu-operator";

pub struct NvidiaGpuOperatorGenerator;

#[async_trait]
impl Generator for NvidiaGpuOperatorGenerator {
    fn release_name(&self, _ctx: &ProvisionContext) -> Option<String> {
        Some("gpu-operator".to_string())
    }

    fn values(&self, _ctx: &ProvisionContext, _interface: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "driver": { "enabled": false },
            "affinity": {
                "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{
                                "key": "nvidia.com/gpu",
                                "operator": "Exists",
                            }],
                        }],
                    },
                },
            },
            "tolerations": [{
                "key": "nvidia.com/gpu",
                "operator": "Exists",
                "effect": "NoSchedule",
            }],
        })
    }

    fn create_namespace_override(&self) -> Option<bool> {
        Some(true)
    }
}

fn licence_configmap(licence_key: &str) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("gridd.conf".to_string(), format!("FeatureType=1\nServerAddress=licence.internal\nServerPort=7070\nLicenceKey={licence_key}\n"));
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("nvidia-gpu-operator-licence".to_string()),
            namespace: Some(FIXED_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Builds the full nvidia-gpu-operator provisioner: the licence `ConfigMap`
/// first, then the Helm chart, both bound to `remote`.
pub fn provisioner(remote: &RemoteCluster, licence_key: &str) -> BoxedProvisioner {
    let licence = ResourceProvisioner::new(
        "nvidia-gpu-operator-licence",
        FIXED_NAMESPACE,
        licence_configmap(licence_key),
    )
    .boxed();
    let chart = ApplicationProvisioner::new("nvidia-gpu-operator")
        .with_generator(std::sync::Arc::new(NvidiaGpuOperatorGenerator))
        .in_namespace(FIXED_NAMESPACE)
        .boxed();
    Serial::new("nvidia-gpu-operator", vec![remote.provision_on(licence), remote.provision_on(chart)]).boxed()
}
