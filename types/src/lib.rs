use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

// ---------------------------------------------------------------------
// Shared phase enum
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, JsonSchema, Default)]
pub enum Phase {
    #[default]
    Pending,
    Provisioning,
    Provisioned,
    Deprovisioning,
    Errored,
    Cancelled,
}

impl FromStr for Phase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Phase::Pending),
            "Provisioning" => Ok(Phase::Provisioning),
            "Provisioned" => Ok(Phase::Provisioned),
            "Deprovisioning" => Ok(Phase::Deprovisioning),
            "Errored" => Ok(Phase::Errored),
            "Cancelled" => Ok(Phase::Cancelled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Provisioning => write!(f, "Provisioning"),
            Phase::Provisioned => write!(f, "Provisioned"),
            Phase::Deprovisioning => write!(f, "Deprovisioning"),
            Phase::Errored => write!(f, "Errored"),
            Phase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

// ---------------------------------------------------------------------
// ResourceIdentifier / HelmApplication — canonical CD-driver wire shapes
// ---------------------------------------------------------------------

/// A single label pair. Kept as a `Vec` rather than a map so serialized
/// identity order is explicit instead of relying on a map's iteration order.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// {name, labels[]} identity tuple handed to the CD driver. Label order is
/// sorted by key so two identifiers built from the same map always compare
/// equal and serialize identically.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceIdentifier {
    pub name: String,
    pub labels: Vec<Label>,
}

impl ResourceIdentifier {
    pub fn new(name: impl Into<String>, labels: &BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            labels: labels
                .iter()
                .map(|(key, value)| Label {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    pub fn labels_map(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|l| (l.key.clone(), l.value.clone()))
            .collect()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HelmParameter {
    pub name: String,
    pub value: String,
}

/// The driver-agnostic submission shape C4 hands to the CD driver (C2).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct HelmApplication {
    pub repo: String,
    pub chart: Option<String>,
    pub path: Option<String>,
    pub version: String,
    pub release: Option<String>,
    #[serde(default)]
    pub parameters: Vec<HelmParameter>,
    #[serde(default)]
    pub values: serde_json::Value,
    pub destination_cluster_id: Option<String>,
    pub destination_namespace: String,
    #[serde(default)]
    pub create_namespace: bool,
    #[serde(default)]
    pub server_side_apply: bool,
    #[serde(default)]
    pub allow_degraded: bool,
    #[serde(default)]
    pub ignore_differences: Vec<String>,
}

// ---------------------------------------------------------------------
// ApplicationBundle — immutable versioned catalog
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct BundleApplicationVersion {
    pub version: String,
    pub application: HelmApplication,
    /// Selects generator-side behaviour when a chart's values schema
    /// changes incompatibly across versions.
    pub interface: Option<String>,
    pub end_of_life: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub preview: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApplicationBundleEntry {
    pub name: String,
    pub versions: Vec<BundleApplicationVersion>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "argus.io",
    version = "v1",
    kind = "ApplicationBundle",
    plural = "applicationbundles",
    derive = "PartialEq",
    status = "ApplicationBundleStatus",
    namespaced
)]
#[kube(derive = "Default")]
pub struct ApplicationBundleSpec {
    #[serde(default)]
    pub applications: Vec<ApplicationBundleEntry>,
}

impl ApplicationBundleSpec {
    /// Resolves a logical application name + version against this bundle.
    pub fn resolve(&self, name: &str, version: &str) -> Option<&BundleApplicationVersion> {
        self.applications
            .iter()
            .find(|entry| entry.name == name)?
            .versions
            .iter()
            .find(|v| v.version == version)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApplicationBundleStatus {
    pub message: Option<String>,
}

/// A (bundle name, bundle version) pin carried by `ControlPlane`/`KubernetesCluster`
/// specs — resolved against an `ApplicationBundle` by the top-level reconciler.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct BundleRef {
    pub name: String,
    pub version: String,
}

/// A weekly maintenance window auto-upgrade may pick a newer bundle within.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AutoUpgradeWindow {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub start_hour: u8,
    pub duration_hours: u8,
}

// ---------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "argus.io",
    version = "v1",
    kind = "Project",
    plural = "projects",
    derive = "PartialEq",
    status = "ProjectStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\"}")]
pub struct ProjectSpec {
    pub display_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ProjectStatus {
    pub phase: Phase,
    /// Generated name of the namespace owned by this project.
    pub namespace: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ---------------------------------------------------------------------
// ControlPlane
// ---------------------------------------------------------------------

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "argus.io",
    version = "v1",
    kind = "ControlPlane",
    plural = "controlplanes",
    derive = "PartialEq",
    status = "ControlPlaneStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\"}")]
pub struct ControlPlaneSpec {
    /// Name of the owning `Project`.
    pub project: String,
    pub application_bundle: BundleRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ControlPlaneStatus {
    pub phase: Phase,
    /// Generated name of the child namespace hosting the vcluster statefulset.
    pub namespace: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// ---------------------------------------------------------------------
// KubernetesCluster
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct OpenStackAuth {
    pub cloud_name: String,
    /// base64-encoded clouds.yaml blob.
    pub clouds_yaml: String,
    pub ca: Option<String>,
    pub external_network: String,
    pub failure_domain: String,
    pub ssh_key: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct NetworkSpec {
    pub node_cidr: String,
    pub service_cidr: String,
    pub pod_cidr: String,
    #[serde(default)]
    pub nameservers: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MachineSpec {
    pub version: String,
    pub replicas: u32,
    pub image: String,
    pub flavor: String,
    pub disk: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, JsonSchema)]
pub struct GpuHint {
    pub count: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SchedulerHint {
    pub cpu: u32,
    pub memory_gib: u32,
    pub gpu: Option<GpuHint>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AutoscalingSpec {
    pub min: u32,
    pub max: u32,
    pub scheduler_hint: SchedulerHint,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct FileSpec {
    pub path: String,
    /// base64-encoded file content.
    pub content: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WorkloadPool {
    pub name: String,
    pub machine: MachineSpec,
    pub replicas: u32,
    pub version: String,
    pub autoscaling: Option<AutoscalingSpec>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, JsonSchema)]
pub struct FeatureToggles {
    #[serde(default)]
    pub autoscaling: bool,
    #[serde(default)]
    pub cert_manager: bool,
    #[serde(default)]
    pub ingress: bool,
    #[serde(default)]
    pub dashboard: bool,
    #[serde(default)]
    pub file_injection: bool,
    #[serde(default)]
    pub prometheus: bool,
    #[serde(default)]
    pub allow_privileged: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApiSettings {
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "argus.io",
    version = "v1",
    kind = "KubernetesCluster",
    plural = "kubernetesclusters",
    derive = "PartialEq",
    status = "KubernetesClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\"}")]
pub struct KubernetesClusterSpec {
    pub openstack: OpenStackAuth,
    pub network: NetworkSpec,
    pub control_plane: MachineSpec,
    #[serde(default)]
    pub workload_pools: Vec<WorkloadPool>,
    #[serde(default)]
    pub features: FeatureToggles,
    #[serde(default)]
    pub api: ApiSettings,
    pub application_bundle: BundleRef,
    pub auto_upgrade: Option<AutoUpgradeWindow>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct WorkloadPoolStatus {
    pub name: String,
    pub phase: Phase,
    pub config_epoch: u64,
    pub ready_replicas: u32,
    pub expected_replicas: u32,
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct KubernetesClusterStatus {
    pub phase: Phase,
    /// Namespace inside the vcluster the cluster's own child namespace lives in.
    pub namespace: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub workload_pools: Vec<WorkloadPoolStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_identifier_sorts_labels_by_key() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), "1".to_string());
        map.insert("alpha".to_string(), "2".to_string());
        let id = ResourceIdentifier::new("cilium", &map);
        assert_eq!(id.labels[0].key, "alpha");
        assert_eq!(id.labels[1].key, "zeta");
    }

    #[test]
    fn resource_identifier_round_trips_through_map() {
        let mut map = BTreeMap::new();
        map.insert("project".to_string(), "acme".to_string());
        map.insert("cluster".to_string(), "prod".to_string());
        let id = ResourceIdentifier::new("ingress", &map);
        assert_eq!(id.labels_map(), map);
    }

    #[test]
    fn phase_from_str_round_trips_display() {
        for phase in [
            Phase::Pending,
            Phase::Provisioning,
            Phase::Provisioned,
            Phase::Deprovisioning,
            Phase::Errored,
        ] {
            let s = phase.to_string();
            assert_eq!(Phase::from_str(&s).unwrap(), phase);
        }
    }

    #[test]
    fn phase_default_is_pending() {
        assert_eq!(Phase::default(), Phase::Pending);
    }

    #[test]
    fn bundle_resolve_finds_matching_version() {
        let bundle = ApplicationBundleSpec {
            applications: vec![ApplicationBundleEntry {
                name: "cilium".to_string(),
                versions: vec![BundleApplicationVersion {
                    version: "1.2.3".to_string(),
                    application: HelmApplication::default(),
                    interface: None,
                    end_of_life: None,
                    preview: false,
                }],
            }],
        };
        assert!(bundle.resolve("cilium", "1.2.3").is_some());
        assert!(bundle.resolve("cilium", "9.9.9").is_none());
        assert!(bundle.resolve("missing", "1.2.3").is_none());
    }
}
