use clap::Parser;

/// Flags shared by the project, control-plane, and cluster controllers.
#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Size of the worker pool used to drive concurrent reconciles.
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 16)]
    pub max_concurrency: u16,

    /// Selects the CD backend implementation.
    #[arg(long, env = "CD_DRIVER", default_value = "argocd")]
    pub cd_driver: String,

    /// Namespace the CD backend's Application/cluster-secret objects live in.
    #[arg(long, env = "ARGOCD_NAMESPACE", default_value = "argocd")]
    pub argocd_namespace: String,

    /// Root directory of the manifest registry used by the fallback
    /// manifest-based provisioner.
    #[arg(long, env = "MANIFEST_ROOT", default_value = "/etc/argus/manifests")]
    pub manifest_root: String,

    /// Namespace the leader-election Lease and the controller itself run in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Port the Prometheus metrics/health endpoint is served on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}
