/// Errors produced anywhere in the provisioner graph or the top-level
/// reconcilers.
///
/// [`Error::Yield`] is not a failure: it is the cooperative-scheduling
/// signal described by the provisioner contract. Composers (serial,
/// concurrent, conditional) treat it like any other error for the purpose
/// of short-circuiting and fan-in, but the top-level reconcile loop checks
/// [`Error::is_yield`] and requeues with backoff instead of recording a
/// failure on the resource's status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Failed to parse DateTime: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },

    #[error("Out of range: {source}")]
    OutOfRange {
        #[from]
        source: chrono::OutOfRangeError,
    },

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("Io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Yaml error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Json-patch error: {source}")]
    JsonPatch {
        #[from]
        source: json_patch::PatchError,
    },

    /// Work has been accepted but is not yet complete; re-enqueue with
    /// backoff rather than marking the resource errored.
    #[error("yield: {0}")]
    Yield(String),

    /// A bundle lookup did not resolve to a known application version.
    #[error("application {name} has no version {version} in its bundle")]
    InvalidVersion { name: String, version: String },

    /// An `openstack-cloud-provider` auth block did not match any of the
    /// supported clouds.yaml shapes.
    #[error("invalid cloud-config: {0}")]
    InvalidCloudConfig(String),

    /// A provisioner was asked to operate on a resource that lacks a label
    /// required to compute its `ResourceIdentifier`.
    #[error("resource is missing required label: {0}")]
    LabelMissing(String),

    /// The reconcile loop's shutdown signal fired while work was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// A lookup (manifest, remote cluster, bundle entry) found nothing.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn is_yield(&self) -> bool {
        matches!(self, Error::Yield(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yield_is_recognized() {
        assert!(Error::Yield("waiting".into()).is_yield());
        assert!(!Error::Cancelled.is_yield());
        assert!(!Error::NotFound("x".into()).is_yield());
    }
}
