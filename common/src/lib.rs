use owo_colors::OwoColorize;

pub mod args;
pub mod metrics;
pub mod shutdown;
pub mod wait;

/// Name used as the field manager on server-side applies and as the
/// leader-election holder-id prefix.
pub const MANAGER_NAME: &str = "argus-operator";

pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}

pub mod annotations {
    pub const SPEC_HASH: &str = "argus.io/spec-hash";
    pub const CREATED_BY: &str = "argus.io/created-by";
}

pub mod labels {
    pub const PROJECT: &str = "argus.io/project";
    pub const CONTROL_PLANE: &str = "argus.io/control-plane";
    pub const CLUSTER: &str = "argus.io/cluster";
    pub const APPLICATION: &str = "argus.io/application";
}

/// Initializes process-wide ambient state: color support detection for the
/// duration of the process.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

pub mod response {
    use std::fmt::{Debug, Display};

    use owo_colors::OwoColorize;

    pub fn print_error<T>(e: T)
    where
        T: Display + Debug,
    {
        eprintln!(
            "❌ {}",
            format!("{:?}", e)
                .split('\n')
                .map(|s| s.red().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    pub fn print_warning<T>(e: T)
    where
        T: Display + Debug,
    {
        eprintln!(
            "⚠️ {}",
            format!("{:?}", e)
                .split('\n')
                .map(|s| s.yellow().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
}
