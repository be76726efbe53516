use std::path::PathBuf;

use clap::Parser;

/// Both binaries run with no arguments; the flags only move the settings.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    /// Settings file to load.
    #[arg(long, env = "VM_DEPLOY_SETTINGS", default_value = "settings.toml")]
    pub settings: PathBuf,

    /// Settings environment overlaid on the `default` section.
    #[arg(long, env = "VM_DEPLOY_ENV", default_value = vm_infra::config::DEFAULT_ENVIRONMENT)]
    pub env: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_without_arguments() {
        let args = Args::try_parse_from(["provision"]).unwrap();
        // Env vars may override in a developer shell; only check the shape.
        assert!(!args.env.is_empty());
        assert!(!args.settings.as_os_str().is_empty());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "start-task",
            "--settings",
            "/etc/vm-deploy/settings.toml",
            "--env",
            "production",
        ])
        .unwrap();
        assert_eq!(args.settings, PathBuf::from("/etc/vm-deploy/settings.toml"));
        assert_eq!(args.env, "production");
    }
}
