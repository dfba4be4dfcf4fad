//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use overlay_cnm_core::config::CnmConfig;

/// Container network driver bridging the runtime's remote network-plugin
/// protocol to the SDN controller, the host network stack and the
/// dataplane agent.
#[derive(Parser, Debug)]
#[command(name = "overlay-cnm-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the overlay-cnm.toml configuration file.
    #[arg(short, long, default_value = "/etc/overlay-cnm/overlay-cnm.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub validate: bool,

    /// Override the PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Applies the CLI overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut CnmConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file.clone_from(pid_file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["overlay-cnm-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/overlay-cnm/overlay-cnm.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_win_over_config() {
        let cli = DaemonCli::parse_from([
            "overlay-cnm-daemon",
            "--config",
            "/tmp/c.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "/tmp/cnm.pid",
            "--validate",
        ]);
        let mut config = CnmConfig::default();
        cli.apply_overrides(&mut config);

        assert!(cli.validate);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.pid_file, "/tmp/cnm.pid");
    }

    #[test]
    fn missing_overrides_keep_config_values() {
        let cli = DaemonCli::parse_from(["overlay-cnm-daemon"]);
        let mut config = CnmConfig::default();
        config.general.log_level = "warn".to_owned();
        cli.apply_overrides(&mut config);
        assert_eq!(config.general.log_level, "warn");
    }
}
