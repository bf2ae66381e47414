use clap::{Args, Parser, Subcommand};

use crate::region::RegionPreference;

/// One-click installers for Go, Docker and Node.js
///
/// Each subcommand detects the platform, picks the global or mirror
/// download endpoints, installs the requested version and wires it into
/// your shell profile. Re-running with the same version is a no-op.
#[derive(Parser, Debug)]
#[command(name = "oneclick", author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every install subcommand.
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Version to install (latest when omitted)
    #[arg(id = "tool_version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Reinstall even if the requested version is already present
    #[arg(short, long)]
    pub force: bool,

    /// Download endpoints to use (auto-detected by default)
    #[arg(long, value_enum, value_name = "REGION")]
    pub region: Option<RegionPreference>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the Go toolchain
    Go {
        #[command(flatten)]
        install: InstallArgs,

        /// Installation directory [env: GO_INSTALL_DIR] [default: /usr/local/go]
        #[arg(long, value_name = "DIR")]
        dir: Option<String>,
    },

    /// Install Docker Engine and the Compose plugin
    Docker {
        #[command(flatten)]
        install: InstallArgs,
    },

    /// Install Node.js through NVM
    Node {
        #[command(flatten)]
        install: InstallArgs,

        /// Install the latest LTS release instead of the latest release
        #[arg(long, conflicts_with = "tool_version")]
        lts: bool,

        /// Do not write an npm registry to ~/.npmrc
        #[arg(long)]
        no_npm_config: bool,
    },

    /// Show which download region would be used and why
    Region {
        /// Endpoint to probe when no local signal decides
        #[arg(long, value_name = "URL", default_value = "https://go.dev/dl")]
        probe_url: String,

        /// Override detection
        #[arg(long, value_enum, value_name = "REGION")]
        region: Option<RegionPreference>,
    },

    /// List tools installed by oneclick
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn go_accepts_version_and_flags() {
        let cli = Cli::try_parse_from([
            "oneclick", "go", "1.20.10", "--force", "--dir", "~/sdk/go", "--region", "mirror",
        ])
        .unwrap();
        match cli.command {
            Commands::Go { install, dir } => {
                assert_eq!(install.version.as_deref(), Some("1.20.10"));
                assert!(install.force);
                assert_eq!(install.region, Some(RegionPreference::Mirror));
                assert_eq!(dir.as_deref(), Some("~/sdk/go"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn lts_conflicts_with_explicit_version() {
        assert!(Cli::try_parse_from(["oneclick", "node", "20.11.0", "--lts"]).is_err());
        assert!(Cli::try_parse_from(["oneclick", "node", "--lts", "--no-npm-config"]).is_ok());
    }

    #[test]
    fn unknown_region_is_rejected() {
        assert!(Cli::try_parse_from(["oneclick", "docker", "--region", "moon"]).is_err());
    }
}
