//! Command-line options
//!
//! `Cli` is the raw clap surface; `ScanOptions` is what a run actually
//! uses after invalid paths have been reported and dropped.

use crate::collector::ScanScope;
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "nvme-scan", version, about = "NVMe device topology scan")]
pub struct Cli {
    /// Path to an SPDK source folder (recorded; kernel tools still gather data)
    #[arg(long = "spdk", value_name = "DIR")]
    pub spdk: Option<PathBuf>,

    /// Previous scan data file; switches to a differential scan
    #[arg(short = 'f', long = "file", value_name = "JSON")]
    pub data_file: Option<PathBuf>,

    /// Scan a single device by bus address, e.g. -b 0000:02:00.0
    #[arg(short = 'b', long = "bdf")]
    pub bdf: Option<String>,

    /// Scan a single device by node, e.g. -n /dev/nvme0
    #[arg(short = 'n', long = "node")]
    pub node: Option<String>,

    /// Write the result here instead of stdout
    #[arg(short = 'o', long = "output", value_name = "JSON")]
    pub output: Option<PathBuf>,

    /// Configuration file (default: $NVME_SCAN_CONFIG or the user config dir)
    #[arg(long = "config", value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit;
    /// the remote password goes to the keyring when `store_credentials` is set
    #[arg(long = "save-config", conflicts_with = "forget_password")]
    pub save_config: bool,

    /// Remove the remote host's password from the keyring and exit
    #[arg(long = "forget-password")]
    pub forget_password: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Validated options for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOptions {
    pub use_spdk: bool,
    pub spdk_path: Option<PathBuf>,
    pub scope: ScanScope,
    pub diff_scan: bool,
    pub data_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub save_config: bool,
    pub forget_password: bool,
    pub verbose: bool,
}

impl ScanOptions {
    pub fn set_scan_bdf(&mut self, bdf: &str) {
        self.scope = ScanScope::Bdf(bdf.to_string());
    }

    pub fn set_scan_node(&mut self, node: &str) {
        self.scope = ScanScope::Node(node.to_string());
    }

    /// Accepts an existing directory only
    pub fn set_spdk(&mut self, path: &Path) -> bool {
        if !path.is_dir() {
            eprintln!("ERR: invalid SPDK path {}, ignoring input", path.display());
            return false;
        }
        self.use_spdk = true;
        self.spdk_path = Some(path.to_path_buf());
        true
    }

    /// Accepts an existing regular file only
    pub fn set_data_file(&mut self, path: &Path) -> bool {
        if !path.is_file() {
            eprintln!(
                "ERR: invalid data file {} specified, ignoring input",
                path.display()
            );
            return false;
        }
        self.diff_scan = true;
        self.data_file = Some(path.to_path_buf());
        true
    }

    /// Node selection wins over bus address when both are given
    pub fn from_args(cli: Cli) -> Self {
        let mut options = ScanOptions {
            output: cli.output,
            config: cli.config,
            save_config: cli.save_config,
            forget_password: cli.forget_password,
            verbose: cli.verbose,
            ..Default::default()
        };

        if let Some(spdk) = &cli.spdk {
            options.set_spdk(spdk);
        }
        if let Some(bdf) = &cli.bdf {
            options.set_scan_bdf(bdf);
        }
        if let Some(node) = &cli.node {
            options.set_scan_node(node);
        }
        if let Some(file) = &cli.data_file {
            options.set_data_file(file);
        }
        options
    }

    pub fn parse() -> Self {
        Self::from_args(Cli::parse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> ScanOptions {
        let argv = std::iter::once("nvme-scan").chain(args.iter().copied());
        ScanOptions::from_args(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_no_args_is_full_fresh_scan() {
        let opts = options(&[]);
        assert!(!opts.use_spdk);
        assert!(opts.spdk_path.is_none());
        assert_eq!(opts.scope, ScanScope::All);
        assert!(!opts.diff_scan);
        assert!(opts.data_file.is_none());
    }

    #[test]
    fn test_valid_spdk_dir() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&["--spdk", dir.path().to_str().unwrap()]);
        assert!(opts.use_spdk);
        assert_eq!(opts.spdk_path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_invalid_spdk_dir_is_ignored() {
        let opts = options(&["--spdk", "/no/such/spdk/tree"]);
        assert!(!opts.use_spdk);
        assert!(opts.spdk_path.is_none());

        let file = tempfile::NamedTempFile::new().unwrap();
        let opts = options(&["--spdk", file.path().to_str().unwrap()]);
        assert!(!opts.use_spdk);
    }

    #[test]
    fn test_scan_by_bdf() {
        let opts = options(&["-b", "0000:02:00.0"]);
        assert_eq!(opts.scope, ScanScope::Bdf("0000:02:00.0".into()));
        assert!(!opts.diff_scan);
    }

    #[test]
    fn test_scan_by_node() {
        let opts = options(&["--node", "/dev/nvme0"]);
        assert_eq!(opts.scope, ScanScope::Node("/dev/nvme0".into()));
    }

    #[test]
    fn test_node_overrides_bdf() {
        let opts = options(&["-n", "/dev/nvme1", "-b", "0000:02:00.0"]);
        assert_eq!(opts.scope, ScanScope::Node("/dev/nvme1".into()));
    }

    #[test]
    fn test_valid_data_file_enables_diff() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let opts = options(&["-f", file.path().to_str().unwrap(), "-b", "0000:02:00.0"]);
        assert!(opts.diff_scan);
        assert_eq!(opts.data_file.as_deref(), Some(file.path()));
        assert_eq!(opts.scope, ScanScope::Bdf("0000:02:00.0".into()));
    }

    #[test]
    fn test_invalid_data_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(&["--file", dir.path().to_str().unwrap()]);
        assert!(!opts.diff_scan);
        assert!(opts.data_file.is_none());

        let opts = options(&["--file", "/no/such/scan.json"]);
        assert!(!opts.diff_scan);
    }

    #[test]
    fn test_output_config_and_verbose_pass_through() {
        let opts = options(&["-o", "out.json", "--config", "scan.toml", "-v"]);
        assert_eq!(opts.output, Some(PathBuf::from("out.json")));
        assert_eq!(opts.config, Some(PathBuf::from("scan.toml")));
        assert!(opts.verbose);
        assert!(!opts.save_config);
        assert!(!opts.forget_password);
    }

    #[test]
    fn test_config_maintenance_flags() {
        let opts = options(&["--save-config", "--config", "scan.toml"]);
        assert!(opts.save_config);
        assert_eq!(opts.config, Some(PathBuf::from("scan.toml")));

        let opts = options(&["--forget-password"]);
        assert!(opts.forget_password);
        assert!(!opts.save_config);

        let argv = ["nvme-scan", "--save-config", "--forget-password"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
