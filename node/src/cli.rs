//! # CLI Interface
//!
//! Command-line structure for `blackbox-node` using `clap` derive.
//! Subcommands: `run`, `init`, `verify`, and `version`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use blackbox_ledger::config::{
    LedgerConfig, ShortfallPolicy, DEFAULT_AUDIT_RETENTION, DEFAULT_TAX_RATE_BPS,
};

/// File inside the data directory holding the hex audit signing key.
pub const AUDIT_KEY_FILE: &str = "audit.key";

/// Subdirectory of the data directory holding the sled database.
pub const DB_DIR: &str = "db";

/// BlackBox ledger node.
///
/// Serves the bank-transfer settlement API, keeps the tamper-evident audit
/// chain, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "blackbox-node",
    about = "BlackBox financial ledger node",
    version,
    propagate_version = true
)]
pub struct BlackboxCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the ledger node.
    Run(RunArgs),
    /// Initialize a data directory and generate the audit signing key.
    Init(InitArgs),
    /// Verify the audit chain of a data directory offline and exit.
    Verify(VerifyArgs),
    /// Print version information and exit.
    Version,
}

/// Ledger rules. Fixed for the lifetime of the process.
#[derive(Args, Debug, Clone)]
pub struct LedgerArgs {
    /// Reserve withholding rate in basis points (1000 = 10%).
    #[arg(long, env = "BLACKBOX_TAX_RATE_BPS", default_value_t = DEFAULT_TAX_RATE_BPS)]
    pub tax_rate_bps: u32,

    /// Audit blocks kept in storage. 0 keeps every block.
    #[arg(long, env = "BLACKBOX_AUDIT_RETENTION", default_value_t = DEFAULT_AUDIT_RETENTION)]
    pub audit_retention: usize,

    /// Let rejected receipts be submitted again.
    #[arg(long, env = "BLACKBOX_RELEASE_REJECTED_RECEIPTS")]
    pub release_rejected_receipts: bool,

    /// Refuse approvals that confirm less than the declared amount.
    #[arg(long, env = "BLACKBOX_REFUSE_UNDERPAYMENT")]
    pub refuse_underpayment: bool,
}

impl LedgerArgs {
    pub fn to_config(&self) -> LedgerConfig {
        LedgerConfig {
            tax_rate_bps: self.tax_rate_bps,
            audit_retention: (self.audit_retention > 0).then_some(self.audit_retention),
            release_rejected_receipts: self.release_rejected_receipts,
            shortfall_policy: if self.refuse_underpayment {
                ShortfallPolicy::Refuse
            } else {
                ShortfallPolicy::AcceptFlagged
            },
        }
    }
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding the database and the audit key.
    #[arg(long, short = 'd', env = "BLACKBOX_DATA_DIR", default_value = "./blackbox-data")]
    pub data_dir: PathBuf,

    /// Port for the REST API.
    #[arg(long, env = "BLACKBOX_API_PORT", default_value_t = 8640)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "BLACKBOX_METRICS_PORT", default_value_t = 8641)]
    pub metrics_port: u16,

    /// Log format: `pretty` or `json`.
    #[arg(long, env = "BLACKBOX_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Hex-encoded audit signing key. Overrides the key file.
    ///
    /// **Never pass this flag in production**: use the key file instead.
    #[arg(long, env = "BLACKBOX_AUDIT_KEY")]
    pub audit_key: Option<String>,

    #[command(flatten)]
    pub ledger: LedgerArgs,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "BLACKBOX_DATA_DIR", default_value = "./blackbox-data")]
    pub data_dir: PathBuf,

    /// Replace an existing audit key. Blocks signed by the old key will no
    /// longer verify.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `verify` subcommand.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Data directory to verify.
    #[arg(long, short = 'd', env = "BLACKBOX_DATA_DIR", default_value = "./blackbox-data")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        BlackboxCli::command().debug_assert();
    }

    #[test]
    fn run_defaults_map_to_default_config() {
        let cli = BlackboxCli::parse_from(["blackbox-node", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.ledger.to_config(), LedgerConfig::default());
        assert_eq!(args.api_port, 8640);
    }

    #[test]
    fn zero_retention_means_unbounded() {
        let cli = BlackboxCli::parse_from([
            "blackbox-node",
            "run",
            "--audit-retention",
            "0",
            "--refuse-underpayment",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.ledger.to_config();
        assert_eq!(config.audit_retention, None);
        assert_eq!(config.shortfall_policy, ShortfallPolicy::Refuse);
    }
}
