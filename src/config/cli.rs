use crate::config::PayoutConfig;
use crate::utils::error::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "auto-payout")]
#[command(about = "Scheduled PayPal payout of the balance surplus above a fixed floor")]
pub struct CliArgs {
    /// TOML config file. Without it the config is read from environment variables.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// `.env` file to load before reading the environment. Defaults to searching for `.env`.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Run a single payout cycle and exit")]
    pub once: bool,

    #[arg(long, help = "Evaluate the balance policy without sending money")]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn load_config(&self) -> Result<PayoutConfig> {
        match &self.config {
            Some(path) => {
                tracing::info!("📄 Loading configuration from {}", path.display());
                PayoutConfig::from_file(path)
            }
            None => {
                tracing::info!("📄 Loading configuration from environment");
                PayoutConfig::from_env()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args =
            CliArgs::try_parse_from(["auto-payout", "--config", "payout.toml", "--env-file", "prod.env", "--once", "--verbose"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("payout.toml")));
        assert_eq!(args.env_file, Some(PathBuf::from("prod.env")));
        assert!(args.once);
        assert!(args.verbose);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["auto-payout"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.once && !args.json_logs);
        assert!(args.env_file.is_none());
    }
}
