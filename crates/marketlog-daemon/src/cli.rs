use anyhow::bail;
use clap::Parser;
use marketlog_core::config::{split_list, MarketlogConfig};
use marketlog_core::{ApiKeyPair, GitCredentials};

/// Command-line flags. Every flag overrides the matching config value.
#[derive(Debug, Parser)]
#[command(
    name = "marketlog",
    version,
    about = "Collects crypto market data on a schedule and publishes the log to git"
)]
pub struct Cli {
    /// Config file path (default: ./marketlog.toml)
    #[arg(short, long, env = "MARKETLOG_CONFIG")]
    pub config: Option<String>,

    /// Ticker symbol to watch, e.g. BTC
    #[arg(long)]
    pub symbol: Option<String>,

    /// ERC-20 contract address for token metrics
    #[arg(long)]
    pub address: Option<String>,

    /// Comma-separated convert currencies, e.g. USD,KRW
    #[arg(long)]
    pub quotes: Option<String>,

    /// Comma-separated exchange slugs, e.g. binance,upbit
    #[arg(long)]
    pub slugs: Option<String>,

    /// Git working tree that holds the report log
    #[arg(long)]
    pub repo_dir: Option<String>,

    /// Username for pushing the report log
    #[arg(long)]
    pub git_user: Option<String>,

    /// Password or token for pushing the report log
    #[arg(long, env = "MARKETLOG_GIT_PASSWORD", hide_env_values = true)]
    pub git_password: Option<String>,

    /// Data-source key, repeatable: SOURCE=ACCESS_KEY[:SECRET_KEY]
    #[arg(long = "source-key", value_name = "SOURCE=KEY", value_parser = parse_source_key)]
    pub source_keys: Vec<(String, ApiKeyPair)>,

    /// Collect only; never commit the report log
    #[arg(long)]
    pub no_publish: bool,
}

impl Cli {
    /// Layer the flags on top of the loaded config.
    pub fn apply(&self, config: &mut MarketlogConfig) -> anyhow::Result<()> {
        if let Some(symbol) = &self.symbol {
            config.target.symbol = symbol.trim().to_string();
        }
        if let Some(address) = &self.address {
            config.target.address = Some(address.trim().to_string()).filter(|a| !a.is_empty());
        }
        if let Some(quotes) = &self.quotes {
            config.target.quotes = split_list(quotes);
        }
        if let Some(slugs) = &self.slugs {
            config.target.slugs = split_list(slugs);
        }
        if let Some(dir) = &self.repo_dir {
            config.publisher.repo_dir = dir.clone();
        }
        if self.no_publish {
            config.publisher.enabled = false;
        }

        match (&self.git_user, &self.git_password, &mut config.publisher.git) {
            (None, None, _) => {}
            (Some(user), Some(password), git) => {
                *git = Some(GitCredentials {
                    username: user.clone(),
                    password: password.clone(),
                });
            }
            (user, password, Some(existing)) => {
                if let Some(user) = user {
                    existing.username = user.clone();
                }
                if let Some(password) = password {
                    existing.password = password.clone();
                }
            }
            (_, _, None) => bail!("--git-user and --git-password must be given together"),
        }

        for (source, pair) in &self.source_keys {
            config.credentials.insert(source.clone(), pair.clone());
        }
        Ok(())
    }
}

fn parse_source_key(value: &str) -> Result<(String, ApiKeyPair), String> {
    let (source, keys) = value
        .split_once('=')
        .ok_or_else(|| format!("expected SOURCE=KEY, got {value:?}"))?;
    let (access, secret) = keys.split_once(':').unwrap_or((keys, ""));
    if source.trim().is_empty() || access.is_empty() {
        return Err(format!("expected SOURCE=KEY, got {value:?}"));
    }
    Ok((
        source.trim().to_lowercase(),
        ApiKeyPair {
            access_key: access.to_string(),
            secret_key: secret.to_string(),
        },
    ))
}
