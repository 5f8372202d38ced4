use std::time::Duration;

use clap::Parser;
use reqwest::Client;

use crate::allocation::ShareSumCheck;
use crate::extraction::{self, VisionClient};
use crate::ledger;
use crate::schemas::{GroupId, GroupTarget};

/// Bill splitting service settings, from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "billsplit")]
#[command(about = "Reads restaurant bills and posts the split to Splitwise", long_about = None)]
#[command(version)]
pub struct Config {
    /// Listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Ledger token used when the caller sends none
    #[arg(long, env = "SPLITWISE_API_KEY", hide_env_values = true)]
    pub splitwise_api_key: Option<String>,

    #[arg(long, env = "SPLITWISE_BASE_URL", default_value = ledger::DEFAULT_BASE_URL)]
    pub splitwise_base_url: String,

    /// Group used for group splits when the request names none
    #[arg(long, env = "SPLITWISE_GROUP_ID")]
    pub group_id: Option<GroupId>,

    #[arg(long, env = "CURRENCY_CODE", default_value = "INR")]
    pub currency_code: String,

    /// How group splits compare owed shares with the bill total
    #[arg(long, env = "SHARE_SUM_CHECK", value_enum, default_value_t = ShareSumCheck::Off)]
    pub share_sum_check: ShareSumCheck,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_ENDPOINT", default_value = extraction::DEFAULT_ENDPOINT)]
    pub openai_endpoint: String,

    #[arg(long, env = "OPENAI_MODEL", default_value = extraction::DEFAULT_MODEL)]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_MAX_TOKENS", default_value_t = extraction::DEFAULT_MAX_TOKENS)]
    pub openai_max_tokens: u32,

    /// Largest accepted bill image, in bytes
    #[arg(long, env = "MAX_IMAGE_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_image_bytes: usize,

    /// Timeout for every outgoing request, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Group a group split posts to: the one named in the request, otherwise
    /// the configured one.
    pub fn group_target(&self, requested: Option<GroupId>) -> Option<GroupTarget> {
        requested.or(self.group_id).map(|group_id| GroupTarget {
            group_id,
            currency_code: self.currency_code.clone(),
        })
    }

    pub fn http_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .build()
    }

    pub fn vision_client(&self, http: Client) -> Option<VisionClient> {
        let api_key = self.openai_api_key.as_deref().filter(|key| !key.is_empty())?;
        Some(VisionClient::new(
            http,
            &self.openai_endpoint,
            api_key,
            &self.openai_model,
            self.openai_max_tokens,
        ))
    }
}

/// Parses `args` as if none of the settings' variables were exported, so
/// tests see only the flags they pass.
#[cfg(test)]
pub(crate) fn parse_without_env(args: &[&str]) -> Config {
    use clap::CommandFactory;

    for arg in Config::command().get_arguments() {
        if let Some(name) = arg.get_env() {
            std::env::remove_var(name);
        }
    }
    let args = std::iter::once("billsplit").chain(args.iter().copied());
    Config::try_parse_from(args).unwrap()
}
