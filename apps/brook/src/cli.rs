use clap::Parser;

use brook_common::GlobalConfigPatch;

#[derive(Parser)]
#[command(name = "brook")]
pub(crate) struct Cli {
    #[arg(long, default_value = "")]
    pub(crate) dsn: String,
    #[arg(long, default_value = "")]
    pub(crate) data_dir: String,
    #[arg(long)]
    pub(crate) host: Option<String>,
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Base URL of the OpenAI-compatible reasoning engine.
    #[arg(long, env = "BROOK_ENGINE_URL")]
    pub(crate) engine_url: Option<String>,
    #[arg(long, env = "BROOK_ENGINE_API_KEY", hide_env_values = true)]
    pub(crate) engine_api_key: Option<String>,
    #[arg(long, env = "BROOK_ENGINE_MODEL")]
    pub(crate) engine_model: Option<String>,
    #[arg(long)]
    pub(crate) flush_interval_ms: Option<u64>,
    #[arg(long)]
    pub(crate) keepalive_secs: Option<u64>,
    #[arg(long)]
    pub(crate) write_timeout_ms: Option<u64>,
}

impl Cli {
    pub(crate) fn as_patch(&self, dsn: String) -> GlobalConfigPatch {
        GlobalConfigPatch {
            host: self.host.clone(),
            port: self.port,
            dsn: Some(dsn),
            engine_base_url: self.engine_url.clone(),
            engine_api_key: self.engine_api_key.clone(),
            engine_model: self.engine_model.clone(),
            flush_interval_ms: self.flush_interval_ms,
            keepalive_secs: self.keepalive_secs,
            write_timeout_ms: self.write_timeout_ms,
        }
    }
}
