use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use easel_core::{NormalizeProfile, OrchestratorConfig, SlotPolicy};
use serde::{Deserialize, Serialize};

/// How a finished artifact is handed back to HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The PNG itself, base64-encoded, under `image`.
    #[default]
    Inline,
    /// A relative `download/<id>` path under `image_path`.
    Url,
}

serde_plain::derive_display_from_serialize!(DeliveryMode);
serde_plain::derive_fromstr_from_deserialize!(DeliveryMode);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Easel image generation server")]
pub struct ServerArgs {
    /// Host address to bind the server to
    #[arg(long, env = "EASEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "EASEL_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Engine to load
    #[arg(long, env = "EASEL_MODEL", default_value = "sketch")]
    pub model: String,

    /// Use CPU instead of GPU
    #[arg(long, env = "EASEL_CPU")]
    pub cpu: bool,

    /// Directory artifacts are written to
    #[arg(long, env = "EASEL_OUTPUT_DIR", default_value = "generated_images")]
    pub output_dir: PathBuf,

    /// Behaviour when the engine is busy: queue or fail-fast
    #[arg(long, env = "EASEL_POLICY", default_value = "queue")]
    pub policy: SlotPolicy,

    /// Completion payload: inline or url
    #[arg(long, env = "EASEL_DELIVERY", default_value = "inline")]
    pub delivery: DeliveryMode,

    /// Upper bound on a single engine call
    #[arg(long, env = "EASEL_RUN_TIMEOUT_SECS", default_value_t = 600)]
    pub run_timeout_secs: u64,
}

impl ServerArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            policy: self.policy,
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            profile: NormalizeProfile::interactive(),
        }
    }
}
