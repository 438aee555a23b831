use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFsConfig {
    /// Bucket the filesystem is rooted at.
    pub context: String,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    S3 {
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        storage_class: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Directory {
        root: PathBuf,
    },
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RemoteFsConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: RemoteFsConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.context.trim().is_empty() {
            anyhow::bail!("context must not be empty");
        }
        match &self.backend {
            BackendConfig::S3 { region, endpoint, timeout_secs, .. } => {
                if region.is_empty() {
                    anyhow::bail!("backend.region must not be empty");
                }
                if let Some(ep) = endpoint {
                    if !ep.starts_with("http://") && !ep.starts_with("https://") {
                        anyhow::bail!("backend.endpoint must be an http(s) URL: {}", ep);
                    }
                }
                if *timeout_secs == 0 {
                    anyhow::bail!("backend.timeout_secs must be positive");
                }
            }
            BackendConfig::Directory { root } => {
                if !root.is_absolute() {
                    anyhow::bail!("backend.root must be absolute: {}", root.display());
                }
            }
        }
        Ok(())
    }
}
