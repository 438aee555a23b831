pub mod directory;
pub mod memory;
pub mod s3;

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use remotefs_common::ObjectStore;

use crate::config::BackendConfig;

use self::directory::DirectoryStore;
use self::s3::{S3Config, S3Store};

/// Construct an object store from its configuration section.
///
/// S3 credentials missing from the config fall back to the standard AWS
/// environment variables.
pub fn from_config(config: &BackendConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config {
        BackendConfig::S3 {
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            storage_class,
            timeout_secs,
        } => {
            let access_key_id = access_key_id
                .clone()
                .unwrap_or_else(|| std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default());
            let secret_access_key = secret_access_key
                .clone()
                .unwrap_or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

            if access_key_id.is_empty() || secret_access_key.is_empty() {
                bail!("S3 credentials not found in config or environment");
            }

            let store = S3Store::new(S3Config {
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key_id,
                secret_access_key,
                storage_class: storage_class.clone(),
                timeout: Duration::from_secs(*timeout_secs),
            })?;
            Ok(Arc::new(store))
        }
        BackendConfig::Directory { root } => Ok(Arc::new(DirectoryStore::new(root.clone()))),
    }
}
