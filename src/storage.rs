use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::config::S3Config;

/// Reference to a stored binary asset. `key` identifies the object for
/// deletion; `url` is what gets persisted on the user record.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str)
        -> anyhow::Result<StoredAsset>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct S3AssetStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3AssetStore {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                cfg.access_key.clone(),
                cfg.secret_key.clone(),
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> anyhow::Result<StoredAsset> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}", key))?;
        Ok(StoredAsset {
            key: key.to_string(),
            url: format!("{}/{}", self.public_base_url, key),
        })
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {}", key))?;
        Ok(())
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use super::*;

    /// In-memory asset store for tests. `live` tracks objects that have been
    /// uploaded and not deleted; uploads whose key contains `fail_substring`
    /// return an error without storing anything.
    #[derive(Default)]
    pub(crate) struct MemoryAssetStore {
        pub live: Mutex<BTreeSet<String>>,
        pub fail_substring: Mutex<Option<String>>,
    }

    impl MemoryAssetStore {
        pub fn live_count(&self) -> usize {
            self.live.lock().unwrap().len()
        }

        pub fn fail_uploads_containing(&self, needle: &str) {
            *self.fail_substring.lock().unwrap() = Some(needle.to_string());
        }

        pub fn clear_failures(&self) {
            *self.fail_substring.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl AssetStore for MemoryAssetStore {
        async fn upload(
            &self,
            key: &str,
            _body: Bytes,
            _content_type: &str,
        ) -> anyhow::Result<StoredAsset> {
            if let Some(needle) = self.fail_substring.lock().unwrap().as_deref() {
                if key.contains(needle) {
                    anyhow::bail!("upload refused for {}", key);
                }
            }
            self.live.lock().unwrap().insert(key.to_string());
            Ok(StoredAsset {
                key: key.to_string(),
                url: format!("https://assets.test/{}", key),
            })
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.live.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
