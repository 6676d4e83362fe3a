use super::{check_key, ObjectMeta, ObjectStore, PutResult};
use crate::config::StoreConfig;
use crate::error::{FerryError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

/// S3-compatible bucket (AWS S3, Tencent COS, MinIO).
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
    public_read: bool,
}

impl S3Store {
    pub fn new(name: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            public_read: false,
        }
    }

    pub fn with_public_read(mut self, public_read: bool) -> Self {
        self.public_read = public_read;
        self
    }

    /// Static credentials from the config win; otherwise the default AWS
    /// provider chain (env, profile, instance metadata) applies.
    pub async fn from_config(name: &str, config: &StoreConfig, public_read: bool) -> Result<Self> {
        let StoreConfig::S3 {
            bucket,
            region,
            endpoint,
            force_path_style,
            access_key_id,
            secret_access_key,
        } = config
        else {
            return Err(FerryError::InvalidConfig(format!(
                "{name} is not an s3 store"
            )));
        };

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let (Some(id), Some(secret)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "ferry-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(*force_path_style);
        if let Some(ep) = endpoint {
            builder = builder.endpoint_url(ep.clone());
        }
        let client = Client::from_conf(builder.build());

        debug!(store = name, bucket = %bucket, region = %region, "s3 client configured");
        Ok(Self::new(name, client, bucket.clone()).with_public_read(public_read))
    }

    fn err<E>(&self, op: &str, key: &str, err: &E) -> FerryError
    where
        E: std::error::Error + 'static,
    {
        FerryError::store(
            &self.name,
            format!("{op} s3://{}/{key}: {}", self.bucket, DisplayErrorContext(err)),
        )
    }
}

fn is_not_found<E>(err: &SdkError<E, HttpResponse>) -> bool {
    err.raw_response().map(|r| r.status().as_u16()) == Some(404)
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| self.err("head bucket", "", &e))?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        check_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(ObjectMeta {
                size: out.content_length().unwrap_or(0).max(0) as u64,
                etag: out.e_tag().map(str::to_string),
            })),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                if missing || is_not_found(&e) {
                    Ok(None)
                } else {
                    Err(self.err("head", key, &e))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        check_key(key)?;
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing || is_not_found(&e) {
                    return Err(FerryError::ObjectNotFound(key.to_string()));
                }
                return Err(self.err("get", key, &e));
            }
        };
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| self.err("read body of", key, &e))?;
        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<PutResult> {
        check_key(key)?;
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));
        if self.public_read {
            req = req.acl(ObjectCannedAcl::PublicRead);
        }
        let out = req.send().await.map_err(|e| self.err("put", key, &e))?;
        Ok(PutResult {
            etag: out.e_tag().map(str::to_string),
        })
    }
}
