/*!
Amazon S3 key-value store, used as a cloud mirror.

Each key becomes an object under `prefix/` in the bucket. Requests run on a
private Tokio runtime and are retried on transient failures.
*/

use aws_config::SdkConfig;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use savestate_retry::{classify_error, cloud_storage_retry_policy, with_backoff, RetryPolicy};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::{from_retry_error, write_entries_restoring, KeyValueStore, WriteBatch};
use crate::{Result, SaveError};

/// Amazon S3 key-value store
///
/// # Authentication
/// Uses the standard AWS credential provider chain (environment variables,
/// `~/.aws/credentials`, instance or task roles).
///
/// # Example
/// ```rust,no_run
/// use savestate_core::storage::{KeyValueStore, S3Store};
///
/// let store = S3Store::new("my-saves-bucket".to_string(), "player-1".to_string())?;
/// store.put("save.timestamp", b"2024-01-01T00:00:00Z")?;
/// # Ok::<(), savestate_core::SaveError>(())
/// ```
#[derive(Debug)]
pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: String,
    runtime: Arc<Runtime>,
    retry_policy: RetryPolicy,
}

impl S3Store {
    /// Create a store for `bucket`, keeping keys under `prefix`
    ///
    /// # Errors
    /// Returns an error if the Tokio runtime cannot be created or no AWS
    /// credentials are available.
    pub fn new(bucket: String, prefix: String) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            SaveError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;

        let sdk_config = runtime.block_on(async {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await
        });

        if sdk_config.credentials_provider().is_none() {
            return Err(SaveError::storage(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        Ok(Self::from_parts(
            S3Client::new(&sdk_config),
            bucket,
            prefix,
            runtime,
        ))
    }

    /// Create a store with explicit AWS configuration
    pub fn with_config(bucket: String, prefix: String, config: SdkConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            SaveError::storage(format!("Failed to create async runtime for S3 client: {e}"))
        })?;
        Ok(Self::from_parts(
            S3Client::new(&config),
            bucket,
            prefix,
            runtime,
        ))
    }

    fn from_parts(client: S3Client, bucket: String, prefix: String, runtime: Runtime) -> Self {
        let prefix = prefix.trim_matches('/').to_string();
        info!(bucket = %bucket, prefix = %prefix, "Initialized S3 store");
        Self {
            client,
            bucket,
            prefix,
            runtime: Arc::new(runtime),
            retry_policy: cloud_storage_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, size = data.len(), "Starting S3 put_object");

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let data = data.to_vec();
        let result = self.runtime.block_on(with_backoff(
            "s3_put_object",
            &self.retry_policy,
            move |_attempt| {
                let client = client.clone();
                let bucket = bucket.clone();
                let key = object_key.clone();
                let data = data.clone();
                Box::pin(async move {
                    client
                        .put_object()
                        .bucket(&bucket)
                        .key(&key)
                        .body(ByteStream::from(data))
                        .send()
                        .await
                        .map(|_| ())
                        .map_err(|e| classify_error("s3_put_object", map_s3_error("put_object", e, &key)))
                })
            },
        ));

        result.map_err(|e| {
            let err = from_retry_error(e);
            error!(bucket = %self.bucket, key = %key, error = %err, "Failed to write object to S3");
            err
        })
    }

    fn delete_object(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key);
        let result = self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
        });

        match result {
            Ok(_) => {
                debug!(bucket = %self.bucket, key = %object_key, "Deleted S3 object");
                Ok(())
            }
            Err(e) => {
                let mapped = map_s3_error("delete_object", e, &object_key);
                error!(bucket = %self.bucket, key = %object_key, error = %mapped, "Failed to delete S3 object");
                Err(mapped)
            }
        }
    }
}

impl KeyValueStore for S3Store {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let object_key = self.object_key(key);
        debug!(bucket = %self.bucket, key = %object_key, "Starting S3 get_object");

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let result = self.runtime.block_on(with_backoff(
            "s3_get_object",
            &self.retry_policy,
            move |_attempt| {
                let client = client.clone();
                let bucket = bucket.clone();
                let key = object_key.clone();
                Box::pin(async move {
                    let output = match client.get_object().bucket(&bucket).key(&key).send().await {
                        Ok(output) => output,
                        Err(e) if is_not_found(&e) => return Ok(None),
                        Err(e) => {
                            return Err(classify_error(
                                "s3_get_object",
                                map_s3_error("get_object", e, &key),
                            ))
                        }
                    };
                    let bytes = output.body.collect().await.map_err(|e| {
                        classify_error(
                            "s3_get_object",
                            SaveError::storage(format!("Failed to read S3 object stream: {e}")),
                        )
                    })?;
                    Ok(Some(bytes.into_bytes().to_vec()))
                })
            },
        ));

        result.map_err(|e| {
            let err = from_retry_error(e);
            error!(bucket = %self.bucket, key = %key, error = %err, "Failed to read object from S3");
            err
        })
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        info!(
            bucket = %self.bucket,
            prefix = %self.prefix,
            entries = batch.len(),
            bytes = batch.payload_size(),
            "Writing batch to S3"
        );

        write_entries_restoring(
            batch,
            |key| self.get(key),
            |key, value| self.put_object(key, value),
            |key| self.delete_object(key),
        )
    }

    fn contains(&self, key: &str) -> bool {
        let object_key = self.object_key(key);
        let result = self.runtime.block_on(async {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
        });

        let exists = result.is_ok();
        debug!(bucket = %self.bucket, key = %object_key, exists, "S3 existence check completed");
        exists
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.delete_object(key)
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

fn is_not_found<E: ProvideErrorMetadata>(error: &SdkError<E>) -> bool {
    matches!(
        error.as_service_error().and_then(|e| e.code()),
        Some("NoSuchKey") | Some("NotFound")
    )
}

/// Map AWS SDK errors to SaveError with appropriate context
fn map_s3_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    op: &str,
    error: SdkError<E>,
    key: &str,
) -> SaveError {
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            SaveError::storage(format!("S3 {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            SaveError::storage(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::ResponseError(response_err) => {
            SaveError::storage(format!("S3 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchBucket") => SaveError::storage("S3 bucket not found"),
            Some("AccessDenied") | Some("Forbidden") => SaveError::storage(
                "Access denied to S3 (check credentials and permissions)",
            ),
            Some("EntityTooLarge") => SaveError::storage(format!(
                "S3 rejected object '{key}' as too large"
            )),
            Some(code) => SaveError::storage(format!(
                "S3 service error ({}): {}",
                code,
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => SaveError::storage(format!("S3 {op} service error: {service_err:?}")),
        },
        _ => SaveError::storage(format!("S3 {op} error: {error}")),
    }
}
