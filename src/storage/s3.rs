use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use aws_sdk_s3::{Client, error::SdkError, primitives::ByteStream};
use bytes::Bytes;
use tracing::info;
use async_trait::async_trait;
use crate::{config::Config, storage::{BlobReader, Storage, StorageError}};

// AWS S3 Storage backend
#[derive(Clone)]
pub struct S3Storage {
    client: Client,  // AWS S3 client
    bucket: String,  // S3 bucket name
}

impl S3Storage {
    /// Initialize S3 client and ensure the bucket exists
    pub async fn new(config: &Config) -> Self {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()))
            .or_default_provider()
            .or_else(Region::new("us-east-1"));

        let mut aws_config_builder = aws_config::from_env().region(region_provider);

        // Custom endpoint (e.g., for MinIO)
        if let Some(endpoint) = &config.s3_endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);

            let credentials = Credentials::new(
                config.s3_access_key.clone(),
                config.s3_secret_key.clone(),
                None,
                None,
                "custom",
            );

            aws_config_builder = aws_config_builder.credentials_provider(credentials);
        }

        let aws_config = aws_config_builder.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true) // Required for MinIO
                .build()
        );

        Self::ensure_bucket_exists(&client, &config.s3_bucket).await;

        Self {
            client,
            bucket: config.s3_bucket.clone(),
        }
    }

    /// Ensure the S3 bucket exists, or create it if possible
    async fn ensure_bucket_exists(client: &Client, bucket: &str) {
        if client.head_bucket().bucket(bucket).send().await.is_ok() {
            info!("Bucket {} exists", bucket);
            return;
        }

        match client.create_bucket().bucket(bucket).send().await {
            Ok(_) => info!("Bucket {} created successfully", bucket),
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("BucketAlreadyOwnedByYou")
                    || err_msg.contains("BucketAlreadyExists")
                {
                    info!("Bucket {} already exists", bucket);
                } else {
                    tracing::error!("Bucket {} does not exist and cannot be created: {}", bucket, err_msg);
                }
            }
        }
    }
}

#[async_trait]
impl Storage for S3Storage {

    async fn upload(&self, key: &str, content: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| StorageError::UploadError(e.to_string()))?;

        Ok(())
    }

    /// Opens an object as a byte stream without buffering it
    async fn open(&self, key: &str) -> Result<BlobReader, StorageError> {
        let response = self.client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service) if service.err().is_no_such_key() => {
                    StorageError::NotFound(key.to_string())
                }
                _ => StorageError::DownloadError(e.to_string()),
            })?;

        Ok(Box::pin(response.body.into_async_read()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteError(e.to_string()))?;

        info!("Blob deleted from s3: {}", key);
        Ok(())
    }
}
