use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

pub struct ObjectMetadata {
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub size: i64,
}

#[async_trait]
pub trait StorageService: Send + Sync {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn upload_from_path(&self, key: &str, path: &Path) -> Result<()>;
    async fn download_to_path(&self, key: &str, path: &Path) -> Result<()>;
    async fn delete_file(&self, key: &str) -> Result<()>;
    async fn file_exists(&self, key: &str) -> Result<bool>;
    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;
    async fn get_object_stream(
        &self,
        key: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput>;
    async fn get_object_range(
        &self,
        key: &str,
        range: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput>;
    async fn get_object_metadata(&self, key: &str) -> Result<ObjectMetadata>;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn upload_file(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    async fn upload_from_path(&self, key: &str, path: &Path) -> Result<()> {
        let body = ByteStream::from_path(path).await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> Result<()> {
        let res = self.get_object_stream(key).await?;
        let mut reader = res.body.into_async_read();
        let mut file = tokio::fs::File::create(path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow::anyhow!(service_error))
                }
            }
        }
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let res = self.get_object_stream(key).await?;
        let data = res.body.collect().await?.to_vec();
        Ok(data)
    }

    async fn get_object_stream(
        &self,
        key: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(res)
    }

    async fn get_object_range(
        &self,
        key: &str,
        range: &str,
    ) -> Result<aws_sdk_s3::operation::get_object::GetObjectOutput> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await?;
        Ok(res)
    }

    async fn get_object_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;

        let last_modified = res.last_modified.map(|d| {
            chrono::DateTime::from_timestamp(d.secs(), d.subsec_nanos()).unwrap_or_default()
        });

        Ok(ObjectMetadata {
            last_modified,
            size: res.content_length.unwrap_or(0),
        })
    }
}
