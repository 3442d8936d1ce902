//! Object-store fetcher for `s3://bucket/key` URIs.

use async_trait::async_trait;
use url::Url;

use super::ResourceFetchError;
use super::ResourceFetcher;
use super::uri_scheme;

pub struct S3ResourceFetcher {
    client: aws_sdk_s3::Client,
}

impl S3ResourceFetcher {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a fetcher from ambient AWS configuration (environment,
    /// profile, instance metadata).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }

    fn parse_location(uri: &str) -> Result<(String, String), ResourceFetchError> {
        let invalid = || ResourceFetchError::InvalidUri {
            uri: uri.to_string(),
        };
        let url = Url::parse(uri).map_err(|_| invalid())?;
        let bucket = url.host_str().filter(|host| !host.is_empty()).ok_or_else(invalid)?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(invalid());
        }
        Ok((bucket.to_string(), key.to_string()))
    }
}

#[async_trait(?Send)]
impl ResourceFetcher for S3ResourceFetcher {
    fn supports(&self, uri: &str) -> bool {
        uri_scheme(uri).as_deref() == Some("s3")
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ResourceFetchError> {
        let (bucket, key) = Self::parse_location(uri)?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| ResourceFetchError::Backend {
                uri: uri.to_string(),
                message: error.to_string(),
            })?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|error| ResourceFetchError::Backend {
                uri: uri.to_string(),
                message: error.to_string(),
            })?;
        Ok(data.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_key() {
        let (bucket, key) = S3ResourceFetcher::parse_location("s3://models/rates/usd.xml").unwrap();
        assert_eq!(bucket, "models");
        assert_eq!(key, "rates/usd.xml");
    }

    #[test]
    fn rejects_missing_bucket_or_key() {
        assert!(S3ResourceFetcher::parse_location("s3:///key.xml").is_err());
        assert!(S3ResourceFetcher::parse_location("s3://bucket").is_err());
    }
}
