//! Local filesystem fetcher (schemes `file` and none).

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use super::ResourceFetchError;
use super::ResourceFetcher;
use super::uri_scheme;

pub struct FileResourceFetcher;

impl FileResourceFetcher {
    fn path_for(uri: &str) -> PathBuf {
        if let Ok(url) = Url::parse(uri) {
            if url.scheme() == "file" {
                return PathBuf::from(url.path());
            }
        }
        PathBuf::from(uri)
    }
}

#[async_trait(?Send)]
impl ResourceFetcher for FileResourceFetcher {
    fn supports(&self, uri: &str) -> bool {
        matches!(uri_scheme(uri).as_deref(), None | Some("file"))
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ResourceFetchError> {
        let path = Self::path_for(uri);
        if !path.exists() {
            return Err(ResourceFetchError::NotFound {
                uri: uri.to_string(),
            });
        }
        tokio::fs::read(&path)
            .await
            .map_err(|error| ResourceFetchError::Backend {
                uri: uri.to_string(),
                message: error.to_string(),
            })
    }
}
