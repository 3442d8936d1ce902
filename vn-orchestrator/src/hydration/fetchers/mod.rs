//! Scheme-dispatched retrieval of external XML resources.

mod file;
mod s3;

use async_trait::async_trait;
use url::Url;

pub use self::file::FileResourceFetcher;
pub use self::s3::S3ResourceFetcher;
pub use crate::error::ResourceFetchError;

/// Capability set for retrieving the bytes behind an `href` URI.
#[async_trait(?Send)]
pub trait ResourceFetcher {
    /// Whether this fetcher can handle the given URI.
    fn supports(&self, uri: &str) -> bool;

    /// Retrieve the resource contents as raw bytes.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ResourceFetchError>;
}

/// The scheme of a URI, `None` for bare paths.
pub(crate) fn uri_scheme(uri: &str) -> Option<String> {
    match Url::parse(uri) {
        Ok(url) => Some(url.scheme().to_string()),
        // A bare relative path is a valid local reference.
        Err(url::ParseError::RelativeUrlWithoutBase) => None,
        Err(_) => None,
    }
}

/// Delegates fetching to the first supporting fetcher.
pub struct CompositeResourceFetcher {
    fetchers: Vec<Box<dyn ResourceFetcher>>,
}

impl CompositeResourceFetcher {
    pub fn new(fetchers: Vec<Box<dyn ResourceFetcher>>) -> Self {
        Self { fetchers }
    }
}

#[async_trait(?Send)]
impl ResourceFetcher for CompositeResourceFetcher {
    fn supports(&self, uri: &str) -> bool {
        self.fetchers.iter().any(|fetcher| fetcher.supports(uri))
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ResourceFetchError> {
        for fetcher in &self.fetchers {
            if fetcher.supports(uri) {
                return fetcher.fetch(uri).await;
            }
        }
        Err(ResourceFetchError::UnsupportedScheme {
            uri: uri.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_detection() {
        assert_eq!(uri_scheme("s3://bucket/key.xml").as_deref(), Some("s3"));
        assert_eq!(uri_scheme("file:///tmp/a.xml").as_deref(), Some("file"));
        assert_eq!(uri_scheme("relative/path.xml"), None);
        assert_eq!(uri_scheme("/absolute/path.xml"), None);
    }

    #[tokio::test]
    async fn composite_rejects_unsupported_schemes() {
        let composite = CompositeResourceFetcher::new(vec![Box::new(FileResourceFetcher)]);
        let error = composite.fetch("s3://bucket/key.xml").await.unwrap_err();
        assert!(error.to_string().contains("s3://bucket/key.xml"));
    }
}
