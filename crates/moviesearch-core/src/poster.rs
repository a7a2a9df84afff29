//! Poster transfer: the [`PosterSource`] trait, its HTTP implementation, and
//! the decoded [`PosterImage`] stored on a record.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use thiserror::Error;

/// Why a poster transfer produced no bytes.
#[derive(Error, Debug, Clone)]
pub enum PosterError {
    #[error("invalid poster URL: {0}")]
    InvalidUrl(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("HTTP {0}")]
    Status(u16),
}

/// Something that can fetch raw poster bytes for a URL.
pub trait PosterSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PosterError>> + Send + 'a>>;
}

/// Fetches posters over HTTP with a shared `reqwest` client.
pub struct HttpPosterSource {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpPosterSource {
    pub fn new(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }
}

impl PosterSource for HttpPosterSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, PosterError>> + Send + 'a>> {
        Box::pin(async move {
            let url = reqwest::Url::parse(url).map_err(|e| PosterError::InvalidUrl(e.to_string()))?;

            let mut request = self.client.get(url);
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }
            let resp = request
                .send()
                .await
                .map_err(|e| PosterError::Transfer(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(PosterError::Status(status.as_u16()));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| PosterError::Transfer(e.to_string()))?;
            Ok(bytes.to_vec())
        })
    }
}

/// Join the CDN base URL and a poster path such as `/abc.jpg`.
///
/// Returns `None` for an empty path.
pub fn poster_url(base: &str, path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Some(format!("{base}/{path}"))
}

/// A downloaded poster.
///
/// The bytes are decoded once, off the presentation side. Undecodable bytes
/// still count as a download; `image()` is then `None`.
#[derive(Debug, Clone)]
pub struct PosterImage {
    byte_len: usize,
    format: Option<ImageFormat>,
    decoded: Option<Arc<DynamicImage>>,
}

impl PosterImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let format = image::guess_format(&bytes).ok();
        let decoded = match image::load_from_memory(&bytes) {
            Ok(img) => Some(Arc::new(img)),
            Err(e) => {
                tracing::debug!(len = bytes.len(), error = %e, "poster bytes did not decode");
                None
            }
        };
        Self {
            byte_len: bytes.len(),
            format,
            decoded,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.decoded.as_deref()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.decoded.as_ref().map(|img| img.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::png_bytes;

    #[test]
    fn poster_url_joins_single_slash() {
        assert_eq!(
            poster_url("https://image.tmdb.org/t/p/w500/", "/a.jpg").as_deref(),
            Some("https://image.tmdb.org/t/p/w500/a.jpg")
        );
        assert_eq!(
            poster_url("https://image.tmdb.org/t/p/w500", "a.jpg").as_deref(),
            Some("https://image.tmdb.org/t/p/w500/a.jpg")
        );
    }

    #[test]
    fn poster_url_empty_path() {
        assert!(poster_url("https://image.tmdb.org", "  ").is_none());
    }

    #[test]
    fn decodes_png() {
        let poster = PosterImage::from_bytes(png_bytes(4, 6));
        assert_eq!(poster.format(), Some(ImageFormat::Png));
        assert_eq!(poster.dimensions(), Some((4, 6)));
        assert!(poster.byte_len() > 0);
    }

    #[test]
    fn garbage_bytes_keep_length_only() {
        let poster = PosterImage::from_bytes(b"definitely not an image".to_vec());
        assert!(poster.image().is_none());
        assert!(poster.format().is_none());
        assert_eq!(poster.byte_len(), 23);
    }
}
