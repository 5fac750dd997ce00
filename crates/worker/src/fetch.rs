//! Attachment byte fetcher
//!
//! Downloads attachment bytes over HTTPS with per-type size caps. The
//! blocked-extension policy runs before any byte leaves the network:
//! rejected files are never fetched.

use convoforge_common::errors::{AppError, Result};
use std::time::Duration;
use tracing::debug;

/// Extension of a URL path or filename, lowercased with the leading dot,
/// query string ignored. None when there is no extension.
pub fn extension_of(url_or_name: &str) -> Option<String> {
    let path = url_or_name
        .split(['?', '#'])
        .next()
        .unwrap_or(url_or_name);
    let name = path.rsplit('/').next().unwrap_or(path);
    let dot = name.rfind('.')?;
    if dot == 0 || dot == name.len() - 1 {
        return None;
    }
    Some(name[dot..].to_ascii_lowercase())
}

pub struct AttachmentFetcher {
    client: reqwest::Client,
    blocked_extensions: Vec<String>,
}

impl AttachmentFetcher {
    pub fn new(blocked_extensions: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AppError::HttpClient)?;
        Ok(Self {
            client,
            blocked_extensions,
        })
    }

    /// Check the blocked-extension policy; Err means rejected.
    pub fn check_extension(&self, url_or_name: &str) -> Result<()> {
        if let Some(ext) = extension_of(url_or_name) {
            if self.blocked_extensions.iter().any(|b| *b == ext) {
                return Err(AppError::AttachmentBlocked { extension: ext });
            }
        }
        Ok(())
    }

    /// Fetch bytes with a size cap enforced both on the declared length
    /// and the actual body.
    pub async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>> {
        if !url.starts_with("https://") {
            return Err(AppError::InvalidFormat {
                message: format!("attachment URL is not https: {}", url),
            });
        }

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            if status.is_client_error() {
                // The upstream CDN link expired or was revoked.
                return Err(AppError::NotFound {
                    resource_type: "attachment_url".into(),
                    id: url.to_string(),
                });
            }
            return Err(AppError::ServiceUnavailable {
                message: format!("attachment fetch failed with {}", status),
            });
        }

        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(AppError::AttachmentTooLarge {
                    size: len,
                    limit: max_bytes,
                });
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 > max_bytes {
            return Err(AppError::AttachmentTooLarge {
                size: bytes.len() as u64,
                limit: max_bytes,
            });
        }

        debug!(url, size = bytes.len(), "Attachment fetched");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> AttachmentFetcher {
        AttachmentFetcher::new(
            vec![".exe", ".bat", ".sh", ".ps1", ".cmd"]
                .into_iter()
                .map(String::from)
                .collect(),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("evil.exe"), Some(".exe".to_string()));
        assert_eq!(
            extension_of("https://cdn.example.com/a/b/notes.TXT?ex=123"),
            Some(".txt".to_string())
        );
        assert_eq!(extension_of("no_extension"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_blocked_extension_rejected() {
        let f = fetcher();
        let err = f.check_extension("https://cdn.example.com/evil.exe").unwrap_err();
        assert!(matches!(err, AppError::AttachmentBlocked { .. }));

        // Case-insensitive
        assert!(f.check_extension("payload.ExE").is_err());
    }

    #[test]
    fn test_allowed_extension_passes() {
        let f = fetcher();
        assert!(f.check_extension("https://cdn.example.com/report.pdf").is_ok());
        assert!(f.check_extension("notes.md").is_ok());
        assert!(f.check_extension("no_extension").is_ok());
    }
}
