//! Canonical request keys derived from submitted video URLs.
//!
//! Two submissions of the same video must map to the same key no matter
//! which share link, tracking parameters or surrounding whitespace the
//! user pasted. The key is what the ledger reserves against and what the
//! error cache is indexed by.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Longest URL accepted for submission
pub const MAX_URL_LENGTH: usize = 2048;

/// Supported video platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    TikTok,
    YouTube,
}

/// Why a raw URL could not be turned into a request key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("URL cannot be empty")]
    Empty,

    #[error("URL too long ({length} > {MAX_URL_LENGTH} characters)")]
    TooLong { length: usize },

    #[error("Invalid URL format: {0}")]
    Malformed(String),

    #[error("URL must use HTTP or HTTPS protocol")]
    UnsupportedScheme,

    #[error("Unsupported video URL: {0}")]
    UnsupportedVideoUrl(String),
}

/// Normalized identifier for a submitted video
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Normalize a raw, user-supplied URL into a canonical key
    pub fn normalize(raw: &str) -> Result<Self, NormalizeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NormalizeError::Empty);
        }
        if trimmed.len() > MAX_URL_LENGTH {
            return Err(NormalizeError::TooLong {
                length: trimmed.len(),
            });
        }

        let parsed =
            Url::parse(trimmed).map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NormalizeError::UnsupportedScheme);
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let canonical = match host.as_str() {
            "tiktok.com" | "www.tiktok.com" | "m.tiktok.com" => tiktok_video(&segments),
            "vm.tiktok.com" | "vt.tiktok.com" => match segments.as_slice() {
                [code] if is_share_code(code) => Some(format!("https://{}/{}", host, code)),
                _ => None,
            },
            "youtube.com" | "www.youtube.com" | "m.youtube.com" => youtube_video(&parsed, &segments),
            "youtu.be" => match segments.as_slice() {
                [id, ..] if is_youtube_id(id) => Some(youtube_watch_url(id)),
                _ => None,
            },
            _ => None,
        };

        canonical
            .map(Self)
            .ok_or_else(|| NormalizeError::UnsupportedVideoUrl(trimmed.to_string()))
    }

    /// The canonical URL string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform the key belongs to
    pub fn platform(&self) -> Platform {
        if self.0.contains("tiktok.com") {
            Platform::TikTok
        } else {
            Platform::YouTube
        }
    }

    /// Short stable digest used in logs and journal entries
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn tiktok_video(segments: &[&str]) -> Option<String> {
    match segments {
        [user, "video", id, ..] if user.starts_with('@') && is_username(&user[1..]) && is_numeric(id) => {
            Some(format!("https://www.tiktok.com/{}/video/{}", user, id))
        }
        ["video", id, ..] if is_numeric(id) => Some(format!("https://www.tiktok.com/video/{}", id)),
        _ => None,
    }
}

fn youtube_video(parsed: &Url, segments: &[&str]) -> Option<String> {
    match segments {
        ["watch"] => parsed
            .query_pairs()
            .find(|(name, _)| name == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| is_youtube_id(id))
            .map(|id| youtube_watch_url(&id)),
        ["shorts", id, ..] if is_youtube_id(id) => Some(youtube_watch_url(id)),
        _ => None,
    }
}

fn youtube_watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn is_username(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn is_share_code(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_youtube_id(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiktok_tracking_params_dropped() {
        let a = RequestKey::normalize(
            "  https://www.tiktok.com/@some.user/video/7234567890123456789?is_from_webapp=1&sender_device=pc ",
        )
        .unwrap();
        let b = RequestKey::normalize("https://tiktok.com/@some.user/video/7234567890123456789")
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            "https://www.tiktok.com/@some.user/video/7234567890123456789"
        );
        assert_eq!(a.platform(), Platform::TikTok);
    }

    #[test]
    fn test_tiktok_short_link() {
        let key = RequestKey::normalize("https://vm.tiktok.com/ZMabc123/?k=1").unwrap();
        assert_eq!(key.as_str(), "https://vm.tiktok.com/ZMabc123");
    }

    #[test]
    fn test_youtube_variants_share_a_key() {
        let watch = RequestKey::normalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s").unwrap();
        let short = RequestKey::normalize("https://youtu.be/dQw4w9WgXcQ?si=tracking").unwrap();
        let mobile = RequestKey::normalize("https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ").unwrap();
        let shorts = RequestKey::normalize("https://youtube.com/shorts/dQw4w9WgXcQ").unwrap();

        assert_eq!(watch.as_str(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(watch, short);
        assert_eq!(watch, mobile);
        assert_eq!(watch, shorts);
        assert_eq!(watch.platform(), Platform::YouTube);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(RequestKey::normalize("   "), Err(NormalizeError::Empty));
        assert!(matches!(
            RequestKey::normalize("not a url"),
            Err(NormalizeError::Malformed(_))
        ));
        assert_eq!(
            RequestKey::normalize("ftp://www.tiktok.com/@a/video/1"),
            Err(NormalizeError::UnsupportedScheme)
        );
        assert!(matches!(
            RequestKey::normalize("https://example.com/video/123"),
            Err(NormalizeError::UnsupportedVideoUrl(_))
        ));
        assert!(matches!(
            RequestKey::normalize("https://www.tiktok.com/@user/video/abc"),
            Err(NormalizeError::UnsupportedVideoUrl(_))
        ));
        assert!(matches!(
            RequestKey::normalize("https://www.youtube.com/watch"),
            Err(NormalizeError::UnsupportedVideoUrl(_))
        ));
    }

    #[test]
    fn test_rejects_overlong_url() {
        let url = format!("https://www.tiktok.com/@user/video/1?{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(
            RequestKey::normalize(&url),
            Err(NormalizeError::TooLong { .. })
        ));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let key = RequestKey::normalize("https://youtu.be/abc").unwrap();
        let fp = key.fingerprint();

        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, RequestKey::normalize("https://youtube.com/watch?v=abc").unwrap().fingerprint());
    }
}
