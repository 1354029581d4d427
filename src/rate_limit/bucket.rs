//! Per-endpoint rate-limit bucket state.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;

/// Quota state for one endpoint, fed from response headers.
///
/// The API reports `X-RateLimit-Remaining` (calls left in the window),
/// `X-RateLimit-Reset` (epoch seconds when the window rolls over) and
/// `X-RateLimit-Reset-After` (relative seconds, preferred when present
/// since it sidesteps clock skew).
#[derive(Debug, Clone, Default)]
pub struct EndpointBucket {
    /// Calls remaining in the current window
    pub remaining: Option<u32>,
    /// When the window resets, as a unix timestamp
    pub reset_at: Option<SystemTime>,
    /// When this endpoint was last called
    pub last_request_at: Option<SystemTime>,
}

impl EndpointBucket {
    /// Fold response headers into the bucket.
    pub fn update(&mut self, headers: &HeaderMap) {
        if let Some(remaining) = parse_header::<u32>(headers, "X-RateLimit-Remaining") {
            self.remaining = Some(remaining);
        }
        // Relative reset wins over the absolute one.
        if let Some(after) = parse_header::<f64>(headers, "X-RateLimit-Reset-After") {
            self.reset_at = Some(SystemTime::now() + Duration::from_secs_f64(after.max(0.0)));
        } else if let Some(epoch) = parse_header::<f64>(headers, "X-RateLimit-Reset") {
            self.reset_at = Some(UNIX_EPOCH + Duration::from_secs_f64(epoch.max(0.0)));
        }
        self.last_request_at = Some(SystemTime::now());
    }

    /// How long a caller must wait before the endpoint accepts another
    /// call, or `None` when quota remains.
    pub fn wait_needed(&self) -> Option<Duration> {
        if self.remaining? > 0 {
            return None;
        }
        let reset_at = self.reset_at?;
        reset_at
            .duration_since(SystemTime::now())
            .ok()
            // Small buffer so the window has actually rolled over.
            .map(|d| d + Duration::from_millis(100))
    }
}

/// Parse a `Retry-After` header value, in seconds.
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    parse_header::<f64>(headers, "Retry-After").map(|secs| Duration::from_secs_f64(secs.max(0.0)))
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, key: &str) -> Option<T> {
    headers.get(key)?.to_str().ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                reqwest::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn quota_left_needs_no_wait() {
        let mut bucket = EndpointBucket::default();
        bucket.update(&headers(&[
            ("X-RateLimit-Remaining", "3"),
            ("X-RateLimit-Reset-After", "5.0"),
        ]));
        assert_eq!(bucket.remaining, Some(3));
        assert!(bucket.wait_needed().is_none());
    }

    #[test]
    fn exhausted_quota_waits_until_reset() {
        let mut bucket = EndpointBucket::default();
        bucket.update(&headers(&[
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset-After", "2.0"),
        ]));
        let wait = bucket.wait_needed().expect("should wait");
        assert!(wait >= Duration::from_secs(1));
        assert!(wait <= Duration::from_secs(3));
    }

    #[test]
    fn relative_reset_preferred_over_absolute() {
        let far_future = (SystemTime::now() + Duration::from_secs(3600))
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        let mut bucket = EndpointBucket::default();
        bucket.update(&headers(&[
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", &format!("{far_future}")),
            ("X-RateLimit-Reset-After", "1.0"),
        ]));
        assert!(bucket.wait_needed().unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn retry_after_parses_seconds() {
        let map = headers(&[("Retry-After", "7")]);
        assert_eq!(retry_after_header(&map), Some(Duration::from_secs(7)));
        assert_eq!(retry_after_header(&HeaderMap::new()), None);
    }
}
