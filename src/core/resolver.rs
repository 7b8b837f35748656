//! Share-link resolution with ordered endpoint fallback
//!
//! Endpoints are tried strictly in configuration order and the first valid
//! answer wins. An endpoint gets exactly one bounded attempt; anything short
//! of a recognized success with a non-empty link moves on to the next one.

use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::core::error::{Error, Result};
use crate::core::job::ResolvedFile;
use crate::core::size::parse_size;

/// Filename used when an endpoint omits one
const FALLBACK_FILENAME: &str = "unknown_file";

/// Configuration for resolver endpoints
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Endpoint base URLs, called as `{endpoint}?url={share_url}`, in priority order
    pub endpoints: Vec<String>,

    /// Bound on a single endpoint attempt
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://teraboxapi-phi.vercel.app/api".to_string(),
                "https://terabox-dl-api.vercel.app/api".to_string(),
            ],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Keys that may carry the direct link, in order of preference
const LINK_KEYS: [&str; 3] = ["dlink", "direct_link", "download_url"];
const NAME_KEYS: [&str; 2] = ["file_name", "filename"];
const SIZE_KEYS: [&str; 2] = ["size", "file_size"];

/// A resolver answer. Field names and types vary between services, so the
/// fields are picked out of the JSON object by hand.
#[derive(Debug)]
struct ResolverResponse {
    status: Option<Value>,
    dlink: Option<String>,
    file_name: Option<String>,
    size: Option<Value>,
    message: Option<String>,
}

/// First key holding non-empty text; numbers count as text
fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

impl ResolverResponse {
    fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::HttpError("response is not a JSON object".to_string()));
        };

        Ok(Self {
            status: object.get("status").cloned(),
            dlink: LINK_KEYS
                .iter()
                .filter_map(|key| object.get(*key).and_then(Value::as_str))
                .map(|link| link.trim().to_string())
                .find(|link| !link.is_empty()),
            file_name: first_text(&object, &NAME_KEYS),
            size: SIZE_KEYS
                .iter()
                .filter_map(|key| object.get(*key))
                .find(|value| !value.is_null())
                .cloned(),
            message: first_text(&object, &["message"]),
        })
    }

    fn is_success(&self) -> bool {
        match &self.status {
            Some(Value::String(s)) => s.eq_ignore_ascii_case("success") || s.eq_ignore_ascii_case("ok"),
            Some(Value::Bool(ok)) => *ok,
            _ => false,
        }
    }

    fn into_resolved(self, endpoint: usize) -> Result<ResolvedFile> {
        if !self.is_success() {
            let reason = self.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::HttpError(format!("endpoint reported failure: {reason}")));
        }

        let direct_url = self
            .dlink
            .ok_or_else(|| Error::HttpError("response has no direct link".to_string()))?;

        let filename = self
            .file_name
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        let size = self.size.as_ref().and_then(parse_size).unwrap_or(0);

        Ok(ResolvedFile {
            direct_url,
            filename,
            size,
            endpoint,
        })
    }
}

/// Turns share links into direct download links
pub struct ResolverClient {
    client: Client,
    config: ResolverConfig,
}

impl Default for ResolverClient {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl ResolverClient {
    /// Create a resolver using the shared HTTP client
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_client(crate::core::http_client(), config)
    }

    pub fn with_client(client: Client, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves `share_url`, trying each endpoint once in order
    pub async fn resolve(&self, share_url: &str) -> Result<ResolvedFile> {
        for (index, endpoint) in self.config.endpoints.iter().enumerate() {
            match self.attempt(index, endpoint, share_url).await {
                Ok(resolved) => {
                    info!(
                        "🔗 Resolved via endpoint {index}: {} ({} bytes)",
                        resolved.filename, resolved.size
                    );
                    return Ok(resolved);
                }
                Err(e) => {
                    warn!("⚠️  Resolver endpoint {index} ({endpoint}) failed: {e}. Trying next...");
                }
            }
        }

        Err(Error::ResolutionFailed {
            share_url: share_url.to_string(),
            attempts: self.config.endpoints.len(),
        })
    }

    async fn attempt(&self, index: usize, endpoint: &str, share_url: &str) -> Result<ResolvedFile> {
        debug!("Resolver endpoint {index}: GET {endpoint}");
        let response = self
            .client
            .get(endpoint)
            .query(&[("url", share_url)])
            .timeout(self.config.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("status {status}")));
        }

        let body = response.bytes().await?;
        let parsed: Value = serde_json::from_slice(&body)?;
        ResolverResponse::from_value(parsed)?.into_resolved(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHARE: &str = "https://terabox.com/s/1abcdef";

    fn config_for(server: &MockServer, routes: &[&str]) -> ResolverConfig {
        ResolverConfig {
            endpoints: routes.iter().map(|r| format!("{}{}", server.uri(), r)).collect(),
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ResolverConfig::default();
        assert_eq!(config.endpoints.len(), 2);
        assert!(config.endpoints[0].starts_with("https://teraboxapi-phi"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_success_predicate() {
        let ok = ResolverResponse::from_value(json!({
            "status": "Success", "dlink": "http://x", "file_name": "a.mp4", "size": "1 KB"
        }))
        .unwrap();
        let resolved = ok.into_resolved(2).unwrap();
        assert_eq!(resolved.size, 1024);
        assert_eq!(resolved.endpoint, 2);

        let bool_ok = ResolverResponse::from_value(json!({ "status": true, "direct_link": "http://y" })).unwrap();
        let resolved = bool_ok.into_resolved(0).unwrap();
        assert_eq!(resolved.filename, "unknown_file");
        assert_eq!(resolved.size, 0);

        let empty_link = ResolverResponse::from_value(json!({ "status": "success", "dlink": "  " })).unwrap();
        assert!(empty_link.into_resolved(0).is_err());

        let error_status = ResolverResponse::from_value(json!({ "status": "error", "dlink": "http://z" })).unwrap();
        assert!(error_status.into_resolved(0).is_err());
    }

    #[test]
    fn test_several_link_keys_pick_first_non_empty() {
        let both = ResolverResponse::from_value(json!({
            "status": "success", "dlink": "http://x", "direct_link": "http://y", "file_name": "a.mp4"
        }))
        .unwrap();
        assert_eq!(both.into_resolved(0).unwrap().direct_url, "http://x");

        let blank_first = ResolverResponse::from_value(json!({
            "status": "success", "dlink": "", "direct_link": 7, "download_url": " http://z "
        }))
        .unwrap();
        assert_eq!(blank_first.into_resolved(0).unwrap().direct_url, "http://z");
    }

    #[test]
    fn test_odd_file_name_types_do_not_fail() {
        let numeric = ResolverResponse::from_value(json!({
            "status": "success", "dlink": "http://x", "file_name": 12345
        }))
        .unwrap();
        assert_eq!(numeric.into_resolved(0).unwrap().filename, "12345");

        let nested = ResolverResponse::from_value(json!({
            "status": "success", "dlink": "http://x", "file_name": {"en": "a"}, "filename": "b.mkv"
        }))
        .unwrap();
        assert_eq!(nested.into_resolved(0).unwrap().filename, "b.mkv");

        let unusable = ResolverResponse::from_value(json!({
            "status": "success", "dlink": "http://x", "file_name": [1, 2], "file_size": "3 KB"
        }))
        .unwrap();
        let resolved = unusable.into_resolved(0).unwrap();
        assert_eq!(resolved.filename, "unknown_file");
        assert_eq!(resolved.size, 3 * 1024);

        assert!(ResolverResponse::from_value(json!(["not", "an", "object"])).is_err());
    }

    #[tokio::test]
    async fn test_falls_through_malformed_endpoints() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/one"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/two"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status": "success", "dlink""#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/three"))
            .and(query_param("url", SHARE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "direct_link": "http://x",
                "filename": "a.mp4",
                "size": 104857600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = ResolverClient::new(config_for(&server, &["/one", "/two", "/three"]));
        let resolved = resolver.resolve(SHARE).await.unwrap();

        assert_eq!(
            resolved,
            ResolvedFile {
                direct_url: "http://x".to_string(),
                filename: "a.mp4".to_string(),
                size: 104_857_600,
                endpoint: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/first"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success", "dlink": "http://first", "file_name": "f.mkv", "size": "2 MB"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success", "dlink": "http://second"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let resolver = ResolverClient::new(config_for(&server, &["/first", "/second"]));
        let resolved = resolver.resolve(SHARE).await.unwrap();
        assert_eq!(resolved.direct_url, "http://first");
        assert_eq!(resolved.size, 2 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_timeout_and_error_status_fall_back() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "status": "success", "dlink": "http://slow" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok", "download_url": "http://good", "file_name": "g.mp4"
            })))
            .mount(&server)
            .await;

        let resolver = ResolverClient::new(config_for(&server, &["/slow", "/down", "/good"]));
        let resolved = resolver.resolve(SHARE).await.unwrap();
        assert_eq!(resolved.direct_url, "http://good");
        assert_eq!(resolved.endpoint, 2);
    }

    #[tokio::test]
    async fn test_exhausted_endpoints() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "error", "message": "invalid link"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = ResolverClient::new(config_for(&server, &["/a", "/b"]));
        let err = resolver.resolve(SHARE).await.unwrap_err();
        match err {
            Error::ResolutionFailed { share_url, attempts } => {
                assert_eq!(share_url, SHARE);
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected ResolutionFailed, got {other:?}"),
        }
    }
}
