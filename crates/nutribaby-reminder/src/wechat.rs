//! WeChat mini-program subscribe-message transport.
//!
//! Flow: fetch (and cache) an access token from `/cgi-bin/token`, then POST
//! to `/cgi-bin/message/subscribe/send`. The upstream `errcode` decides
//! whether a failure is transient or permanent.

use async_trait::async_trait;
use nutribaby_core::{NutriBabyError, Result, TransportError, WechatConfig};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::transport::{PushMessage, PushTransport};

/// Refresh the access token this long before upstream expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Classify a non-zero upstream `errcode`.
pub fn classify_errcode(errcode: i64, errmsg: &str) -> TransportError {
    let text = format!("errcode {errcode}: {errmsg}");
    match errcode {
        // system busy, rate limited, access token invalid or expired
        -1 | 45009 | 40001 | 40014 | 42001 => TransportError::Transient(text),
        // user refused, bad openid, bad params, bad page, bad template...
        _ => TransportError::Permanent(text),
    }
}

fn token_invalidated(errcode: i64) -> bool {
    matches!(errcode, 40001 | 40014 | 42001)
}

fn classify_http(e: reqwest::Error) -> TransportError {
    match e.status() {
        Some(status) if status.is_client_error() => {
            TransportError::Permanent(format!("HTTP {status}: {e}"))
        }
        _ => TransportError::Transient(format!("network error: {e}")),
    }
}

/// Delivers subscribe messages through the WeChat open API.
pub struct WechatTransport {
    config: WechatConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl WechatTransport {
    pub fn new(config: WechatConfig) -> Result<Self> {
        if !config.has_credentials() {
            return Err(NutriBabyError::Config(
                "wechat.app_id and wechat.app_secret are required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| NutriBabyError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Request body for one message.
    pub fn send_body(&self, message: &PushMessage) -> serde_json::Value {
        serde_json::json!({
            "touser": message.caregiver_id,
            "template_id": message.template_id,
            "page": message.landing_page,
            "data": message.payload.to_wire(),
            "miniprogram_state": self.config.miniprogram_state,
            "lang": self.config.lang,
        })
    }

    async fn access_token(&self) -> std::result::Result<String, TransportError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let resp: TokenResponse = self
            .client
            .get(self.url("/cgi-bin/token"))
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.config.app_id.as_str()),
                ("secret", self.config.app_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(classify_http)?
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("token response: {e}")))?;

        let Some(value) = resp.access_token.filter(|t| !t.is_empty()) else {
            // bad appid/secret will not fix itself
            return Err(match resp.errcode {
                -1 | 45009 => classify_errcode(resp.errcode, &resp.errmsg),
                code => TransportError::Permanent(format!(
                    "access token refused, errcode {code}: {}",
                    resp.errmsg
                )),
            });
        };
        let ttl = Duration::from_secs(resp.expires_in.unwrap_or(7200));
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        tracing::debug!("🔑 WeChat access token refreshed (ttl {}s)", ttl.as_secs());
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl PushTransport for WechatTransport {
    fn name(&self) -> &str {
        "wechat"
    }

    async fn send(&self, message: &PushMessage) -> std::result::Result<(), TransportError> {
        let token = self.access_token().await?;
        let resp: SendResponse = self
            .client
            .post(self.url("/cgi-bin/message/subscribe/send"))
            .query(&[("access_token", token.as_str())])
            .json(&self.send_body(message))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(classify_http)?
            .json()
            .await
            .map_err(|e| TransportError::Transient(format!("send response: {e}")))?;

        if resp.errcode == 0 {
            return Ok(());
        }
        if token_invalidated(resp.errcode) {
            self.invalidate_token().await;
        }
        Err(classify_errcode(resp.errcode, &resp.errmsg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Payload;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: &str) -> WechatConfig {
        WechatConfig {
            app_id: "wx-app".into(),
            app_secret: "secret".into(),
            api_base: api_base.into(),
            ..WechatConfig::default()
        }
    }

    fn message() -> PushMessage {
        let mut payload = Payload::new();
        payload.insert("thing2", "about 3 hours");
        payload.insert("time1", "2024-05-01 09:00:00");
        PushMessage {
            caregiver_id: "openid-a".into(),
            template_id: "tpl-breast".into(),
            payload,
            landing_page: "pages/record/feeding/feeding".into(),
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/cgi-bin/token"))
            .and(query_param("appid", "wx-app"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "AT", "expires_in": 7200})),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn errcode_classes() {
        assert!(classify_errcode(-1, "busy").is_retryable());
        assert!(classify_errcode(45009, "limit").is_retryable());
        assert!(classify_errcode(42001, "expired").is_retryable());
        assert!(!classify_errcode(43101, "user refuse to accept the msg").is_retryable());
        assert!(!classify_errcode(40003, "invalid openid").is_retryable());
        assert!(!classify_errcode(47003, "argument invalid").is_retryable());
    }

    #[test]
    fn requires_credentials() {
        assert!(WechatTransport::new(WechatConfig::default()).is_err());
    }

    #[test]
    fn body_shape() {
        let transport = WechatTransport::new(config("https://example.invalid")).unwrap();
        let body = transport.send_body(&message());
        assert_eq!(body["touser"], "openid-a");
        assert_eq!(body["template_id"], "tpl-breast");
        assert_eq!(body["page"], "pages/record/feeding/feeding");
        assert_eq!(body["data"]["thing2"]["value"], "about 3 hours");
        assert_eq!(body["miniprogram_state"], "formal");
        assert_eq!(body["lang"], "zh_CN");
    }

    #[tokio::test]
    async fn sends_and_caches_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/subscribe/send"))
            .and(query_param("access_token", "AT"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let transport = WechatTransport::new(config(&server.uri())).unwrap();
        transport.send(&message()).await.unwrap();
        transport.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn refused_message_is_permanent() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/subscribe/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"errcode": 43101, "errmsg": "user refuse to accept the msg"}),
            ))
            .mount(&server)
            .await;

        let transport = WechatTransport::new(config(&server.uri())).unwrap();
        let err = transport.send(&message()).await.unwrap_err();
        assert!(matches!(err, TransportError::Permanent(_)));
        assert!(err.message().contains("43101"));
    }

    #[tokio::test]
    async fn expired_token_is_dropped_and_refetched() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/subscribe/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"errcode": 42001, "errmsg": "access_token expired"}),
            ))
            .mount(&server)
            .await;

        let transport = WechatTransport::new(config(&server.uri())).unwrap();
        let first = transport.send(&message()).await.unwrap_err();
        assert!(first.is_retryable());
        let _ = transport.send(&message()).await;
    }

    #[tokio::test]
    async fn upstream_5xx_is_transient() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/message/subscribe/send"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let transport = WechatTransport::new(config(&server.uri())).unwrap();
        let err = transport.send(&message()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
