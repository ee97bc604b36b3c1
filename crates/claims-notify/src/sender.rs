//! Outbound webhook delivery
//!
//! Token-bucket rate limiting, HMAC-SHA256 signing, Retry-After
//! compliance on 429, and exponential backoff on server errors.

use crate::events::{DeliveryReceipt, NotificationPriority, TeamsNotification};
use chrono::Utc;
use claims_common::config::NotificationsConfig;
use claims_common::{Error, Result};
use futures::future::join_all;
use reqwest::Client;
use ring::hmac;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

const MAX_BACKOFF_SECS: f64 = 60.0;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: capacity `max_burst`, refill `max_per_minute / 60`
/// tokens per second. `acquire` blocks until a token is available and
/// is mutually exclusive across concurrent callers.
pub struct RateLimiter {
    max_per_minute: u32,
    max_burst: u32,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32, max_burst: u32) -> Self {
        RateLimiter {
            max_per_minute: max_per_minute.max(1),
            max_burst: max_burst.max(1),
            state: Mutex::new(BucketState {
                tokens: max_burst.max(1) as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.max_per_minute as f64 / 60.0
    }

    /// Debit one token, sleeping until the bucket refills when empty
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.refill_rate()).min(self.max_burst as f64);

        if state.tokens < 1.0 {
            let wait = (1.0 - state.tokens) / self.refill_rate();
            warn!("Webhook rate limit reached, waiting {:.2}s", wait);
            sleep(Duration::from_secs_f64(wait)).await;
            state.tokens = 1.0;
            state.last_refill = Instant::now();
        }

        state.tokens -= 1.0;
    }
}

/// Delivers rendered cards to Teams incoming webhooks
pub struct WebhookSender {
    client: Client,
    limiter: RateLimiter,
    signing_key: Option<String>,
    max_retries: u32,
    backoff_factor: f64,
}

impl WebhookSender {
    pub fn new(config: &NotificationsConfig, signing_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build webhook client: {}", e)))?;

        Ok(WebhookSender {
            client,
            limiter: RateLimiter::new(config.max_requests_per_minute, config.max_burst),
            signing_key,
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
        })
    }

    /// HMAC-SHA256 over the serialized payload, hex encoded
    fn sign(&self, body: &str) -> Option<String> {
        let key = self.signing_key.as_ref()?;
        let key = hmac::Key::new(hmac::HMAC_SHA256, key.as_bytes());
        let tag = hmac::sign(&key, body.as_bytes());
        Some(tag.as_ref().iter().map(|b| format!("{:02x}", b)).collect())
    }

    fn backoff_delay(&self, backoff_attempt: u32) -> Duration {
        let secs = self
            .backoff_factor
            .powi(backoff_attempt as i32)
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs_f64(secs)
    }

    fn retry_after_seconds(response: &reqwest::Response) -> u64 {
        response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(60)
    }

    /// Deliver one card to one webhook URL.
    ///
    /// 200 returns success; 429 honors Retry-After without escalating the
    /// backoff exponent; 5xx and timeouts retry with exponential backoff
    /// up to `max_retries`; other 4xx return immediately with the error.
    pub async fn send(
        &self,
        webhook_url: &str,
        payload: &Value,
        correlation_id: &str,
        priority: NotificationPriority,
    ) -> DeliveryReceipt {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                return DeliveryReceipt {
                    status_code: None,
                    retry_count: 0,
                    sent_at: Utc::now(),
                    error: Some(format!("payload serialization failed: {}", e)),
                }
            }
        };
        let signature = self.sign(&body);

        let mut retry_count = 0u32;
        let mut backoff_attempts = 0u32;
        let mut attempts = 0u32;
        let mut last_error = None;
        let mut last_status = None;

        while attempts <= self.max_retries {
            self.limiter.acquire().await;
            let sent_at = Utc::now();

            let mut request = self
                .client
                .post(webhook_url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header("X-Correlation-ID", correlation_id)
                .header("X-Priority", priority.as_str())
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header("X-HMAC-Signature", signature.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);

                    if status == 200 {
                        info!(
                            "Delivered notification {} (retries: {})",
                            correlation_id, retry_count
                        );
                        return DeliveryReceipt {
                            status_code: Some(status),
                            retry_count,
                            sent_at,
                            error: None,
                        };
                    }

                    if status == 429 {
                        let wait = Self::retry_after_seconds(&response);
                        warn!(
                            "Webhook rate limited for {}, honoring Retry-After {}s",
                            correlation_id, wait
                        );
                        sleep(Duration::from_secs(wait)).await;
                        retry_count += 1;
                        attempts += 1;
                        continue;
                    }

                    let error_body = response.text().await.unwrap_or_default();
                    if status >= 500 {
                        last_error = Some(format!("server error {}: {}", status, error_body));
                        warn!("Webhook server error for {}: {}", correlation_id, status);
                        retry_count += 1;
                        backoff_attempts += 1;
                        attempts += 1;
                        if attempts <= self.max_retries {
                            sleep(self.backoff_delay(backoff_attempts)).await;
                        }
                        continue;
                    }

                    // Non-429 client errors are final
                    let message = format!("client error {}: {}", status, error_body);
                    error!("Webhook client error for {}: {}", correlation_id, message);
                    return DeliveryReceipt {
                        status_code: Some(status),
                        retry_count,
                        sent_at,
                        error: Some(message),
                    };
                }
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        format!("request timeout: {}", e)
                    } else {
                        format!("request failed: {}", e)
                    });
                    warn!("Webhook send failed for {}: {}", correlation_id, e);
                    retry_count += 1;
                    backoff_attempts += 1;
                    attempts += 1;
                    if attempts <= self.max_retries {
                        sleep(self.backoff_delay(backoff_attempts)).await;
                    }
                }
            }
        }

        error!(
            "Failed to deliver notification {} after {} retries",
            correlation_id, retry_count
        );
        DeliveryReceipt {
            status_code: last_status,
            retry_count,
            sent_at: Utc::now(),
            error: last_error.or_else(|| Some("delivery failed".to_string())),
        }
    }

    /// Deliver a batch concurrently across (notification, url) pairs.
    /// Failures never propagate; each pair yields its own receipt.
    pub async fn send_batch(&self, notifications: &[TeamsNotification]) -> Vec<DeliveryReceipt> {
        let sends = notifications.iter().flat_map(|notification| {
            notification.webhook_urls.iter().map(move |url| {
                self.send(
                    url,
                    &notification.card_payload,
                    &notification.event.correlation_id,
                    notification.event.priority,
                )
            })
        });

        join_all(sends).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, StakeholderGroup, TeamsEvent};
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(max_retries: u32) -> NotificationsConfig {
        NotificationsConfig {
            max_requests_per_minute: 6000,
            max_burst: 100,
            max_retries,
            backoff_factor: 0.01,
            request_timeout_secs: 2,
            ..NotificationsConfig::default()
        }
    }

    #[tokio::test]
    async fn successful_send_carries_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Correlation-ID", "corr-1"))
            .and(header("X-Priority", "critical"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&config(3), None).unwrap();
        let receipt = sender
            .send(
                &format!("{}/hook", server.uri()),
                &json!({"type": "message"}),
                "corr-1",
                NotificationPriority::Critical,
            )
            .await;

        assert!(receipt.is_ok());
        assert_eq!(receipt.retry_count, 0);
    }

    #[tokio::test]
    async fn signed_payloads_carry_hmac_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-HMAC-Signature"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&config(0), Some("shared-secret".to_string())).unwrap();
        let receipt = sender
            .send(&server.uri(), &json!({"a": 1}), "corr-2", NotificationPriority::Info)
            .await;

        assert!(receipt.is_ok());

        // Signature is deterministic for a given key and body
        let first = sender.sign("{\"a\":1}").unwrap();
        let second = sender.sign("{\"a\":1}").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn server_errors_retry_until_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&config(2), None).unwrap();
        let receipt = sender
            .send(&server.uri(), &json!({}), "corr-3", NotificationPriority::High)
            .await;

        assert_eq!(receipt.status_code, Some(503));
        assert_eq!(receipt.retry_count, 3);
        assert!(receipt.error.unwrap().contains("server error 503"));
    }

    #[tokio::test]
    async fn client_errors_return_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad card"))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&config(3), None).unwrap();
        let receipt = sender
            .send(&server.uri(), &json!({}), "corr-4", NotificationPriority::Low)
            .await;

        assert_eq!(receipt.status_code, Some(400));
        assert_eq!(receipt.retry_count, 0);
        assert!(receipt.error.unwrap().contains("bad card"));
    }

    #[tokio::test]
    async fn rate_limited_send_honors_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&config(3), None).unwrap();
        let started = std::time::Instant::now();
        let receipt = sender
            .send(&server.uri(), &json!({}), "corr-5", NotificationPriority::Medium)
            .await;

        assert!(receipt.is_ok());
        assert_eq!(receipt.retry_count, 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn empty_bucket_blocks_for_at_least_a_second() {
        // One-token bucket refilling at one token per second
        let limiter = RateLimiter::new(60, 1);
        limiter.acquire().await;

        let started = std::time::Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(950));
    }

    #[tokio::test]
    async fn bucket_never_exceeds_burst() {
        let limiter = RateLimiter::new(6000, 3);
        // Let refill run far past the burst cap
        sleep(Duration::from_millis(100)).await;
        for _ in 0..3 {
            limiter.acquire().await;
        }
        let state = limiter.state.lock().await;
        assert!(state.tokens <= 3.0);
    }

    #[tokio::test]
    async fn batch_fans_out_per_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let event = TeamsEvent::new(
            EventType::ApiError,
            "corr-6",
            Default::default(),
            vec![StakeholderGroup::Sre],
            NotificationPriority::High,
        )
        .unwrap();
        let notification = TeamsNotification::new(
            event,
            json!({"type": "message"}),
            vec![format!("{}/a", server.uri()), format!("{}/b", server.uri())],
        );

        let sender = WebhookSender::new(&config(0), None).unwrap();
        let receipts = sender.send_batch(&[notification]).await;

        assert_eq!(receipts.len(), 2);
        assert!(receipts.iter().all(|r| r.is_ok()));
    }
}
