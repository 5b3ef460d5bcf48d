//! HTTP POST alert delivery: a JSON body with `tunnel_name`, `message`,
//! and `tunnel_manager_id`, POSTed with optional basic auth. Any non-2xx
//! status is treated as a delivery failure. Rate-limited the same way as
//! the SMTP sender, independently, since each sender owns its own table.

use tokio::sync::Mutex;

use serde::Serialize;

use crate::alerts::AlertSender;
use crate::alerts::ratelimit::{self, RateLimiter};
use crate::config::HttpAlertConfig;
use crate::error::{StunError, StunResult};

pub struct HttpAlertSender {
    config: HttpAlertConfig,
    tunnel_manager_id: String,
    client: reqwest::Client,
    rate_limiter: Mutex<RateLimiter>,
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    tunnel_name: &'a str,
    message: &'a str,
    tunnel_manager_id: &'a str,
}

impl HttpAlertSender {
    pub fn new(config: HttpAlertConfig, tunnel_manager_id: String) -> Self {
        Self {
            config,
            tunnel_manager_id,
            client: reqwest::Client::new(),
            rate_limiter: Mutex::new(RateLimiter::default()),
        }
    }
}

#[async_trait::async_trait]
impl AlertSender for HttpAlertSender {
    async fn send(&self, tunnel_name: &str, message: Option<&str>, fail_loudly: bool) -> StunResult<()> {
        let fingerprint = ratelimit::fingerprint(tunnel_name, message, fail_loudly);
        {
            let limiter = self.rate_limiter.lock().await;
            if !limiter.allow(&fingerprint) {
                return Err(StunError::RateLimited(format!(
                    "http alert for {tunnel_name} suppressed by rate limit"
                )));
            }
        }

        let body = message.map(str::to_string).unwrap_or_else(|| {
            format!(
                "This is to let you know that {tunnel_name} is down! Manager id: {}",
                self.tunnel_manager_id
            )
        });

        let mut request = self.client.post(&self.config.url).json(&AlertPayload {
            tunnel_name,
            message: &body,
            tunnel_manager_id: &self.tunnel_manager_id,
        });

        if !self.config.user.is_empty() {
            request = request.basic_auth(&self.config.user, Some(&self.config.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StunError::Alert(format!("http alert request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(StunError::Alert(format!(
                "http alert endpoint returned {}",
                response.status()
            )));
        }

        self.rate_limiter.lock().await.record(&fingerprint);
        Ok(())
    }
}
