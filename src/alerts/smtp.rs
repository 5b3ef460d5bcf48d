//! SMTP alert delivery: one connection per alert, plain/TLS/SSL security
//! selected from config, subject and body built from the template
//! `Connector <name> notification` / `This email is to let you know that
//! <name> is down! Manager id: <id>`, rate-limited per-fingerprint inside
//! the sender so the Fanout itself stays stateless.

use tokio::sync::Mutex;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::alerts::AlertSender;
use crate::alerts::ratelimit::{self, RateLimiter};
use crate::config::{SmtpAlertConfig, SmtpSecurity};
use crate::error::{StunError, StunResult};

pub struct SmtpAlertSender {
    config: SmtpAlertConfig,
    tunnel_manager_id: String,
    rate_limiter: Mutex<RateLimiter>,
}

impl SmtpAlertSender {
    pub fn new(config: SmtpAlertConfig, tunnel_manager_id: String) -> Self {
        Self {
            config,
            tunnel_manager_id,
            rate_limiter: Mutex::new(RateLimiter::default()),
        }
    }

    fn build_transport(&self) -> StunResult<AsyncSmtpTransport<Tokio1Executor>> {
        let creds = Credentials::new(self.config.login.clone(), self.config.password.clone());

        let builder = match self.config.security.unwrap_or(SmtpSecurity::Tls) {
            SmtpSecurity::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
                .map_err(|e| StunError::Alert(format!("smtp relay setup failed: {e}")))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
                .map_err(|e| StunError::Alert(format!("smtp relay setup failed: {e}")))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host),
        };

        Ok(builder.port(self.config.port).credentials(creds).build())
    }
}

#[async_trait::async_trait]
impl AlertSender for SmtpAlertSender {
    async fn send(&self, tunnel_name: &str, message: Option<&str>, fail_loudly: bool) -> StunResult<()> {
        let fingerprint = ratelimit::fingerprint(tunnel_name, message, fail_loudly);
        {
            let limiter = self.rate_limiter.lock().await;
            if !limiter.allow(&fingerprint) {
                return Err(StunError::RateLimited(format!(
                    "smtp alert for {tunnel_name} suppressed by rate limit"
                )));
            }
        }

        let body = message.map(str::to_string).unwrap_or_else(|| {
            format!(
                "This email is to let you know that {tunnel_name} is down! Manager id: {}",
                self.tunnel_manager_id
            )
        });

        let from = self
            .config
            .from
            .clone()
            .unwrap_or_else(|| self.config.login.clone());

        let email = Message::builder()
            .from(
                from.parse()
                    .map_err(|e| StunError::Alert(format!("invalid from address: {e}")))?,
            )
            .to(self
                .config
                .to
                .parse()
                .map_err(|e| StunError::Alert(format!("invalid to address: {e}")))?)
            .subject(format!("Connector {tunnel_name} notification"))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| StunError::Alert(format!("failed to build alert email: {e}")))?;

        let transport = self.build_transport()?;
        transport
            .send(email)
            .await
            .map_err(|e| StunError::Alert(format!("smtp send failed: {e}")))?;

        self.rate_limiter.lock().await.record(&fingerprint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_security_is_rejected_before_any_network_io() {
        let err = "starttls".parse::<SmtpSecurity>().unwrap_err();
        assert!(matches!(err, StunError::Config(_)));
    }
}
