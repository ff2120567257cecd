//! HTTP delivery of validated action payloads to the commerce backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use merchat_core::config::WebhookConfig;
use merchat_core::WebhookPayload;

use crate::collaborators::{UpstreamError, WebhookSink};

const WEBHOOK_SECRET_HEADER: &str = "x-merchat-webhook-secret";

/// One POST per dispatch; no retry here. Callers decide whether a failed
/// dispatch is fatal or becomes a failed background job.
pub struct HttpWebhookSink {
    client: Client,
    endpoint: String,
    secret: Option<SecretString>,
}

impl HttpWebhookSink {
    pub fn new(config: &WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            secret: config.secret.clone(),
        })
    }

    /// Order updates address an existing resource, so the echoed order code
    /// routes in the URL path rather than in the body.
    fn url_for(&self, payload: &WebhookPayload) -> String {
        match &payload.order_code {
            Some(order_code) => format!("{}/{}", self.endpoint, order_code),
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn dispatch(&self, payload: &WebhookPayload) -> Result<(), UpstreamError> {
        let url = self.url_for(payload);
        let mut request = self.client.post(&url).json(payload);
        if let Some(secret) = &self.secret {
            request = request.header(WEBHOOK_SECRET_HEADER, secret.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                UpstreamError::Timeout { source_name: "webhook" }
            } else {
                UpstreamError::Unavailable { source_name: "webhook", detail: error.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                event_name = "webhook.rejected",
                event = payload.event,
                status = status.as_u16(),
                "backend rejected webhook dispatch"
            );
            return Err(UpstreamError::Unavailable {
                source_name: "webhook",
                detail: format!("backend answered {status}"),
            });
        }

        info!(
            event_name = "webhook.dispatched",
            event = payload.event,
            conversation_id = %payload.conversation_id,
            "webhook delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use merchat_core::config::WebhookConfig;
    use merchat_core::{ConversationMeta, Customer, WebhookMapper};
    use merchat_core::intent::{ActionData, UpdateOrderAction, OrderChanges};
    use secrecy::{ExposeSecret, SecretString};

    use super::HttpWebhookSink;

    fn sink(endpoint: &str) -> HttpWebhookSink {
        HttpWebhookSink::new(&WebhookConfig {
            endpoint: endpoint.to_string(),
            secret: None,
            channel: "whatsapp".to_string(),
            timeout_secs: 10,
        })
        .expect("client")
    }

    fn update_payload() -> merchat_core::WebhookPayload {
        let action = ActionData::UpdateOrder(UpdateOrderAction {
            order_code: Some("ORD-7781".to_string()),
            changes: Some(OrderChanges {
                delivery_address: Some("Rua Nova, 12".to_string()),
                ..OrderChanges::default()
            }),
            customer: Some(Customer {
                name: "Ana Lima".to_string(),
                phone: "+5511999990000".to_string(),
                email: None,
            }),
            complete: None,
        });
        let meta = ConversationMeta {
            conversation_id: "sess-1".to_string(),
            company_id: "acme".to_string(),
            channel: "whatsapp".to_string(),
        };
        WebhookMapper::new().map(&action, &meta).expect("payload")
    }

    #[test]
    fn order_code_routes_in_the_url_path() {
        let sink = sink("https://backend.example/hooks/orders/");
        let payload = update_payload();
        assert_eq!(sink.url_for(&payload), "https://backend.example/hooks/orders/ORD-7781");
    }

    #[test]
    fn plain_payloads_hit_the_bare_endpoint() {
        let sink = sink("https://backend.example/hooks/orders");
        let mut payload = update_payload();
        payload.order_code = None;
        assert_eq!(sink.url_for(&payload), "https://backend.example/hooks/orders");
    }

    #[test]
    fn webhook_secret_stays_redacted_until_dispatch() {
        let sink = HttpWebhookSink::new(&WebhookConfig {
            endpoint: "https://backend.example/hooks/orders".to_string(),
            secret: Some(SecretString::from("hook-secret-1")),
            channel: "whatsapp".to_string(),
            timeout_secs: 10,
        })
        .expect("client");

        let secret = sink.secret.as_ref().expect("secret kept");
        assert!(format!("{secret:?}").contains("REDACTED"));
        assert_eq!(secret.expose_secret(), "hook-secret-1");
    }
}
