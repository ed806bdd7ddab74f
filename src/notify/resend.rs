//! Email delivery through Resend's REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmailError, EmailMessage, EmailProvider};

pub const DEFAULT_API_URL: &str = "https://api.resend.com";

#[derive(Debug, Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    default_from: String,
    default_reply_to: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

impl ResendMailer {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, default_from: impl Into<String>, default_reply_to: Option<String>) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| EmailError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_from: default_from.into(),
            default_reply_to,
        })
    }
}

#[async_trait]
impl EmailProvider for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, EmailError> {
        let body = SendRequest {
            from: message.from.as_deref().unwrap_or(&self.default_from),
            to: [message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
            reply_to: message.reply_to.as_deref().or(self.default_reply_to.as_deref()),
        };
        let response = self.http.post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text).map(|e| e.message).unwrap_or(text);
            return Err(EmailError::Rejected { status: status.as_u16(), message });
        }
        let sent: SendResponse = response.json().await.map_err(|e| EmailError::Transport(e.to_string()))?;
        debug!(message_id = %sent.id, "email accepted by provider");
        Ok(sent.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage { to: "asha@example.com".into(), subject: "Hi".into(), html: "<p>Hi</p>".into(), from: None, reply_to: None }
    }

    #[tokio::test]
    async fn sends_with_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_partial_json(json!({"from": "Shop <orders@shop.test>", "to": ["asha@example.com"], "reply_to": "help@shop.test"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = ResendMailer::new(server.uri(), "re_test", "Shop <orders@shop.test>", Some("help@shop.test".into())).unwrap();
        assert_eq!(mailer.send(&message()).await.unwrap(), "msg_1");
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"statusCode": 422, "message": "Invalid `to` field."})))
            .mount(&server)
            .await;

        let mailer = ResendMailer::new(server.uri(), "re_test", "orders@shop.test", None).unwrap();
        let err = mailer.send(&message()).await.unwrap_err();
        assert_eq!(err, EmailError::Rejected { status: 422, message: "Invalid `to` field.".into() });
    }
}
