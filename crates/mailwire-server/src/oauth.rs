use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Outcome of a completed login at the identity provider.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error("network error: {0}")]
    Network(String),

    #[error("exchange rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("invalid oauth configuration: {0}")]
    InvalidConfig(String),
}

/// Narrow interface to the OAuth identity provider. Exchange mechanics stay
/// behind this trait; the rest of the server only sees the outcome.
#[async_trait]
pub trait OauthExchange: Send + Sync {
    /// URL to send the browser to for consent.
    fn authorize_url(&self, email_hint: Option<&str>) -> Result<String, OauthError>;

    /// Trade an authorization code for the authenticated user.
    async fn exchange_code(&self, code: &str) -> Result<AuthenticatedUser, OauthError>;
}

#[derive(Clone, Debug)]
pub struct OauthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// Shape of the provider's token-endpoint reply. Only the fields the server
/// uses; extra fields (tokens etc.) are ignored.
#[derive(Debug, Deserialize)]
struct ExchangeReply {
    email: Option<String>,
    name: Option<String>,
}

pub struct HttpOauthExchange {
    client: reqwest::Client,
    config: OauthConfig,
}

impl HttpOauthExchange {
    pub fn new(config: OauthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl OauthExchange for HttpOauthExchange {
    fn authorize_url(&self, email_hint: Option<&str>) -> Result<String, OauthError> {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", "email profile"),
            ("access_type", "offline"),
        ];
        if let Some(hint) = email_hint {
            params.push(("login_hint", hint));
        }

        let url = reqwest::Url::parse_with_params(&self.config.auth_url, &params)
            .map_err(|e| OauthError::InvalidConfig(e.to_string()))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthenticatedUser, OauthError> {
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| OauthError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| OauthError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(OauthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ExchangeReply = serde_json::from_str(&body)
            .map_err(|e| OauthError::InvalidResponse(e.to_string()))?;

        let Some(email) = reply.email else {
            return Err(OauthError::InvalidResponse("no email in reply".into()));
        };

        Ok(AuthenticatedUser {
            email,
            display_name: reply.name,
        })
    }
}
