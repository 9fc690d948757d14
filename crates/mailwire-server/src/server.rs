use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use tower_http::cors::CorsLayer;

use mailwire_backend::{HttpMailBackend, MailBackend};
use mailwire_store::{Database, SessionRepo, UserRepo};

use crate::auth::SessionAuthenticator;
use crate::cookie::CredentialCodec;
use crate::oauth::OauthExchange;
use crate::registry::ConnectionRegistry;
use crate::{routes, wire};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Outbound frame queue capacity per connection.
    pub max_send_queue: usize,
    /// Upper bound on one backend relay call.
    pub relay_timeout_secs: u64,
    /// Lifetime of a newly issued login session.
    pub session_ttl_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            max_send_queue: 256,
            relay_timeout_secs: 30,
            session_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Builds a fresh backend client for each new connection.
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn MailBackend> + Send + Sync>;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub authenticator: Arc<SessionAuthenticator>,
    pub codec: Arc<CredentialCodec>,
    pub sessions: Arc<SessionRepo>,
    pub users: Arc<UserRepo>,
    pub oauth: Arc<dyn OauthExchange>,
    pub backend_factory: BackendFactory,
}

/// Wire up production state: stores over the given database and an HTTP
/// backend client bound per connection.
pub fn app_state(
    config: ServerConfig,
    db: Database,
    cookie_secret: &SecretString,
    backend_endpoint: String,
    oauth: Arc<dyn OauthExchange>,
) -> AppState {
    let codec = Arc::new(CredentialCodec::new(cookie_secret));
    let sessions = Arc::new(SessionRepo::new(db.clone()));
    let users = Arc::new(UserRepo::new(db));
    let authenticator = Arc::new(SessionAuthenticator::new(
        Arc::clone(&codec),
        Arc::clone(&sessions),
        Arc::clone(&users),
    ));
    let backend_factory: BackendFactory =
        Arc::new(move || Arc::new(HttpMailBackend::new(backend_endpoint.clone())) as Arc<dyn MailBackend>);

    AppState {
        config: Arc::new(config),
        registry: Arc::new(ConnectionRegistry::new()),
        authenticator,
        codec,
        sessions,
        users,
        oauth,
        backend_factory,
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/wire", get(wire::wire_handler))
        .route("/wire/{*path}", get(wire::wire_handler))
        .route("/auth/validate", get(routes::validate))
        .route("/auth/login", get(routes::login))
        .route("/auth/callback", get(routes::callback))
        .route("/auth/logout", get(routes::logout))
        .route("/auth/whoami", get(routes::whoami))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start serving. Returns a handle that keeps the background tasks alive.
pub async fn serve(state: AppState) -> Result<ServerHandle, std::io::Error> {
    let sessions = Arc::clone(&state.sessions);
    let purge = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        ticker.tick().await; // consume the immediate first tick
        loop {
            ticker.tick().await;
            if let Err(err) = sessions.purge_expired() {
                tracing::error!(error = %err, "session purge failed");
            }
        }
    });

    let addr = format!("0.0.0.0:{}", state.config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "mailwire server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _purge: purge,
    })
}

/// Handle returned by [`serve`] — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _purge: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message as TgMessage;

    use mailwire_backend::{BackendError, MockMailBackend, MockReply};

    use crate::cookie::SESSION_COOKIE;
    use crate::oauth::{AuthenticatedUser, OauthError};

    /// Test OAuth collaborator: any code `alice` logs in `alice@x.com`.
    struct StaticOauth;

    #[async_trait]
    impl OauthExchange for StaticOauth {
        fn authorize_url(&self, _email_hint: Option<&str>) -> Result<String, OauthError> {
            Ok("https://provider.test/auth".into())
        }

        async fn exchange_code(&self, code: &str) -> Result<AuthenticatedUser, OauthError> {
            Ok(AuthenticatedUser {
                email: format!("{code}@x.com"),
                display_name: None,
            })
        }
    }

    struct TestServer {
        handle: ServerHandle,
        codec: Arc<CredentialCodec>,
        sessions: Arc<SessionRepo>,
        users: Arc<UserRepo>,
        backend: Arc<MockMailBackend>,
    }

    async fn spawn_server(relay_timeout_secs: u64) -> TestServer {
        let db = Database::in_memory().unwrap();
        let codec = Arc::new(CredentialCodec::new(&SecretString::from("test-secret")));
        let sessions = Arc::new(SessionRepo::new(db.clone()));
        let users = Arc::new(UserRepo::new(db));
        let authenticator = Arc::new(SessionAuthenticator::new(
            Arc::clone(&codec),
            Arc::clone(&sessions),
            Arc::clone(&users),
        ));
        let backend = Arc::new(MockMailBackend::new(vec![]));
        let factory_backend = Arc::clone(&backend);
        let backend_factory: BackendFactory =
            Arc::new(move || Arc::clone(&factory_backend) as Arc<dyn MailBackend>);

        let state = AppState {
            config: Arc::new(ServerConfig {
                port: 0,
                relay_timeout_secs,
                ..Default::default()
            }),
            registry: Arc::new(ConnectionRegistry::new()),
            authenticator,
            codec: Arc::clone(&codec),
            sessions: Arc::clone(&sessions),
            users: Arc::clone(&users),
            oauth: Arc::new(StaticOauth),
            backend_factory,
        };

        let handle = serve(state).await.unwrap();
        TestServer {
            handle,
            codec,
            sessions,
            users,
            backend,
        }
    }

    /// Log a user in out-of-band and return their Cookie header value.
    fn cookie_for(server: &TestServer, email: &str) -> String {
        server.users.upsert(email, None).unwrap();
        let session = server.sessions.create(email, None).unwrap();
        let sealed = server.codec.seal(SESSION_COOKIE, &session.token).unwrap();
        format!("{SESSION_COOKIE}={sealed}")
    }

    async fn connect_wire(
        port: u16,
        cookie: &str,
    ) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        let mut request = format!("ws://127.0.0.1:{port}/wire/app")
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        ws
    }

    async fn next_text<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<TgMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        while let Some(msg) = ws.next().await {
            if let TgMessage::Text(text) = msg.unwrap() {
                return serde_json::from_str(&text).unwrap();
            }
        }
        panic!("socket closed before a text frame arrived");
    }

    async fn active_connections(port: u16) -> u64 {
        let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["active_connections"].as_u64().unwrap()
    }

    async fn wait_for_connections(port: u16, expected: u64) {
        for _ in 0..100 {
            if active_connections(port).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("registry never reached {expected} connections");
    }

    #[tokio::test]
    async fn health_reports_no_connections() {
        let server = spawn_server(30).await;
        assert_eq!(active_connections(server.handle.port).await, 0);
    }

    #[tokio::test]
    async fn unauthenticated_wire_is_rejected() {
        let server = spawn_server(30).await;

        let request = format!("ws://127.0.0.1:{}/wire/app", server.handle.port)
            .into_client_request()
            .unwrap();
        let result = tokio_tungstenite::connect_async(request).await;

        assert!(result.is_err(), "upgrade must be refused without a session");
        assert_eq!(active_connections(server.handle.port).await, 0);
    }

    #[tokio::test]
    async fn wire_relays_and_correlates() {
        let server = spawn_server(30).await;
        server
            .backend
            .push_reply(MockReply::Value(serde_json::json!({"threads": []})));
        let cookie = cookie_for(&server, "a@x.com");

        let mut ws = connect_wire(server.handle.port, &cookie).await;
        wait_for_connections(server.handle.port, 1).await;

        ws.send(TgMessage::text(
            r#"{"id":1,"method":"list_threads","params":{"folder":"inbox"}}"#,
        ))
        .await
        .unwrap();

        let response = next_text(&mut ws).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["success"], true);
        assert_eq!(response["result"], serde_json::json!({"threads": []}));

        let calls = server.backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].principal, "a@x.com");

        ws.close(None).await.unwrap();
        wait_for_connections(server.handle.port, 0).await;
    }

    #[tokio::test]
    async fn two_identities_connect_and_one_leaves() {
        let server = spawn_server(30).await;
        let cookie_a = cookie_for(&server, "a@x.com");
        let cookie_b = cookie_for(&server, "b@x.com");

        let mut ws_a = connect_wire(server.handle.port, &cookie_a).await;
        let _ws_b = connect_wire(server.handle.port, &cookie_b).await;
        wait_for_connections(server.handle.port, 2).await;

        ws_a.close(None).await.unwrap();
        wait_for_connections(server.handle.port, 1).await;
    }

    #[tokio::test]
    async fn responses_stay_in_receipt_order() {
        let server = spawn_server(30).await;
        // The first reply is slower than the second would be.
        server.backend.push_reply(MockReply::delayed(
            Duration::from_millis(100),
            MockReply::Value(serde_json::json!({"n": 1})),
        ));
        server
            .backend
            .push_reply(MockReply::Value(serde_json::json!({"n": 2})));
        let cookie = cookie_for(&server, "a@x.com");

        let mut ws = connect_wire(server.handle.port, &cookie).await;
        ws.send(TgMessage::text(r#"{"id":1,"method":"list_threads"}"#))
            .await
            .unwrap();
        ws.send(TgMessage::text(r#"{"id":2,"method":"list_threads"}"#))
            .await
            .unwrap();

        let first = next_text(&mut ws).await;
        let second = next_text(&mut ws).await;
        assert_eq!(first["id"], 1);
        assert_eq!(first["result"]["n"], 1);
        assert_eq!(second["id"], 2);
        assert_eq!(second["result"]["n"], 2);
    }

    #[tokio::test]
    async fn failed_call_leaves_connection_open() {
        let server = spawn_server(30).await;
        server.backend.push_reply(MockReply::Error(BackendError::Unreachable(
            "connection refused".into(),
        )));
        server
            .backend
            .push_reply(MockReply::Value(serde_json::json!({"ok": true})));
        let cookie = cookie_for(&server, "a@x.com");

        let mut ws = connect_wire(server.handle.port, &cookie).await;

        ws.send(TgMessage::text(r#"{"id":1,"method":"list_threads"}"#))
            .await
            .unwrap();
        let failed = next_text(&mut ws).await;
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"]["code"], "BACKEND_UNREACHABLE");

        // Same socket, next call succeeds.
        ws.send(TgMessage::text(r#"{"id":2,"method":"list_threads"}"#))
            .await
            .unwrap();
        let ok = next_text(&mut ws).await;
        assert_eq!(ok["success"], true);
        assert_eq!(ok["id"], 2);
    }

    #[tokio::test]
    async fn timeout_is_reported_and_connection_survives() {
        let server = spawn_server(1).await;
        server.backend.push_reply(MockReply::delayed(
            Duration::from_secs(5),
            MockReply::Value(serde_json::json!({"late": true})),
        ));
        server
            .backend
            .push_reply(MockReply::Value(serde_json::json!({"ok": true})));
        let cookie = cookie_for(&server, "a@x.com");

        let mut ws = connect_wire(server.handle.port, &cookie).await;

        ws.send(TgMessage::text(r#"{"id":1,"method":"get_thread","params":{"thread_id":"t1"}}"#))
            .await
            .unwrap();
        let timed_out = next_text(&mut ws).await;
        assert_eq!(timed_out["success"], false);
        assert_eq!(timed_out["error"]["code"], "RELAY_TIMEOUT");

        ws.send(TgMessage::text(r#"{"id":2,"method":"list_threads"}"#))
            .await
            .unwrap();
        let ok = next_text(&mut ws).await;
        assert_eq!(ok["success"], true);
    }

    #[tokio::test]
    async fn unknown_method_and_garbage_get_structured_errors() {
        let server = spawn_server(30).await;
        let cookie = cookie_for(&server, "a@x.com");

        let mut ws = connect_wire(server.handle.port, &cookie).await;

        ws.send(TgMessage::text(r#"{"id":1,"method":"drop_database"}"#))
            .await
            .unwrap();
        let rejected = next_text(&mut ws).await;
        assert_eq!(rejected["error"]["code"], "METHOD_NOT_FOUND");
        assert_eq!(rejected["id"], 1);

        ws.send(TgMessage::text("this is not json")).await.unwrap();
        let garbled = next_text(&mut ws).await;
        assert_eq!(garbled["error"]["code"], "PARSE_ERROR");

        assert_eq!(server.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn login_callback_sets_cookie_whoami_sees_it() {
        let server = spawn_server(30).await;
        let port = server.handle.port;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        let resp = client
            .get(format!("http://127.0.0.1:{port}/auth/callback?code=alice"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_redirection());

        let set_cookie = resp
            .headers()
            .get("set-cookie")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let cookie = set_cookie.split(';').next().unwrap().to_string();

        let whoami: serde_json::Value = client
            .get(format!("http://127.0.0.1:{port}/auth/whoami"))
            .header("Cookie", &cookie)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(whoami["logged_in"], true);
        assert_eq!(whoami["principal"], "alice@x.com");

        // Logout invalidates the session even if the cookie is replayed.
        client
            .get(format!("http://127.0.0.1:{port}/auth/logout"))
            .header("Cookie", &cookie)
            .send()
            .await
            .unwrap();

        let after: serde_json::Value = client
            .get(format!("http://127.0.0.1:{port}/auth/whoami"))
            .header("Cookie", &cookie)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(after["logged_in"], false);
    }

    #[tokio::test]
    async fn validate_endpoint_checks_syntax() {
        let server = spawn_server(30).await;
        let port = server.handle.port;

        let ok: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{port}/auth/validate?email_address=a@x.com"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(ok["valid"], true);

        let bad: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{port}/auth/validate?email_address=nope"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        assert_eq!(bad["valid"], false);
    }
}
