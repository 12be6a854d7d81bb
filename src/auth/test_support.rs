//! Fake identity provider and simulated browser for provider tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::interactive::BrowserLauncher;
use super::tokens::{AccessToken, Account};
use super::AuthConfig;
use crate::cache::{CacheState, MachineIdentity, TokenCache};

pub const CLIENT_ID: &str = "client-1";
pub const TENANT: &str = "tenant-1";
pub const CLIENT_SECRET: &str = "s3cret";
pub const ALICE_ID: &str = "oid-alice.tenant-1";

#[derive(Default)]
struct FakeState {
    requests: Vec<HashMap<String, String>>,
    expires_in: Option<u64>,
    issued: u32,
}

/// Token endpoint that answers the three grants the providers use.
///
/// - `client_credentials`: accepts only [`CLIENT_SECRET`]
/// - `authorization_code`: accepts only `abc123` with a PKCE verifier
/// - `refresh_token`: `rt-revoked` is `invalid_grant`, `rt-unauthorized-client`
///   is `unauthorized_client`, anything else succeeds
pub struct FakeIdentityProvider {
    authority: String,
    state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
}

impl FakeIdentityProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let authority = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let state = Arc::new(Mutex::new(FakeState::default()));

        let shared = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        Self {
            authority,
            state,
            task,
        }
    }

    pub fn service_config(&self) -> AuthConfig {
        let mut config = AuthConfig::for_tests(&self.authority);
        config.client_secret = Some(CLIENT_SECRET.to_string());
        config
    }

    pub fn interactive_config(&self) -> AuthConfig {
        AuthConfig::for_tests(&self.authority)
    }

    pub fn set_expires_in(&self, secs: u64) {
        self.state.lock().unwrap().expires_in = Some(secs);
    }

    /// Form bodies of every token request, oldest first.
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn grant_count(&self, grant_type: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.get("grant_type").map(String::as_str) == Some(grant_type))
            .count()
    }
}

impl Drop for FakeIdentityProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<FakeState>>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let form: HashMap<String, String> =
        url::form_urlencoded::parse(&buf[header_end..]).into_owned().collect();
    let (status, body) = respond(&form, &state);
    state.lock().unwrap().requests.push(form);

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn respond(form: &HashMap<String, String>, state: &Mutex<FakeState>) -> (&'static str, String) {
    let field = |key: &str| form.get(key).map(String::as_str);

    match field("grant_type") {
        Some("client_credentials") if field("client_secret") == Some(CLIENT_SECRET) => {
            ("200 OK", token_body(state, false))
        }
        Some("client_credentials") => error_body(
            "401 Unauthorized",
            "invalid_client",
            "AADSTS7000215: Invalid client secret provided.",
        ),
        Some("authorization_code")
            if field("code") == Some("abc123") && field("code_verifier").is_some() =>
        {
            ("200 OK", token_body(state, true))
        }
        Some("authorization_code") => error_body(
            "400 Bad Request",
            "invalid_grant",
            "AADSTS70008: The provided authorization code or refresh token has expired.",
        ),
        Some("refresh_token") => match field("refresh_token") {
            Some("rt-revoked") => error_body(
                "400 Bad Request",
                "invalid_grant",
                "AADSTS700082: The refresh token has expired due to inactivity.",
            ),
            Some("rt-unauthorized-client") => error_body(
                "400 Bad Request",
                "unauthorized_client",
                "AADSTS700016: Application not found in the directory.",
            ),
            _ => ("200 OK", token_body(state, true)),
        },
        _ => error_body("400 Bad Request", "unsupported_grant_type", "unknown grant"),
    }
}

fn token_body(state: &Mutex<FakeState>, user: bool) -> String {
    let mut state = state.lock().unwrap();
    state.issued += 1;
    let expires_in = state.expires_in.unwrap_or(3600);

    let mut body = serde_json::json!({
        "token_type": "Bearer",
        "access_token": format!("access-{}", state.issued),
        "expires_in": expires_in,
    });
    if user {
        body["refresh_token"] = format!("rt-{}", state.issued).into();
        body["id_token"] = alice_id_token().into();
    }
    body.to_string()
}

fn error_body(status: &'static str, code: &str, description: &str) -> (&'static str, String) {
    (
        status,
        serde_json::json!({ "error": code, "error_description": description }).to_string(),
    )
}

fn alice_id_token() -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let claims = serde_json::json!({
        "oid": "oid-alice",
        "tid": TENANT,
        "name": "Alice Example",
        "preferred_username": "alice@contoso.com",
    });
    format!(
        "{}.{}.sig",
        engine.encode(br#"{"alg":"none","typ":"JWT"}"#),
        engine.encode(claims.to_string())
    )
}

/// Cache bound to a fixed test identity.
pub fn test_cache(dir: &Path) -> TokenCache {
    TokenCache::with_identity(dir, CLIENT_ID, MachineIdentity::new("test-host", "test-user"))
}

/// Cache holding Alice with `refresh_token` and an access token for `resource`
/// living `lifetime` seconds (zero when `None`).
pub fn seeded_cache(
    dir: &Path,
    resource: &str,
    refresh_token: &str,
    lifetime: Option<u64>,
) -> TokenCache {
    let cache = test_cache(dir);
    let mut state = CacheState::default();
    state.upsert(
        Account {
            home_account_id: ALICE_ID.to_string(),
            username: "alice@contoso.com".to_string(),
            name: Some("Alice Example".to_string()),
            tenant_id: Some(TENANT.to_string()),
        },
        Some(refresh_token.to_string()),
        resource,
        AccessToken::new("seeded-access-token".to_string(), Some(lifetime.unwrap_or(0))),
    );
    cache.persist(&mut state).unwrap();
    cache
}

/// Browser launcher that hands each authorization URL to the test.
pub fn capture_browser() -> (BrowserLauncher, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let launcher: BrowserLauncher = Arc::new(move |url: &str| {
        let _ = tx.send(url.to_string());
        Ok(())
    });
    (launcher, rx)
}

/// `redirect_uri` query parameter of an authorization URL, without trailing slash.
pub fn redirect_uri_from(auth_url: &str) -> String {
    let url = url::Url::parse(auth_url).unwrap();
    let redirect = url
        .query_pairs()
        .find(|(k, _)| k == "redirect_uri")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    redirect.trim_end_matches('/').to_string()
}

/// Play the browser: GET `url` (localhost pinned to IPv4) and return the page.
pub async fn browse(url: &str) -> String {
    let url = url.replacen("localhost", "127.0.0.1", 1);
    let http = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    http.get(url).send().await.unwrap().text().await.unwrap()
}
