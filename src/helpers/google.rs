use std::path::{Path, PathBuf};

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::GoogleError,
    helpers::sheets::SheetsClient,
    models::google::{AuthorizedUser, ClientSecrets, ClientSecretsFile, TokenResponse},
};

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

/// How long before expiry an access token gets renewed.
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Shows the consent URL to whoever has to open it in a browser.
pub type ConsentHandler = Box<dyn Fn(&Url) + Send + Sync>;

/// Lazily authorizes against Google and hands out a Sheets client.
///
/// A saved `authorized_user` file is refreshed when present; otherwise the
/// installed-app consent flow runs once and its result is saved for the next
/// run.
pub struct GoogleLoginer {
    credentials_file_path: PathBuf,
    authorized_user_file_path: PathBuf,
    http: Client,
    google_client: Option<SheetsClient>,
    consent_handler: ConsentHandler,
}

impl GoogleLoginer {
    pub fn new(credentials_file_path: &Path, authorized_user_file_path: &Path) -> Self {
        Self {
            credentials_file_path: credentials_file_path.to_path_buf(),
            authorized_user_file_path: authorized_user_file_path.to_path_buf(),
            http: Client::new(),
            google_client: None,
            consent_handler: Box::new(|url| {
                println!("Please visit this URL to authorize this application: {url}");
            }),
        }
    }

    /// Replace the default stdout message that carries the consent URL.
    pub fn with_consent_handler(
        mut self,
        handler: impl Fn(&Url) + Send + Sync + 'static,
    ) -> Self {
        self.consent_handler = Box::new(handler);
        self
    }

    pub async fn get_google_client(&mut self) -> Result<SheetsClient, GoogleError> {
        if let Some(client) = &self.google_client {
            return Ok(client.clone());
        }
        let client = self.login().await?;
        self.google_client = Some(client.clone());
        Ok(client)
    }

    async fn login(&self) -> Result<SheetsClient, GoogleError> {
        let (authorized_user, tokens) = if self.authorized_user_file_path.exists() {
            info!(
                "Reusing stored Google authorization from {}",
                self.authorized_user_file_path.display()
            );
            let stored: AuthorizedUser = read_json(&self.authorized_user_file_path)?;
            refresh_authorized_user(&self.http, stored).await?
        } else {
            info!(
                "No stored Google authorization, starting consent flow with {}",
                self.credentials_file_path.display()
            );
            let secrets = read_json::<ClientSecretsFile>(&self.credentials_file_path)?
                .into_secrets()
                .ok_or_else(|| {
                    GoogleError::Credentials(
                        "expected an \"installed\" or \"web\" client section".into(),
                    )
                })?;
            self.authorize(secrets).await?
        };

        save_authorized_user(&self.authorized_user_file_path, &authorized_user)?;
        info!("Google authorization complete");
        SheetsClient::with_token(GoogleToken::renewable(
            authorized_user,
            tokens.access_token,
            tokens.expires_in,
            &self.authorized_user_file_path,
        ))
    }

    async fn authorize(
        &self,
        secrets: ClientSecrets,
    ) -> Result<(AuthorizedUser, TokenResponse), GoogleError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| GoogleError::Authorization(format!("cannot open loopback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| GoogleError::Authorization(e.to_string()))?
            .port();
        let redirect_uri = format!("http://localhost:{port}/");
        let state = new_oauth_state();

        let scope = SCOPES.join(" ");
        let consent_url = Url::parse_with_params(
            &secrets.auth_uri,
            &[
                ("client_id", secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| GoogleError::InvalidUrl(format!("{}: {e}", secrets.auth_uri)))?;

        (self.consent_handler)(&consent_url);
        let callback = wait_for_callback(listener).await?;

        if let Some(reason) = callback.error {
            return Err(GoogleError::Authorization(reason));
        }
        if callback.state.as_deref() != Some(state.as_str()) {
            return Err(GoogleError::Authorization(
                "state mismatch in OAuth redirect".into(),
            ));
        }
        let code = callback
            .code
            .ok_or_else(|| GoogleError::Authorization("redirect carried no code".into()))?;

        let tokens = request_token(
            &self.http,
            &secrets.token_uri,
            &[
                ("code", code.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ],
        )
        .await?;

        let refresh_token = tokens.refresh_token.clone().ok_or_else(|| {
            GoogleError::Authorization("token response carried no refresh token".into())
        })?;

        let user = AuthorizedUser {
            kind: "authorized_user".into(),
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            refresh_token,
            token_uri: secrets.token_uri,
            token: Some(tokens.access_token.clone()),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            expiry: tokens.expires_in.map(expiry_after),
        };
        Ok((user, tokens))
    }
}

/// A Google access token. Tokens obtained through [`GoogleLoginer`] renew
/// themselves from the stored refresh token shortly before they expire and
/// save the renewed authorization.
#[derive(Debug)]
pub struct GoogleToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
    renewal: Option<TokenRenewal>,
}

#[derive(Debug)]
struct TokenRenewal {
    http: Client,
    user: AuthorizedUser,
    save_to: PathBuf,
}

impl GoogleToken {
    /// A token used as is for as long as the client lives.
    pub fn fixed(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            expires_at: None,
            renewal: None,
        }
    }

    pub fn renewable(
        user: AuthorizedUser,
        access_token: String,
        expires_in: Option<i64>,
        save_to: &Path,
    ) -> Self {
        Self {
            access_token,
            expires_at: expires_in.map(|seconds| Utc::now() + Duration::seconds(seconds)),
            renewal: Some(TokenRenewal {
                http: Client::new(),
                user,
                save_to: save_to.to_path_buf(),
            }),
        }
    }

    /// The current access token, refreshed first when it is about to expire.
    pub async fn bearer(&mut self) -> Result<String, GoogleError> {
        let expiring = self
            .expires_at
            .is_some_and(|at| Utc::now() + Duration::seconds(REFRESH_MARGIN_SECONDS) >= at);

        if let (true, Some(renewal)) = (expiring, self.renewal.as_mut()) {
            info!("Google access token is about to expire, refreshing");
            let (user, tokens) = refresh_authorized_user(&renewal.http, renewal.user.clone()).await?;
            save_authorized_user(&renewal.save_to, &user)?;
            renewal.user = user;
            self.expires_at = tokens
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds));
            self.access_token = tokens.access_token;
        }
        Ok(self.access_token.clone())
    }
}

async fn refresh_authorized_user(
    http: &Client,
    mut user: AuthorizedUser,
) -> Result<(AuthorizedUser, TokenResponse), GoogleError> {
    let tokens = request_token(
        http,
        &user.token_uri,
        &[
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("refresh_token", user.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ],
    )
    .await?;

    if let Some(refresh_token) = &tokens.refresh_token {
        user.refresh_token = refresh_token.clone();
    }
    user.token = Some(tokens.access_token.clone());
    user.expiry = tokens.expires_in.map(expiry_after);
    Ok((user, tokens))
}

async fn request_token(
    http: &Client,
    token_uri: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, GoogleError> {
    info!("Requesting Google access token from {}", token_uri);
    let response = http.post(token_uri).form(form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!("Google token endpoint returned {}: {}", status, body);
        return Err(GoogleError::Status {
            what: "token request".into(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response.json::<TokenResponse>().await?)
}

#[derive(Deserialize, Debug)]
struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Serve the loopback redirect until the browser delivers the first callback.
async fn wait_for_callback(listener: TcpListener) -> Result<OAuthCallback, GoogleError> {
    let (callback_tx, mut callback_rx) = mpsc::channel::<OAuthCallback>(1);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = Router::new()
        .route("/", get(oauth_callback))
        .with_state(callback_tx);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let callback = callback_rx.recv().await;
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Err(e)) => warn!("OAuth callback server stopped with error: {}", e),
        Err(e) => warn!("OAuth callback server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    callback.ok_or_else(|| GoogleError::Authorization("no OAuth redirect received".into()))
}

async fn oauth_callback(
    State(callback_tx): State<mpsc::Sender<OAuthCallback>>,
    Query(callback): Query<OAuthCallback>,
) -> &'static str {
    info!("Received OAuth redirect");
    let _ = callback_tx.send(callback).await;
    "Authorization finished, you may close this window."
}

/// Unguessable value tying the OAuth redirect to this consent request.
fn new_oauth_state() -> String {
    Uuid::new_v4().simple().to_string()
}

fn expiry_after(seconds: i64) -> String {
    (Utc::now() + Duration::seconds(seconds))
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, GoogleError> {
    let text = std::fs::read_to_string(path).map_err(|source| GoogleError::File {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text)
        .map_err(|e| GoogleError::Credentials(format!("{}: {e}", path.display())))
}

fn save_authorized_user(path: &Path, user: &AuthorizedUser) -> Result<(), GoogleError> {
    let text = serde_json::to_string_pretty(user)
        .map_err(|e| GoogleError::Credentials(e.to_string()))?;
    std::fs::write(path, text).map_err(|source| GoogleError::File {
        path: path.display().to_string(),
        source,
    })?;
    info!("Saved Google authorization to {}", path.display());
    Ok(())
}
