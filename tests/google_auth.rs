use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use httpmock::prelude::*;
use reqwest::Url;
use serde_json::json;

use reviewer_invoices::{
    error::GoogleError,
    helpers::{google::GoogleLoginer, sheets::SpreadsheetBackend},
    models::google::AuthorizedUser,
};

fn write_credentials(path: &Path, token_uri: &str) {
    std::fs::write(
        path,
        json!({
            "installed": {
                "client_id": "client",
                "client_secret": "secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": token_uri,
                "redirect_uris": ["http://localhost"],
            }
        })
        .to_string(),
    )
    .unwrap();
}

/// Plays the browser: reads the consent URL and calls the loopback redirect
/// with the query built from the request's `state`.
fn browser(
    seen: Arc<Mutex<Option<HashMap<String, String>>>>,
    redirect_query: impl Fn(&str) -> String + Send + Sync + 'static,
) -> impl Fn(&Url) + Send + Sync + 'static {
    move |consent_url: &Url| {
        let params: HashMap<String, String> = consent_url.query_pairs().into_owned().collect();
        let port = Url::parse(&params["redirect_uri"]).unwrap().port().unwrap();
        let redirect = format!("http://127.0.0.1:{port}/?{}", redirect_query(&params["state"]));
        *seen.lock().unwrap() = Some(params);

        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            client.get(redirect).send().await
        });
    }
}

#[tokio::test]
async fn stored_authorization_is_refreshed_and_saved() {
    let server = MockServer::start_async().await;
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .x_www_form_urlencoded_tuple("grant_type", "refresh_token")
                .x_www_form_urlencoded_tuple("refresh_token", "refresh-1")
                .x_www_form_urlencoded_tuple("client_id", "client");
            then.status(200).json_body(json!({
                "access_token": "access-2",
                "expires_in": 3599,
                "scope": "https://www.googleapis.com/auth/spreadsheets",
                "token_type": "Bearer",
            }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let authorized_user_path = dir.path().join("authorized_user.json");
    std::fs::write(
        &authorized_user_path,
        json!({
            "type": "authorized_user",
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh-1",
            "token_uri": server.url("/token"),
        })
        .to_string(),
    )
    .unwrap();

    let mut loginer = GoogleLoginer::new(&dir.path().join("credentials.json"), &authorized_user_path);
    loginer.get_google_client().await.unwrap();
    // the second call reuses the client without another token request
    loginer.get_google_client().await.unwrap();

    token_mock.assert_hits_async(1).await;
    let saved: AuthorizedUser =
        serde_json::from_str(&std::fs::read_to_string(&authorized_user_path).unwrap()).unwrap();
    assert_eq!(saved.token.as_deref(), Some("access-2"));
    assert_eq!(saved.refresh_token, "refresh-1");
    assert!(saved.expiry.is_some());
}

#[tokio::test]
async fn rejected_refresh_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body(json!({"error": "invalid_grant"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let authorized_user_path = dir.path().join("authorized_user.json");
    std::fs::write(
        &authorized_user_path,
        json!({
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "revoked",
            "token_uri": server.url("/token"),
        })
        .to_string(),
    )
    .unwrap();

    let mut loginer = GoogleLoginer::new(&dir.path().join("credentials.json"), &authorized_user_path);
    let err = loginer.get_google_client().await.unwrap_err();

    assert!(matches!(err, GoogleError::Status { status: 400, .. }));
}

#[tokio::test]
async fn missing_credentials_file_fails_login() {
    let dir = tempfile::tempdir().unwrap();
    let mut loginer = GoogleLoginer::new(
        &dir.path().join("credentials.json"),
        &dir.path().join("authorized_user.json"),
    );

    let err = loginer.get_google_client().await.unwrap_err();

    assert!(matches!(err, GoogleError::File { .. }));
}

#[tokio::test]
async fn consent_flow_saves_authorized_user() {
    let server = MockServer::start_async().await;
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .x_www_form_urlencoded_tuple("grant_type", "authorization_code")
                .x_www_form_urlencoded_tuple("code", "code-1")
                .x_www_form_urlencoded_tuple("client_secret", "secret");
            then.status(200).json_body(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-new",
                "expires_in": 3599,
                "token_type": "Bearer",
            }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");
    let authorized_user_path = dir.path().join("authorized_user.json");
    write_credentials(&credentials_path, &server.url("/token"));

    let seen = Arc::new(Mutex::new(None));
    let mut loginer = GoogleLoginer::new(&credentials_path, &authorized_user_path)
        .with_consent_handler(browser(seen.clone(), |state| {
            format!("code=code-1&state={state}")
        }));
    loginer.get_google_client().await.unwrap();

    token_mock.assert_hits_async(1).await;
    let params = seen.lock().unwrap().clone().unwrap();
    assert_eq!(params["client_id"], "client");
    assert_eq!(params["access_type"], "offline");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["state"].len(), 32);

    let saved: AuthorizedUser =
        serde_json::from_str(&std::fs::read_to_string(&authorized_user_path).unwrap()).unwrap();
    assert_eq!(saved.kind, "authorized_user");
    assert_eq!(saved.refresh_token, "refresh-new");
    assert_eq!(saved.token.as_deref(), Some("access-1"));
    assert_eq!(saved.token_uri, server.url("/token"));
    assert_eq!(saved.scopes.len(), 2);
}

#[tokio::test]
async fn redirect_with_foreign_state_is_rejected() {
    let server = MockServer::start_async().await;
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(json!({"access_token": "a", "refresh_token": "r"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");
    let authorized_user_path = dir.path().join("authorized_user.json");
    write_credentials(&credentials_path, &server.url("/token"));

    let mut loginer = GoogleLoginer::new(&credentials_path, &authorized_user_path)
        .with_consent_handler(browser(Arc::default(), |_| {
            "code=code-1&state=forged".to_string()
        }));
    let err = loginer.get_google_client().await.unwrap_err();

    assert!(matches!(err, GoogleError::Authorization(_)));
    token_mock.assert_hits_async(0).await;
    assert!(!authorized_user_path.exists());
}

#[tokio::test]
async fn denied_consent_is_an_error() {
    let server = MockServer::start_async().await;
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(json!({"access_token": "a", "refresh_token": "r"}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");
    let authorized_user_path = dir.path().join("authorized_user.json");
    write_credentials(&credentials_path, &server.url("/token"));

    let mut loginer = GoogleLoginer::new(&credentials_path, &authorized_user_path)
        .with_consent_handler(browser(Arc::default(), |state| {
            format!("error=access_denied&state={state}")
        }));
    let err = loginer.get_google_client().await.unwrap_err();

    match err {
        GoogleError::Authorization(reason) => assert_eq!(reason, "access_denied"),
        other => panic!("unexpected error: {other}"),
    }
    token_mock.assert_hits_async(0).await;
    assert!(!authorized_user_path.exists());
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_sheets_call() {
    let server = MockServer::start_async().await;
    // tokens this short-lived are inside the refresh margin on every use
    let token_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .x_www_form_urlencoded_tuple("grant_type", "refresh_token");
            then.status(200).json_body(json!({
                "access_token": "access-short",
                "expires_in": 30,
                "token_type": "Bearer",
            }));
        })
        .await;
    let create_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v4/spreadsheets")
                .header("Authorization", "Bearer access-short");
            then.status(200).json_body(json!({
                "spreadsheetId": "sheet-1",
                "spreadsheetUrl": "https://docs.google.com/spreadsheets/d/sheet-1",
            }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let authorized_user_path = dir.path().join("authorized_user.json");
    std::fs::write(
        &authorized_user_path,
        json!({
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh-1",
            "token_uri": server.url("/token"),
        })
        .to_string(),
    )
    .unwrap();

    let mut loginer = GoogleLoginer::new(&dir.path().join("credentials.json"), &authorized_user_path);
    let client = loginer
        .get_google_client()
        .await
        .unwrap()
        .with_base_urls(&server.url("/v4"), &server.url("/drive/v3"));
    client.create("Invoice 2024_03 alice").await.unwrap();

    token_mock.assert_hits_async(2).await;
    create_mock.assert_async().await;
    let saved: AuthorizedUser =
        serde_json::from_str(&std::fs::read_to_string(&authorized_user_path).unwrap()).unwrap();
    assert_eq!(saved.refresh_token, "refresh-1");
}
