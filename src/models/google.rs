use serde::{Deserialize, Serialize};

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

fn authorized_user_type() -> String {
    "authorized_user".to_string()
}

// OAuth client secrets file as downloaded from the Google Cloud console
#[derive(Deserialize, Debug)]
pub struct ClientSecretsFile {
    pub installed: Option<ClientSecrets>,
    pub web: Option<ClientSecrets>,
}

impl ClientSecretsFile {
    pub fn into_secrets(self) -> Option<ClientSecrets> {
        self.installed.or(self.web)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Stored authorization, compatible with the `authorized_user` files written
/// by Google's own client libraries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthorizedUser {
    #[serde(rename = "type", default = "authorized_user_type")]
    pub kind: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

// Sheets v4 resources, trimmed to the fields we read
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetResource {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub spreadsheet_url: Option<String>,
    #[serde(default)]
    pub properties: Option<SpreadsheetProperties>,
    #[serde(default)]
    pub sheets: Vec<SheetResource>,
}

#[derive(Deserialize, Debug)]
pub struct SpreadsheetProperties {
    pub title: String,
}

#[derive(Deserialize, Debug)]
pub struct SheetResource {
    pub properties: SheetProperties,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: usize,
}

#[derive(Deserialize, Debug)]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub replies: Vec<BatchUpdateReply>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateReply {
    pub add_sheet: Option<SheetResource>,
}
