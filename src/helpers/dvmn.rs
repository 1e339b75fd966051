use reqwest::{header, Client};
use tracing::{error, info};

use crate::{error::InvoiceError, models::invoice::Invoice};

/// Anything that can produce the invoice for a reporting period.
#[allow(async_fn_in_trait)]
pub trait InvoiceSource {
    async fn fetch_invoice(&self, month: u32, year: i32) -> Result<Invoice, InvoiceError>;
}

pub fn dvmn_client_init(token: &str) -> Result<Client, InvoiceError> {
    info!("Initializing Devman client");

    let mut auth = header::HeaderValue::from_str(&format!("Token {token}")).map_err(|e| {
        error!("Failed to create Authorization header value: {}", e);
        e
    })?;
    auth.set_sensitive(true);

    let mut headers = header::HeaderMap::new();
    headers.insert(header::AUTHORIZATION, auth);
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    let client = Client::builder().default_headers(headers).build()?;
    info!("Devman client initialized successfully");
    Ok(client)
}

/// Client for the Devman reviewer invoice endpoint.
#[derive(Clone)]
pub struct DvmnClient {
    client: Client,
    invoice_url: String,
}

impl DvmnClient {
    pub fn new(token: &str, invoice_url: impl Into<String>) -> Result<Self, InvoiceError> {
        Ok(Self {
            client: dvmn_client_init(token)?,
            invoice_url: invoice_url.into(),
        })
    }
}

impl InvoiceSource for DvmnClient {
    async fn fetch_invoice(&self, month: u32, year: i32) -> Result<Invoice, InvoiceError> {
        info!("Fetching invoice for {:02}.{} from {}", month, year, self.invoice_url);

        let response = self
            .client
            .get(&self.invoice_url)
            .query(&[("month", month.to_string()), ("year", year.to_string())])
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to Devman API: {}", e);
                e
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!("Devman API returned error status {}: {}", status, text);
            return Err(InvoiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        match serde_json::from_str::<Invoice>(&text) {
            Ok(invoice) => {
                info!(
                    "Invoice received: {} reviews, {} summary rows, {} reviewers",
                    invoice.month_reviews.len(),
                    invoice.summary.len(),
                    invoice.dvmn_reviewers.len()
                );
                Ok(invoice)
            }
            Err(e) => {
                error!("Failed to parse invoice response: {}", e);
                Err(InvoiceError::Shape(e.to_string()))
            }
        }
    }
}
