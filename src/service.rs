use anyhow::Context;
use tracing::{info, warn};

use crate::{
    config::Config,
    helpers::{
        dvmn::{DvmnClient, InvoiceSource},
        google::GoogleLoginer,
        prompt::{Prompt, StdinPrompt},
        sheets::{write_table_to_worksheet, SpreadsheetBackend},
        telegram::{Notifier, TelegramNotifier},
        template::{MessageTemplate, TableNameTemplate},
    },
    models::invoice::Invoice,
};

pub const REVIEWS_WORKSHEET: &str = "Reviews";
pub const SUMMARY_WORKSHEET: &str = "Summary";

/// The part of the configuration the per-reviewer loop depends on.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub month: u32,
    pub year: i32,
    pub google_table_name: TableNameTemplate,
    pub confirm_every_reviewer: bool,
    pub reviewer_column: String,
}

impl From<&Config> for ReportSettings {
    fn from(config: &Config) -> Self {
        Self {
            month: config.month,
            year: config.year,
            google_table_name: config.google_table_name.clone(),
            confirm_every_reviewer: config.confirm_every_reviewer,
            reviewer_column: config.reviewer_column.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No summary rows for the period.
    NoWork,
    /// The operator answered the confirmation with an empty line.
    Declined,
    /// No Telegram handle in the invoice and none entered.
    NoTelegram,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewerOutcome {
    Processed {
        spreadsheet_url: String,
        telegram: String,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerReport {
    pub username: String,
    pub outcome: ReviewerOutcome,
}

/// Splits an invoice per reviewer, writes each reviewer's spreadsheet and
/// tells them where to find it.
///
/// Reviewers are handled one at a time; the first error stops the run.
pub struct ReportService<I, S, N, P> {
    invoices: I,
    sheets: S,
    notifier: N,
    prompt: P,
    settings: ReportSettings,
    message_template: MessageTemplate,
}

impl<I, S, N, P> ReportService<I, S, N, P>
where
    I: InvoiceSource,
    S: SpreadsheetBackend,
    N: Notifier,
    P: Prompt,
{
    pub fn new(
        invoices: I,
        sheets: S,
        notifier: N,
        prompt: P,
        settings: ReportSettings,
        message_template: MessageTemplate,
    ) -> Self {
        info!(
            "Creating report service for {:02}.{}",
            settings.month, settings.year
        );
        Self {
            invoices,
            sheets,
            notifier,
            prompt,
            settings,
            message_template,
        }
    }

    /// Fetch the invoice for the configured period and process it.
    pub async fn run(&self) -> anyhow::Result<Vec<ReviewerReport>> {
        let invoice = self
            .invoices
            .fetch_invoice(self.settings.month, self.settings.year)
            .await
            .context("failed to fetch invoice")?;
        self.process_invoice(&invoice).await
    }

    pub async fn process_invoice(&self, invoice: &Invoice) -> anyhow::Result<Vec<ReviewerReport>> {
        let mut reports = Vec::with_capacity(invoice.dvmn_reviewers.len());

        for (username, telegram) in invoice.reviewers() {
            let outcome = self
                .process_reviewer(invoice, username, telegram)
                .await
                .with_context(|| format!("failed to process reviewer {username}"))?;
            reports.push(ReviewerReport {
                username: username.to_string(),
                outcome,
            });
        }

        let processed = reports
            .iter()
            .filter(|report| matches!(report.outcome, ReviewerOutcome::Processed { .. }))
            .count();
        info!(
            "Run finished: {} reviewers processed, {} skipped",
            processed,
            reports.len() - processed
        );
        Ok(reports)
    }

    async fn process_reviewer(
        &self,
        invoice: &Invoice,
        username: &str,
        telegram: Option<&str>,
    ) -> anyhow::Result<ReviewerOutcome> {
        let column = &self.settings.reviewer_column;

        let summary = invoice.summary_for(username, column);
        if summary.is_empty() {
            info!("Reviewer {} had no reviews this month", username);
            return Ok(ReviewerOutcome::Skipped(SkipReason::NoWork));
        }

        if self.settings.confirm_every_reviewer {
            let answer = self.prompt.ask(&format!(
                "Process reviewer {username}? Type anything for yes, or just press Enter to skip: "
            ))?;
            if answer.is_empty() {
                info!("Skipping reviewer {}", username);
                return Ok(ReviewerOutcome::Skipped(SkipReason::Declined));
            }
        }

        let telegram = match telegram {
            Some(handle) => handle.to_string(),
            None => {
                let entered = self.prompt.ask(&format!(
                    "No Telegram is set for reviewer {username} in Devman, enter it manually: "
                ))?;
                let entered = entered.trim();
                if entered.is_empty() {
                    warn!("No Telegram given for reviewer {}, skipping", username);
                    return Ok(ReviewerOutcome::Skipped(SkipReason::NoTelegram));
                }
                entered.to_string()
            }
        };

        let reviews = invoice.reviews_for(username, column);
        info!(
            "Reviewer {}: {} reviews, {} summary rows",
            username,
            reviews.len(),
            summary.len()
        );

        let table_name =
            self.settings
                .google_table_name
                .render(self.settings.year, self.settings.month, username);
        let spreadsheet = self.sheets.create(&table_name).await?;
        self.sheets.share_with_link(&spreadsheet).await?;

        write_table_to_worksheet(&self.sheets, &spreadsheet, &reviews, 0, REVIEWS_WORKSHEET)
            .await?;
        write_table_to_worksheet(&self.sheets, &spreadsheet, &summary, 1, SUMMARY_WORKSHEET)
            .await?;

        let message =
            self.message_template
                .render(self.settings.year, self.settings.month, &spreadsheet.url);
        self.notifier.send_message(&telegram, &message).await?;

        info!("Reviewer {} notified at {}", username, telegram);
        Ok(ReviewerOutcome::Processed {
            spreadsheet_url: spreadsheet.url,
            telegram,
        })
    }
}

/// Full run against the real Devman, Google and Telegram services.
pub async fn run(config: Config) -> anyhow::Result<Vec<ReviewerReport>> {
    let message_template = MessageTemplate::load(&config.message_template_filename)?;

    let dvmn_client = DvmnClient::new(&config.devman_token, config.devman_invoice_url.as_str())
        .context("failed to set up Devman client")?;

    let mut google_loginer = GoogleLoginer::new(
        &config.google_credentials_file_path,
        &config.google_authorized_user_file_path,
    );
    let google_client = google_loginer
        .get_google_client()
        .await
        .context("Google authorization failed")?;

    let notifier = TelegramNotifier::new(config.telegram.clone(), StdinPrompt);

    let service = ReportService::new(
        dvmn_client,
        google_client,
        notifier,
        StdinPrompt,
        ReportSettings::from(&config),
        message_template,
    );
    service.run().await
}
