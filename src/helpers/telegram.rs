use anyhow::{anyhow, bail, Context};
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_session::{PackedChat, Session};
use tracing::{error, info};

use crate::{
    config::TelegramConfig,
    helpers::prompt::{Prompt, StdinPrompt},
};

/// Delivers a single text message to a contact handle.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send_message(&self, handle: &str, message: &str) -> anyhow::Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    async fn send_message(&self, handle: &str, message: &str) -> anyhow::Result<()> {
        (**self).send_message(handle, message).await
    }
}

/// Sends direct messages from a Telegram user account.
///
/// Every call opens its own session from the local session file and drops it
/// once the message is out. Sign-in details are asked through `P`.
pub struct TelegramNotifier<P = StdinPrompt> {
    config: TelegramConfig,
    prompt: P,
}

impl<P: Prompt> TelegramNotifier<P> {
    pub fn new(config: TelegramConfig, prompt: P) -> Self {
        Self { config, prompt }
    }

    fn phone(&self) -> std::io::Result<String> {
        match &self.config.phone {
            Some(phone) => Ok(phone.clone()),
            None => self.prompt.ask("Please enter your phone: "),
        }
    }

    fn session_path(&self) -> String {
        format!("{}.session", self.config.session_name)
    }

    async fn connect(&self) -> anyhow::Result<Client> {
        let session_path = self.session_path();
        let session = Session::load_file_or_create(&session_path)
            .with_context(|| format!("failed to open Telegram session {session_path}"))?;

        info!("Connecting to Telegram with session {}", session_path);
        let client = Client::connect(Config {
            session,
            api_id: self.config.api_id,
            api_hash: self.config.api_hash.clone(),
            params: InitParams {
                system_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
                ..Default::default()
            },
        })
        .await
        .map_err(|e| anyhow!("failed to connect to Telegram: {e}"))?;

        let authorized = client
            .is_authorized()
            .await
            .map_err(|e| anyhow!("failed to check Telegram authorization: {e}"))?;
        if !authorized {
            self.sign_in(&client).await?;
            client
                .session()
                .save_to_file(&session_path)
                .with_context(|| format!("failed to save Telegram session {session_path}"))?;
        }

        Ok(client)
    }

    async fn sign_in(&self, client: &Client) -> anyhow::Result<()> {
        info!("Telegram session is not authorized, signing in");
        let phone = self.phone()?;

        let token = client
            .request_login_code(phone.trim())
            .await
            .map_err(|e| anyhow!("failed to request Telegram login code: {e}"))?;
        let code = self.prompt.ask("Please enter the code you received: ")?;

        match client.sign_in(&token, code.trim()).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = self.prompt.ask("Please enter your password: ")?;
                client
                    .check_password(password_token, password.trim())
                    .await
                    .map_err(|e| anyhow!("Telegram password check failed: {e}"))?;
            }
            Err(e) => bail!("Telegram sign in failed: {e}"),
        }

        info!("Signed in to Telegram");
        Ok(())
    }

    /// Accepts `@username`, `username` or a numeric user id. Numeric ids are
    /// looked up among the account's dialogs.
    async fn resolve(&self, client: &Client, handle: &str) -> anyhow::Result<PackedChat> {
        let handle = handle.trim();

        if let Ok(id) = handle.parse::<i64>() {
            let mut dialogs = client.iter_dialogs();
            while let Some(dialog) = dialogs
                .next()
                .await
                .map_err(|e| anyhow!("failed to list Telegram dialogs: {e}"))?
            {
                let chat = dialog.chat();
                if chat.id() == id {
                    return Ok(chat.pack());
                }
            }
            bail!("no Telegram dialog with id {id}");
        }

        let username = handle.trim_start_matches('@');
        client
            .resolve_username(username)
            .await
            .map_err(|e| anyhow!("failed to resolve Telegram user {handle}: {e}"))?
            .map(|chat| chat.pack())
            .ok_or_else(|| anyhow!("Telegram user {handle} not found"))
    }
}

impl<P: Prompt> Notifier for TelegramNotifier<P> {
    async fn send_message(&self, handle: &str, message: &str) -> anyhow::Result<()> {
        let client = self.connect().await?;

        let result = async {
            let chat = self.resolve(&client, handle).await?;
            client
                .send_message(chat, message)
                .await
                .map_err(|e| anyhow!("failed to send Telegram message to {handle}: {e}"))?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = client.session().save_to_file(self.session_path()) {
            error!("Failed to save Telegram session: {}", e);
        }
        drop(client);

        match &result {
            Ok(()) => info!("Message sent to {}", handle),
            Err(e) => error!("Failed to send message to {}: {}", handle, e),
        }
        result
    }
}
