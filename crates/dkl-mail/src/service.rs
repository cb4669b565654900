//! `EmailService`: the surface the HTTP handlers call.
//!
//! Wires the IMAP source, the account caches, the template store and the
//! SMTP transport from one `EmailConfig`.

use std::sync::Arc;

use tracing::info;

use dkl_core::config::EmailConfig;
use dkl_core::types::{
    ContactForm, EmailMessage, FetchOptions, MailboxStats, OutboundEmail, RegistrationForm,
};
use dkl_core::utils::expand_home;

use crate::base::{MailTransport, MailboxSource};
use crate::cache::MailCache;
use crate::error::{MailError, Result};
use crate::fetcher::{FetchReport, Fetcher};
use crate::imap::ImapMailboxSource;
use crate::sender::{DeliveryEngine, FormNotification, SmtpTransport};
use crate::templates::{TemplateRenderer, TemplateStore};

pub struct EmailService {
    fetcher: Fetcher,
    delivery: DeliveryEngine,
    admin_email: String,
}

impl EmailService {
    /// Build the production service: IMAP over rustls, SMTP through the
    /// sender account, templates from `templates_dir`.
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let sender = config
            .account(&config.sender_account)
            .ok_or_else(|| MailError::MissingSenderAccount(config.sender_account.clone()))?;
        let transport = SmtpTransport::new(sender, config.accept_invalid_certs)?;
        let source = ImapMailboxSource::new(config.accept_invalid_certs);
        let templates = TemplateStore::load_dir(&expand_home(&config.templates_dir));

        info!(
            accounts = config.accounts.len(),
            cache = config.cache.enabled,
            dev_mode = config.dev_mode,
            "email service initialized"
        );
        Ok(Self::with_parts(
            config.clone(),
            Arc::new(source),
            Arc::new(transport),
            Arc::new(templates),
        ))
    }

    /// Build from explicit collaborators.
    pub fn with_parts(
        config: EmailConfig,
        source: Arc<dyn MailboxSource>,
        transport: Arc<dyn MailTransport>,
        templates: Arc<dyn TemplateRenderer>,
    ) -> Self {
        let cache = Arc::new(MailCache::new(config.account_names(), config.cache.clone()));
        let fetcher = Fetcher::new(
            config.accounts.clone(),
            source,
            cache,
            config.fetch_timeout(),
        );
        let admin_email = config.admin_email.clone();
        Self {
            fetcher,
            delivery: DeliveryEngine::new(config, transport, templates),
            admin_email,
        }
    }

    pub async fn fetch_all(&self, options: FetchOptions) -> Result<Vec<EmailMessage>> {
        self.fetcher.fetch_all(options).await
    }

    pub async fn fetch_all_detailed(&self, options: FetchOptions) -> Result<FetchReport> {
        self.fetcher.fetch_all_detailed(options).await
    }

    /// Totals over an unfiltered fetch of every account.
    pub async fn stats(&self) -> Result<MailboxStats> {
        let emails = self.fetcher.fetch_all(FetchOptions::default()).await?;
        Ok(MailboxStats {
            total: emails.len(),
            unread: emails.iter().filter(|e| !e.read).count(),
        })
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        self.fetcher.mark_as_read(id).await
    }

    /// Contact form notification, to the admin address or the submitter.
    pub async fn send_contact_email(&self, form: ContactForm, to_admin: bool) -> Result<()> {
        self.send_form(form, to_admin).await
    }

    /// Registration notification, to the admin address or the submitter.
    pub async fn send_registration_email(&self, form: RegistrationForm, to_admin: bool) -> Result<()> {
        self.send_form(form, to_admin).await
    }

    async fn send_form<T: FormNotification>(&self, form: T, to_admin: bool) -> Result<()> {
        let request = if to_admin {
            OutboundEmail::to_admin(self.admin_email.clone(), form)
        } else {
            OutboundEmail::to_submitter(form)
        };
        self.delivery.send_form(&request).await
    }
}


