//! Delivery engine: template rendering, recipient simulation and SMTP
//! transmission with linear backoff.
//!
//! Send flow:
//! 1. Render the template for the request's target (admin or submitter).
//! 2. Simulate (log and succeed) for recipients the environment says not
//!    to mail: outside the allow-list in development mode, obvious test
//!    domains otherwise.
//! 3. Transmit from the sender account, retrying up to `max_attempts`
//!    with `(attempt + 1) * step` waits capped at `max_backoff`.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use dkl_core::config::{AccountConfig, EmailConfig};
use dkl_core::types::{ContactForm, EmailTarget, OutboundEmail, RegistrationForm};

use crate::base::{MailTransport, OutgoingMessage};
use crate::error::{FailureKind, MailError, Result, TransportError};
use crate::templates::{
    TemplateRenderer, CONTACT_ADMIN_TEMPLATE, CONTACT_TEMPLATE, REGISTRATION_ADMIN_TEMPLATE,
    REGISTRATION_TEMPLATE,
};

// ─────────────────────────────────────────────
// Form kinds
// ─────────────────────────────────────────────

/// Template, subject and recipient choices for one kind of form.
pub trait FormNotification: Serialize + Send + Sync {
    /// Key under which the form appears in template data.
    const DATA_KEY: &'static str;
    const ADMIN_TEMPLATE: &'static str;
    const ADMIN_SUBJECT: &'static str;
    const SUBMITTER_TEMPLATE: &'static str;
    const SUBMITTER_SUBJECT: &'static str;

    /// Address of the person who filled in the form.
    fn submitter_email(&self) -> &str;
}

impl FormNotification for ContactForm {
    const DATA_KEY: &'static str = "contact";
    const ADMIN_TEMPLATE: &'static str = CONTACT_ADMIN_TEMPLATE;
    const ADMIN_SUBJECT: &'static str = "Nieuw contactformulier ontvangen";
    const SUBMITTER_TEMPLATE: &'static str = CONTACT_TEMPLATE;
    const SUBMITTER_SUBJECT: &'static str = "Bedankt voor je bericht";

    fn submitter_email(&self) -> &str {
        &self.email
    }
}

impl FormNotification for RegistrationForm {
    const DATA_KEY: &'static str = "aanmelding";
    const ADMIN_TEMPLATE: &'static str = REGISTRATION_ADMIN_TEMPLATE;
    const ADMIN_SUBJECT: &'static str = "Nieuwe aanmelding ontvangen";
    const SUBMITTER_TEMPLATE: &'static str = REGISTRATION_TEMPLATE;
    const SUBMITTER_SUBJECT: &'static str = "Bedankt voor je aanmelding";

    fn submitter_email(&self) -> &str {
        &self.email
    }
}

// ─────────────────────────────────────────────
// DeliveryEngine
// ─────────────────────────────────────────────

pub struct DeliveryEngine {
    config: EmailConfig,
    transport: Arc<dyn MailTransport>,
    templates: Arc<dyn TemplateRenderer>,
}

impl DeliveryEngine {
    pub fn new(
        config: EmailConfig,
        transport: Arc<dyn MailTransport>,
        templates: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            config,
            transport,
            templates,
        }
    }

    /// Send the notification for a form submission.
    pub async fn send_form<T: FormNotification>(&self, request: &OutboundEmail<T>) -> Result<()> {
        let (template, subject, recipient) = match &request.target {
            EmailTarget::Admin { address } => (T::ADMIN_TEMPLATE, T::ADMIN_SUBJECT, address.as_str()),
            EmailTarget::Submitter => (
                T::SUBMITTER_TEMPLATE,
                T::SUBMITTER_SUBJECT,
                request.payload.submitter_email(),
            ),
        };
        info!(to = %recipient, template, "preparing email");

        let payload = serde_json::to_value(&request.payload).map_err(|e| MailError::TemplateRender {
            name: template.to_string(),
            reason: e.to_string(),
        })?;
        let mut data = json!({
            "to_admin": request.is_admin(),
            "admin_email": self.config.admin_email,
        });
        data[T::DATA_KEY] = payload;
        self.send(template, subject, recipient, &data).await
    }

    /// Render `template` with `data` and deliver it to `to`.
    pub async fn send(
        &self,
        template: &str,
        subject: &str,
        to: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let body = self.templates.render(template, data)?;
        debug!(template, bytes = body.len(), "rendered email body");

        if self.should_simulate(to) {
            info!(to = %to, subject, bytes = body.len(), dev_mode = self.config.dev_mode, "simulating email delivery");
            return Ok(());
        }

        let from = self.sender_account()?.address.clone();
        validate_address(&from)?;
        validate_address(to)?;

        let message = OutgoingMessage {
            from,
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: body,
        };
        self.deliver(&message).await
    }

    /// Whether delivery to `to` should be logged instead of performed.
    pub fn should_simulate(&self, to: &str) -> bool {
        if self.config.dev_mode {
            !self
                .config
                .dev_allowed_domains
                .iter()
                .any(|domain| to.ends_with(&format!("@{domain}")))
        } else {
            self.config
                .test_domains
                .iter()
                .any(|suffix| to.ends_with(suffix.as_str()))
        }
    }

    fn sender_account(&self) -> Result<&AccountConfig> {
        let name = &self.config.sender_account;
        self.config
            .account(name)
            .filter(|account| !account.address.is_empty())
            .ok_or_else(|| MailError::MissingSenderAccount(name.clone()))
    }

    /// Transmit with retries. Every failure is retried regardless of kind.
    async fn deliver(&self, message: &OutgoingMessage) -> Result<()> {
        let policy = &self.config.delivery;
        let attempts = policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            debug!(attempt = attempt + 1, max = attempts, to = %message.to, "sending email");
            match self.transport.send(message).await {
                Ok(()) => {
                    info!(to = %message.to, subject = %message.subject, attempt = attempt + 1, "email sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max = attempts,
                        kind = %e.kind,
                        error = %e.message,
                        "email delivery attempt failed"
                    );
                    if e.kind == FailureKind::Authentication {
                        warn!("authentication error, please verify SMTP credentials");
                    }
                    last_error = Some(e);
                }
            }

            if attempt + 1 < attempts {
                let wait = policy.backoff(attempt);
                debug!(wait_secs = wait.as_secs(), "waiting before next attempt");
                tokio::time::sleep(wait).await;
            }
        }

        Err(MailError::DeliveryFailed {
            attempts,
            last: last_error
                .unwrap_or_else(|| TransportError::new(FailureKind::Protocol, "no attempt made")),
        })
    }
}

fn validate_address(address: &str) -> Result<()> {
    address
        .parse::<Address>()
        .map(|_| ())
        .map_err(|e| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

// ─────────────────────────────────────────────
// SMTP transport (lettre)
// ─────────────────────────────────────────────

/// SMTP delivery through the sender account. Port 465 uses implicit TLS,
/// every other port STARTTLS.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(account: &AccountConfig, accept_invalid_certs: bool) -> Result<Self> {
        let tls_params = TlsParameters::builder(account.smtp_host.clone())
            .dangerous_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| MailError::Config(format!("SMTP TLS parameters: {e}")))?;

        let (tls, mode) = if account.smtp_implicit_tls() {
            (Tls::Wrapper(tls_params), "SSL")
        } else {
            (Tls::Required(tls_params), "STARTTLS")
        };
        info!(
            host = %account.smtp_host,
            port = account.smtp_port,
            mode,
            user = %account.address,
            password_len = account.password.len(),
            "configured SMTP transport"
        );
        if accept_invalid_certs {
            warn!("SMTP certificate validation is disabled");
        }

        let inner = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&account.smtp_host)
            .port(account.smtp_port)
            .tls(tls)
            .credentials(Credentials::new(
                account.address.clone(),
                account.password.clone(),
            ))
            .build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> std::result::Result<(), TransportError> {
        let parse = |address: &str| {
            address.parse::<Mailbox>().map_err(|e| {
                TransportError::new(FailureKind::Protocol, format!("invalid address {address}: {e}"))
            })
        };
        let email = Message::builder()
            .from(parse(&message.from)?)
            .to(parse(&message.to)?)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| TransportError::new(FailureKind::Protocol, format!("failed to build email: {e}")))?;

        self.inner
            .send(email)
            .await
            .map(|_| ())
            .map_err(|e| classify_smtp_error(&e))
    }
}

fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> TransportError {
    let message = err.to_string();
    if err.is_timeout() {
        return TransportError::new(FailureKind::Network, message);
    }
    if err.is_tls() {
        return TransportError::new(FailureKind::Tls, message);
    }
    // 530/534/535: authentication required or rejected
    if err.status().is_some_and(|code| code.to_string().starts_with("53")) {
        return TransportError::new(FailureKind::Authentication, message);
    }
    TransportError::classify(message)
}


