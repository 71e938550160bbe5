//! Reminder delivery.
//!
//! The engine only ever sees [`DispatchGateway`]; [`SmtpGateway`] delivers
//! through lettre and [`MockGateway`] records sends for tests and local runs.

use super::store::SmtpCredentials;
use crate::error::BillingError;
use crate::models::{Client, InvoiceEvaluation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// A fully rendered reminder, ready to hand to a transport.
#[derive(Debug, Clone)]
pub struct Notice {
    pub client_id: Uuid,
    pub to: String,
    pub cc: Option<String>,
    pub subject: String,
    pub body: String,
    pub sender_name: String,
    pub credentials: SmtpCredentials,
}

/// Normalise user-entered text: non-breaking spaces become spaces, ends trimmed.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ").trim().to_string()
}

impl Notice {
    pub fn for_invoice(
        client: &Client,
        invoice: &InvoiceEvaluation,
        credentials: SmtpCredentials,
        sender_name: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut body = format!("Hello {},\n\n", clean_text(&client.name));

        if let Some(message) = client.message.as_deref().map(clean_text) {
            if !message.is_empty() {
                body.push_str(&message);
                body.push_str("\n\n");
            }
        }

        body.push_str(&format!(
            "Total due: ${:.2}\n\
             Last day before Late fees: {}\n\
             Late Fee of ${:.2} will be applied every {} day(s) from that date.\n\
             {}\n\n\
             Thank you,\n\
             {}\n",
            invoice.amount_due,
            invoice.grace_deadline.format("%Y-%m-%d %H:%M:%S"),
            client.late_fee,
            client.fee_interval_days,
            clean_text(&invoice.late_fee_note),
            sender_name
        ));

        Self {
            client_id: client.client_id,
            to: clean_text(&client.email),
            cc: client
                .cc
                .as_deref()
                .map(clean_text)
                .filter(|cc| !cc.is_empty()),
            subject: format!("Monthly Invoice - {}", now.format("%B %Y")),
            body,
            sender_name: sender_name.to_string(),
            credentials,
        }
    }
}

#[async_trait]
pub trait DispatchGateway: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), BillingError>;
}

/// STARTTLS SMTP relay; logs in with the credentials carried by each notice.
pub struct SmtpGateway {
    host: String,
    port: u16,
    timeout: Duration,
}

impl SmtpGateway {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn build_message(notice: &Notice) -> Result<Message, BillingError> {
        let from: Mailbox = format!("{} <{}>", notice.sender_name, notice.credentials.username)
            .parse()
            .map_err(|e| BillingError::DispatchFailure(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = notice
            .to
            .parse()
            .map_err(|e| BillingError::DispatchFailure(format!("Invalid recipient: {}", e)))?;

        let mut builder = Message::builder().from(from).to(to).subject(&notice.subject);

        if let Some(cc) = &notice.cc {
            let cc: Mailbox = cc
                .parse()
                .map_err(|e| BillingError::DispatchFailure(format!("Invalid cc: {}", e)))?;
            builder = builder.cc(cc);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(notice.body.clone())
            .map_err(|e| BillingError::DispatchFailure(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl DispatchGateway for SmtpGateway {
    async fn send(&self, notice: &Notice) -> Result<(), BillingError> {
        let message = Self::build_message(notice)?;

        let creds = Credentials::new(
            notice.credentials.username.clone(),
            notice.credentials.password.expose_secret().clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| {
                BillingError::DispatchFailure(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(self.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build();

        transport.send(message).await.map_err(|e| {
            BillingError::DispatchFailure(format!("Failed to send email: {}", e))
        })?;

        tracing::info!(
            client_id = %notice.client_id,
            to = %notice.to,
            subject = %notice.subject,
            "Invoice reminder sent"
        );

        Ok(())
    }
}

/// In-process gateway that records what would have been sent.
#[derive(Default)]
pub struct MockGateway {
    send_count: AtomicU64,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<Notice>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Make subsequent sends fail, as an unreachable relay would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent sends take this long.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl DispatchGateway for MockGateway {
    async fn send(&self, notice: &Notice) -> Result<(), BillingError> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(BillingError::DispatchFailure(
                "Mock gateway is unavailable".to_string(),
            ));
        }

        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());

        tracing::info!(
            client_id = %notice.client_id,
            to = %notice.to,
            subject = %notice.subject,
            "[MOCK] Invoice reminder would be sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingState, ClientProfile};
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use secrecy::Secret;

    fn client() -> Client {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        Client::new(
            Uuid::new_v4(),
            ClientProfile {
                name: "\u{a0}Jane Doe ".to_string(),
                email: "jane@example.com".to_string(),
                cc: Some("  ".to_string()),
                message: Some("Rent for May".to_string()),
                cost: Decimal::new(120000, 2),
                late_fee: Decimal::new(5000, 2),
                grace_period_days: 3,
                fee_interval_days: 2,
                send_day: 1,
                send_hour: None,
            },
            9,
            now,
        )
        .unwrap()
    }

    fn evaluation(client: &Client) -> InvoiceEvaluation {
        InvoiceEvaluation {
            client_id: client.client_id,
            invoice_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            grace_deadline: Utc.with_ymd_and_hms(2025, 5, 4, 23, 59, 0).unwrap(),
            base_cost: client.cost,
            accrued_fees: Decimal::ZERO,
            amount_due: client.cost,
            periods_overdue: 0,
            late_fee_note: String::new(),
            is_overdue: false,
            resend: false,
            first_of_cycle: true,
            state: BillingState::Pending,
            evaluated_at: Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap(),
        }
    }

    fn credentials() -> SmtpCredentials {
        SmtpCredentials {
            username: "owner@example.com".to_string(),
            password: Secret::new("pw".to_string()),
        }
    }

    #[test]
    fn notice_renders_invoice_details() {
        let client = client();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let notice = Notice::for_invoice(&client, &evaluation(&client), credentials(), "Billing", now);

        assert_eq!(notice.subject, "Monthly Invoice - May 2025");
        assert!(notice.body.starts_with("Hello Jane Doe,\n\nRent for May\n\n"));
        assert!(notice.body.contains("Total due: $1200.00"));
        assert!(notice.body.contains("Last day before Late fees: 2025-05-04 23:59:00"));
        assert!(notice.body.contains("Late Fee of $50.00 will be applied every 2 day(s)"));
        assert!(notice.body.ends_with("Thank you,\nBilling\n"));
        assert!(notice.cc.is_none());
    }

    #[test]
    fn smtp_message_builds_for_valid_addresses() {
        let client = client();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let notice = Notice::for_invoice(&client, &evaluation(&client), credentials(), "Billing", now);
        assert!(SmtpGateway::build_message(&notice).is_ok());
    }

    #[test]
    fn invalid_recipient_is_a_dispatch_failure() {
        let client = client();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let mut notice =
            Notice::for_invoice(&client, &evaluation(&client), credentials(), "Billing", now);
        notice.to = "not an address".to_string();

        assert!(matches!(
            SmtpGateway::build_message(&notice),
            Err(BillingError::DispatchFailure(_))
        ));
    }

    #[tokio::test]
    async fn mock_gateway_counts_and_fails_on_demand() {
        let client = client();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let notice = Notice::for_invoice(&client, &evaluation(&client), credentials(), "Billing", now);
        let gateway = MockGateway::new();

        gateway.send(&notice).await.unwrap();
        assert_eq!(gateway.send_count(), 1);

        gateway.set_failing(true);
        assert!(gateway.send(&notice).await.is_err());
        assert_eq!(gateway.send_count(), 1);
        assert_eq!(gateway.sent().len(), 1);
    }
}
