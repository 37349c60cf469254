//! Fans an accepted recipient expression out to an injected SMTP client.
//!
//! The client is a plain async trait rather than a concrete type: this
//! crate has no opinion on how (or over what transport) a message is
//! actually handed off, only on which addresses it is handed off to.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;

/// Sends one message to one recipient. Implementations report failure as
/// a string rather than a `MailingSetError`: a per-recipient delivery
/// failure is a relay-layer event to be logged, not something the caller
/// needs to pattern-match on.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send(
        &self,
        envelope_sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), String>;
}

#[derive(Debug, Default, Clone)]
pub struct RelayOutcome {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Dispatches one accepted `RCPT TO` expression: one message per resolved
/// canonical address, plus one additional copy to `archive_addr` if
/// configured, for this expression alone. Call this once per accepted
/// recipient expression in a transaction, not once per message.
pub async fn dispatch_expression(
    client: &dyn RelayClient,
    envelope_sender: &str,
    recipients: &HashSet<String>,
    archive_addr: Option<&str>,
    message: &[u8],
) -> RelayOutcome {
    let mut targets: Vec<String> = recipients.iter().cloned().collect();
    if let Some(archive) = archive_addr {
        targets.push(archive.to_string());
    }

    let results = join_all(
        targets
            .iter()
            .map(|recipient| client.send(envelope_sender, recipient, message)),
    )
    .await;

    let mut outcome = RelayOutcome::default();
    for (recipient, result) in targets.into_iter().zip(results) {
        match result {
            Ok(()) => outcome.delivered.push(recipient),
            Err(reason) => outcome.failed.push((recipient, reason)),
        }
    }
    outcome
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    struct RecordingClient {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: Vec<String>,
    }

    #[async_trait]
    impl RelayClient for RecordingClient {
        async fn send(
            &self,
            envelope_sender: &str,
            recipient: &str,
            _message: &[u8],
        ) -> Result<(), String> {
            if self.fail_for.iter().any(|r| r == recipient) {
                return Err(format!("refused {recipient}"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((envelope_sender.to_string(), recipient.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_to_every_recipient_and_the_archive() {
        let client = RecordingClient {
            sent: Mutex::new(vec![]),
            fail_for: vec![],
        };
        let recipients: HashSet<String> = ["bob@example.com".to_string(), "carol@example.com".to_string()]
            .into_iter()
            .collect();

        let outcome = dispatch_expression(
            &client,
            "sender@example.com",
            &recipients,
            Some("archive@example.com"),
            b"hello",
        )
        .await;

        k9::assert_equal!(outcome.delivered.len(), 3);
        k9::assert_equal!(outcome.failed.len(), 0);
        k9::assert_equal!(
            outcome.delivered.contains(&"archive@example.com".to_string()),
            true
        );
    }

    #[tokio::test]
    async fn no_archive_configured_means_no_extra_copy() {
        let client = RecordingClient {
            sent: Mutex::new(vec![]),
            fail_for: vec![],
        };
        let recipients: HashSet<String> = ["bob@example.com".to_string()].into_iter().collect();

        let outcome = dispatch_expression(&client, "sender@example.com", &recipients, None, b"hello").await;
        k9::assert_equal!(outcome.delivered.len(), 1);
    }

    #[tokio::test]
    async fn records_per_recipient_failures_without_aborting_the_rest() {
        let client = RecordingClient {
            sent: Mutex::new(vec![]),
            fail_for: vec!["bob@example.com".to_string()],
        };
        let recipients: HashSet<String> =
            ["bob@example.com".to_string(), "carol@example.com".to_string()]
                .into_iter()
                .collect();

        let outcome = dispatch_expression(&client, "sender@example.com", &recipients, None, b"hello").await;
        k9::assert_equal!(outcome.delivered.len(), 1);
        k9::assert_equal!(outcome.failed.len(), 1);
        k9::assert_equal!(outcome.failed[0].0.clone(), "bob@example.com".to_string());
    }
}
