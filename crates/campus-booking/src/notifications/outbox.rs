use serde::{Deserialize, Serialize};
use tracing::debug;

use super::autosend::Recipient;
use super::template::TemplateKind;
use crate::ids::{BookingId, MessageId, VisitId};
use crate::scheduling::Timestamp;
use crate::store::BookingStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent { at: Timestamp },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: MessageId,
    pub created_at: Timestamp,
    pub kind: TemplateKind,
    pub subject: String,
    pub body: String,
    pub recipient: Recipient,
    pub status: MessageStatus,
    pub visit: Option<VisitId>,
    pub booking: Option<BookingId>,
    #[serde(default)]
    pub anonymized: bool,
}

impl EmailMessage {
    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    /// Drops the recipient's identity and the message text.
    pub fn anonymize(&mut self) {
        self.recipient.name = String::from("anonymized");
        self.recipient.email = String::new();
        self.body = String::new();
        self.anonymized = true;
    }
}

impl BookingStore {
    #[allow(clippy::too_many_arguments)]
    pub fn queue_message(
        &mut self,
        kind: TemplateKind,
        subject: String,
        body: String,
        recipient: Recipient,
        visit: Option<VisitId>,
        booking: Option<BookingId>,
        now: Timestamp,
    ) -> MessageId {
        let id = MessageId(self.next_id());
        debug!(message = %id, kind = kind.key(), to = %recipient.email, "message queued");
        self.outbox.insert(
            id,
            EmailMessage {
                id,
                created_at: now,
                kind,
                subject,
                body,
                recipient,
                status: MessageStatus::Pending,
                visit,
                booking,
                anonymized: false,
            },
        );
        id
    }

    pub fn pending_messages(&self) -> Vec<EmailMessage> {
        self.outbox
            .values()
            .filter(|m| m.is_pending())
            .cloned()
            .collect()
    }

    pub fn mark_message(&mut self, id: MessageId, status: MessageStatus) {
        if let Some(message) = self.outbox.get_mut(&id) {
            message.status = status;
        }
    }

    pub fn messages_for_visit(&self, visit: VisitId) -> Vec<&EmailMessage> {
        self.outbox
            .values()
            .filter(|m| m.visit == Some(visit))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::template::RecipientRole;
    use crate::store::test_support::at;

    #[test]
    fn queued_messages_stay_pending_until_marked() {
        let mut store = BookingStore::default();
        let recipient = Recipient::address("Ada", "ada@example.org", RecipientRole::Guest);
        let id = store.queue_message(
            TemplateKind::GeneralMessage,
            "Subject".into(),
            "Body".into(),
            recipient,
            None,
            None,
            at(9),
        );
        assert_eq!(store.pending_messages().len(), 1);

        store.mark_message(id, MessageStatus::Sent { at: at(10) });
        assert!(store.pending_messages().is_empty());

        let message = store.outbox.get_mut(&id).expect("message");
        message.anonymize();
        assert!(message.recipient.email.is_empty());
        assert!(message.anonymized);
    }
}
