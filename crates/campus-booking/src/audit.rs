use serde::{Deserialize, Serialize};

use crate::ids::{BookingId, LogEntryId, ProductId, ResourceId, UserId, VisitId};
use crate::scheduling::Timestamp;
use crate::store::BookingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Create,
    Change,
    Delete,
    MailSent,
    ManualEntry,
}

impl LogAction {
    /// Custom actions sit above 128 so they never collide with the basic three.
    pub const fn code(self) -> u16 {
        match self {
            LogAction::Create => 1,
            LogAction::Change => 2,
            LogAction::Delete => 3,
            LogAction::MailSent => 128 + 1,
            LogAction::ManualEntry => 128 + 64 + 1,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            LogAction::Create => "Created",
            LogAction::Change => "Changed",
            LogAction::Delete => "Deleted",
            LogAction::MailSent => "Mail sent",
            LogAction::ManualEntry => "Log entry added manually",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LogSubject {
    Product(ProductId),
    Visit(VisitId),
    Booking(BookingId),
    Resource(ResourceId),
    User(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub at: Timestamp,
    pub user: Option<UserId>,
    pub subject: LogSubject,
    pub action: LogAction,
    pub message: String,
}

impl BookingStore {
    pub fn log_action(
        &mut self,
        user: Option<UserId>,
        subject: LogSubject,
        action: LogAction,
        message: impl Into<String>,
        at: Timestamp,
    ) -> LogEntryId {
        let id = LogEntryId(self.next_id());
        self.log.insert(
            id,
            LogEntry {
                id,
                at,
                user,
                subject,
                action,
                message: message.into(),
            },
        );
        id
    }

    /// Entries for `subject`, newest first.
    pub fn log_entries_for(&self, subject: LogSubject) -> Vec<&LogEntry> {
        let mut entries: Vec<&LogEntry> = self
            .log
            .values()
            .filter(|entry| entry.subject == subject)
            .collect();
        entries.sort_by(|a, b| b.at.cmp(&a.at).then(b.id.cmp(&a.id)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn entries_are_returned_newest_first() {
        let mut store = BookingStore::default();
        let early = Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).single().expect("ts");
        let late = Utc.with_ymd_and_hms(2030, 1, 2, 8, 0, 0).single().expect("ts");
        let subject = LogSubject::Visit(VisitId(7));
        store.log_action(None, subject, LogAction::Create, "created", early);
        store.log_action(None, subject, LogAction::MailSent, "mail", late);
        store.log_action(None, LogSubject::Visit(VisitId(8)), LogAction::Change, "other", late);

        let entries = store.log_entries_for(subject);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, LogAction::MailSent);
        assert_eq!(LogAction::ManualEntry.code(), 193);
    }
}
