//! Outgoing mail: templates, autosend rules, the outbox, delivery and the
//! batch jobs that trigger time-based mails.

pub mod autosend;
pub mod jobs;
pub mod outbox;
pub mod template;
pub mod transport;

pub use autosend::{AutosendDraft, EffectiveAutosend, ProductAutosend, Recipient, VisitAutosend};
pub use jobs::{JobReport, JobRun, JobRunner, JobSchedule, ScheduledJob};
pub use outbox::{EmailMessage, MessageStatus};
pub use template::{EmailTemplate, EmailTemplateDraft, RecipientRole, TemplateKind};
pub use transport::{
    ConfiguredTransport, LogMailTransport, MailError, MailTransport, MemoryMailTransport,
    SmtpMailTransport,
};
