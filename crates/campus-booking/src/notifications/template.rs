//! Email templates: the kinds of mail the system sends, who receives each
//! kind, the built-in default texts and `{{ key }}` placeholder rendering.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::ids::{TemplateId, UnitId};
use crate::organization;
use crate::store::BookingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    BookingCreated,
    EditorsBookingCreated,
    RequestTeacherVolunteer,
    RequestHostVolunteer,
    HostAssociated,
    TeacherAssociated,
    RequestRoom,
    GeneralMessage,
    BookingComplete,
    BookingCancelled,
    BookingReminder,
    GuestReminder,
    Evaluation,
    EvaluationSecond,
    HostroleIdle,
    BasicMailEnvelope,
    EmailReply,
    UserCreated,
    BookingCreatedWaiting,
    SpotOpen,
    SpotAccepted,
    SpotRejected,
    EditorsSpotRejected,
}

/// Recipient groups a template kind addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecipientFlags {
    pub booker: bool,
    pub editors: bool,
    pub hosts: bool,
    pub teachers: bool,
    pub potential_hosts: bool,
    pub potential_teachers: bool,
    pub room_responsible: bool,
}

/// Role a recipient plays for the visit a mail concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Guest,
    Editor,
    Host,
    Teacher,
    PotentialHost,
    PotentialTeacher,
    RoomResponsible,
    Other,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 23] = [
        TemplateKind::BookingCreated,
        TemplateKind::EditorsBookingCreated,
        TemplateKind::RequestTeacherVolunteer,
        TemplateKind::RequestHostVolunteer,
        TemplateKind::HostAssociated,
        TemplateKind::TeacherAssociated,
        TemplateKind::RequestRoom,
        TemplateKind::GeneralMessage,
        TemplateKind::BookingComplete,
        TemplateKind::BookingCancelled,
        TemplateKind::BookingReminder,
        TemplateKind::GuestReminder,
        TemplateKind::Evaluation,
        TemplateKind::EvaluationSecond,
        TemplateKind::HostroleIdle,
        TemplateKind::BasicMailEnvelope,
        TemplateKind::EmailReply,
        TemplateKind::UserCreated,
        TemplateKind::BookingCreatedWaiting,
        TemplateKind::SpotOpen,
        TemplateKind::SpotAccepted,
        TemplateKind::SpotRejected,
        TemplateKind::EditorsSpotRejected,
    ];

    /// Kinds a product gets autosend rules for when it is created.
    pub const AUTOSEND: [TemplateKind; 18] = [
        TemplateKind::BookingCreated,
        TemplateKind::EditorsBookingCreated,
        TemplateKind::RequestTeacherVolunteer,
        TemplateKind::RequestHostVolunteer,
        TemplateKind::HostAssociated,
        TemplateKind::TeacherAssociated,
        TemplateKind::RequestRoom,
        TemplateKind::BookingComplete,
        TemplateKind::BookingCancelled,
        TemplateKind::BookingReminder,
        TemplateKind::GuestReminder,
        TemplateKind::EvaluationSecond,
        TemplateKind::HostroleIdle,
        TemplateKind::BookingCreatedWaiting,
        TemplateKind::SpotOpen,
        TemplateKind::SpotAccepted,
        TemplateKind::SpotRejected,
        TemplateKind::EditorsSpotRejected,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            TemplateKind::BookingCreated => "notify_guest__booking_created",
            TemplateKind::EditorsBookingCreated => "notify_editors__booking_created",
            TemplateKind::RequestTeacherVolunteer => "notify_host__req_teacher_volunteer",
            TemplateKind::RequestHostVolunteer => "notify_host__req_host_volunteer",
            TemplateKind::HostAssociated => "notify_host__associated",
            TemplateKind::TeacherAssociated => "notify_teacher__associated",
            TemplateKind::RequestRoom => "notify_host__req_room",
            TemplateKind::GeneralMessage => "notify_guest__general_msg",
            TemplateKind::BookingComplete => "notify_all__booking_complete",
            TemplateKind::BookingCancelled => "notify_all__booking_canceled",
            TemplateKind::BookingReminder => "notify_all__booking_reminder",
            TemplateKind::GuestReminder => "notify_guest_reminder",
            TemplateKind::Evaluation => "notify_all_evaluation",
            TemplateKind::EvaluationSecond => "notify_guest__evaluation_second",
            TemplateKind::HostroleIdle => "notify_host__hostrole_idle",
            TemplateKind::BasicMailEnvelope => "system__basicmail_envelope",
            TemplateKind::EmailReply => "system__email_reply",
            TemplateKind::UserCreated => "system__user_created",
            TemplateKind::BookingCreatedWaiting => "notify_guest__booking_created_waiting",
            TemplateKind::SpotOpen => "notify_guest__spot_open",
            TemplateKind::SpotAccepted => "notify_guest__spot_accepted",
            TemplateKind::SpotRejected => "notify_guest__spot_rejected",
            TemplateKind::EditorsSpotRejected => "notify_editors__spot_rejected",
        }
    }

    pub const fn recipients(self) -> RecipientFlags {
        const NONE: RecipientFlags = RecipientFlags {
            booker: false,
            editors: false,
            hosts: false,
            teachers: false,
            potential_hosts: false,
            potential_teachers: false,
            room_responsible: false,
        };
        match self {
            TemplateKind::BookingCreated
            | TemplateKind::GeneralMessage
            | TemplateKind::GuestReminder
            | TemplateKind::Evaluation
            | TemplateKind::EvaluationSecond
            | TemplateKind::BookingCreatedWaiting
            | TemplateKind::SpotOpen
            | TemplateKind::SpotAccepted
            | TemplateKind::SpotRejected => RecipientFlags { booker: true, ..NONE },
            TemplateKind::EditorsBookingCreated
            | TemplateKind::HostroleIdle
            | TemplateKind::EditorsSpotRejected => RecipientFlags { editors: true, ..NONE },
            TemplateKind::RequestTeacherVolunteer => RecipientFlags {
                potential_teachers: true,
                ..NONE
            },
            TemplateKind::RequestHostVolunteer => RecipientFlags {
                potential_hosts: true,
                ..NONE
            },
            TemplateKind::HostAssociated => RecipientFlags { hosts: true, ..NONE },
            TemplateKind::TeacherAssociated => RecipientFlags { teachers: true, ..NONE },
            TemplateKind::RequestRoom => RecipientFlags {
                room_responsible: true,
                ..NONE
            },
            TemplateKind::BookingComplete
            | TemplateKind::BookingCancelled
            | TemplateKind::BookingReminder => RecipientFlags {
                booker: true,
                editors: true,
                hosts: true,
                teachers: true,
                room_responsible: true,
                ..NONE
            },
            TemplateKind::BasicMailEnvelope
            | TemplateKind::EmailReply
            | TemplateKind::UserCreated => NONE,
        }
    }

    /// Role of the recipient this kind is primarily written for.
    pub const fn default_role(self) -> RecipientRole {
        let flags = self.recipients();
        if flags.booker {
            RecipientRole::Guest
        } else if flags.editors {
            RecipientRole::Editor
        } else if flags.hosts {
            RecipientRole::Host
        } else if flags.teachers {
            RecipientRole::Teacher
        } else if flags.potential_hosts {
            RecipientRole::PotentialHost
        } else if flags.potential_teachers {
            RecipientRole::PotentialTeacher
        } else if flags.room_responsible {
            RecipientRole::RoomResponsible
        } else {
            RecipientRole::Other
        }
    }

    /// Days before the visit (or after it, for follow-ups) a timed autosend fires by default.
    pub const fn default_days(self) -> Option<u32> {
        match self {
            TemplateKind::BookingReminder | TemplateKind::GuestReminder => Some(3),
            TemplateKind::HostroleIdle => Some(3),
            _ => None,
        }
    }

    /// Texts used when no stored template exists anywhere up the unit tree.
    pub fn builtin(self) -> (&'static str, &'static str) {
        match self {
            TemplateKind::BookingCreated => (
                "Booking received: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nthank you for booking {{ product.title }} on {{ visit.interval }} for {{ guest.attendees }} attendees.\nWe will get back to you once the visit is planned.",
            ),
            TemplateKind::EditorsBookingCreated => (
                "New booking for {{ product.title }}",
                "{{ guest.name }} ({{ guest.school }}) booked {{ product.title }} on {{ visit.interval }} for {{ guest.attendees }} attendees.",
            ),
            TemplateKind::RequestTeacherVolunteer => (
                "Teacher wanted: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nvisit {{ visit.id }} of {{ product.title }} on {{ visit.interval }} still needs a teacher.",
            ),
            TemplateKind::RequestHostVolunteer => (
                "Host wanted: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nvisit {{ visit.id }} of {{ product.title }} on {{ visit.interval }} still needs a host.",
            ),
            TemplateKind::HostAssociated => (
                "You are host for {{ product.title }}",
                "Dear {{ recipient.name }},\n\nyou have been added as host for {{ product.title }} on {{ visit.interval }}.",
            ),
            TemplateKind::TeacherAssociated => (
                "You are teacher for {{ product.title }}",
                "Dear {{ recipient.name }},\n\nyou have been added as teacher for {{ product.title }} on {{ visit.interval }}.",
            ),
            TemplateKind::RequestRoom => (
                "Room request: {{ product.title }}",
                "A room is needed for {{ product.title }} on {{ visit.interval }}.",
            ),
            TemplateKind::GeneralMessage => ("Message about {{ product.title }}", "{{ message }}"),
            TemplateKind::BookingComplete => (
                "Visit planned: {{ product.title }}",
                "Dear {{ recipient.name }},\n\n{{ product.title }} on {{ visit.interval }} is now fully planned.",
            ),
            TemplateKind::BookingCancelled => (
                "Visit cancelled: {{ product.title }}",
                "Dear {{ recipient.name }},\n\n{{ product.title }} on {{ visit.interval }} has been cancelled.",
            ),
            TemplateKind::BookingReminder | TemplateKind::GuestReminder => (
                "Reminder: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nthis is a reminder of {{ product.title }} on {{ visit.interval }}.",
            ),
            TemplateKind::Evaluation | TemplateKind::EvaluationSecond => (
                "How was {{ product.title }}?",
                "Dear {{ recipient.name }},\n\nplease tell us how your visit to {{ product.title }} on {{ visit.interval }} went.",
            ),
            TemplateKind::HostroleIdle => (
                "No host yet: {{ product.title }}",
                "Visit {{ visit.id }} of {{ product.title }} on {{ visit.interval }} has bookings but still lacks hosts.",
            ),
            TemplateKind::BasicMailEnvelope => ("Contact request", "{{ message }}"),
            TemplateKind::EmailReply => ("Re: {{ subject }}", "{{ message }}"),
            TemplateKind::UserCreated => (
                "Your campus booking account",
                "Dear {{ recipient.name }},\n\nan account with the username {{ user.username }} has been created for you.",
            ),
            TemplateKind::BookingCreatedWaiting => (
                "On the waiting list: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nthe visit on {{ visit.interval }} is full. You have been placed on the waiting list.",
            ),
            TemplateKind::SpotOpen => (
                "A spot opened up: {{ product.title }}",
                "Dear {{ recipient.name }},\n\na spot on {{ product.title }} on {{ visit.interval }} is available. Please accept or decline it.",
            ),
            TemplateKind::SpotAccepted => (
                "Spot confirmed: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nyour spot on {{ product.title }} on {{ visit.interval }} is confirmed.",
            ),
            TemplateKind::SpotRejected => (
                "Spot released: {{ product.title }}",
                "Dear {{ recipient.name }},\n\nyou declined the spot on {{ product.title }} on {{ visit.interval }}.",
            ),
            TemplateKind::EditorsSpotRejected => (
                "Waiting list spot declined: {{ product.title }}",
                "{{ guest.name }} declined the offered spot on {{ product.title }} on {{ visit.interval }}.",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: TemplateId,
    pub kind: TemplateKind,
    pub unit: Option<UnitId>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailTemplateDraft {
    pub kind: TemplateKind,
    #[serde(default)]
    pub unit: Option<UnitId>,
    pub subject: String,
    pub body: String,
}

/// Flat placeholder values, keyed by dotted path.
pub type RenderContext = BTreeMap<String, String>;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static regex")
    })
}

/// Substitutes `{{ key }}` placeholders. Unknown keys render empty.
pub fn render(text: &str, context: &RenderContext) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &Captures<'_>| {
            context.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

impl EmailTemplate {
    pub fn render(&self, context: &RenderContext) -> (String, String) {
        (render(&self.subject, context), render(&self.body, context))
    }
}

impl BookingStore {
    /// Stores global copies of the built-in texts for kinds that have none yet.
    pub fn seed_default_templates(&mut self) -> usize {
        let mut seeded = 0;
        for kind in TemplateKind::ALL {
            let exists = self
                .templates
                .values()
                .any(|t| t.kind == kind && t.unit.is_none());
            if exists {
                continue;
            }
            let (subject, body) = kind.builtin();
            let id = TemplateId(self.next_id());
            self.templates.insert(
                id,
                EmailTemplate {
                    id,
                    kind,
                    unit: None,
                    subject: subject.to_string(),
                    body: body.to_string(),
                },
            );
            seeded += 1;
        }
        seeded
    }

    /// Creates the template for (kind, unit) or replaces its texts.
    pub fn save_template(&mut self, draft: EmailTemplateDraft) -> TemplateId {
        let existing = self
            .templates
            .values_mut()
            .find(|t| t.kind == draft.kind && t.unit == draft.unit);
        if let Some(template) = existing {
            template.subject = draft.subject;
            template.body = draft.body;
            return template.id;
        }
        let id = TemplateId(self.next_id());
        self.templates.insert(
            id,
            EmailTemplate {
                id,
                kind: draft.kind,
                unit: draft.unit,
                subject: draft.subject,
                body: draft.body,
            },
        );
        id
    }

    /// The template closest to `unit`: the unit's own, then each ancestor's,
    /// then the global one, then the built-in default.
    pub fn resolve_template(&self, kind: TemplateKind, unit: Option<UnitId>) -> EmailTemplate {
        let mut candidates: Vec<Option<UnitId>> = unit
            .map(|unit| {
                std::iter::once(unit)
                    .chain(organization::ancestors(&self.units, unit))
                    .map(Some)
                    .collect()
            })
            .unwrap_or_default();
        candidates.push(None);

        for candidate in candidates {
            if let Some(found) = self
                .templates
                .values()
                .find(|t| t.kind == kind && t.unit == candidate)
            {
                return found.clone();
            }
        }
        let (subject, body) = kind.builtin();
        EmailTemplate {
            id: TemplateId(0),
            kind,
            unit: None,
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }
}
