//! Automatic mails tied to visits.
//!
//! Products carry one autosend rule per template kind. Each visit gets its
//! own rules that inherit the product's by default and can be overridden.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::template::{RecipientRole, RenderContext, TemplateKind};
use crate::audit::{LogAction, LogSubject};
use crate::ids::{BookingId, GuestId, ProductId, UserId, VisitId};
use crate::profile::UserProfile;
use crate::scheduling::Timestamp;
use crate::store::BookingStore;
use crate::visits::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAutosend {
    pub product: ProductId,
    pub kind: TemplateKind,
    pub enabled: bool,
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitAutosend {
    pub visit: VisitId,
    pub kind: TemplateKind,
    pub enabled: bool,
    pub days: Option<u32>,
    pub inherit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutosendDraft {
    pub kind: TemplateKind,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub inherit: bool,
}

/// Rule values after inheritance is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveAutosend {
    pub enabled: bool,
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    pub user: Option<UserId>,
    pub guest: Option<GuestId>,
}

impl Recipient {
    pub fn address(name: impl Into<String>, email: impl Into<String>, role: RecipientRole) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role,
            user: None,
            guest: None,
        }
    }

    pub fn user(profile: &UserProfile, role: RecipientRole) -> Self {
        Self {
            name: profile.full_name.clone(),
            email: profile.email.clone(),
            role,
            user: Some(profile.id),
            guest: None,
        }
    }
}

impl BookingStore {
    pub fn product_autosend(&self, product: ProductId, kind: TemplateKind) -> Option<&ProductAutosend> {
        self.product_autosends
            .iter()
            .find(|a| a.product == product && a.kind == kind)
    }

    pub fn visit_autosend(&self, visit: VisitId, kind: TemplateKind) -> Option<&VisitAutosend> {
        self.visit_autosends
            .iter()
            .find(|a| a.visit == visit && a.kind == kind)
    }

    pub fn set_product_autosend(
        &mut self,
        product: ProductId,
        kind: TemplateKind,
        enabled: bool,
        days: Option<u32>,
    ) {
        match self
            .product_autosends
            .iter_mut()
            .find(|a| a.product == product && a.kind == kind)
        {
            Some(rule) => {
                rule.enabled = enabled;
                rule.days = days;
            }
            None => self.product_autosends.push(ProductAutosend {
                product,
                kind,
                enabled,
                days,
            }),
        }
    }

    /// Gives a new product an enabled rule for every visit-related kind.
    pub fn enable_default_autosends(&mut self, product: ProductId) {
        for kind in TemplateKind::AUTOSEND {
            if self.product_autosend(product, kind).is_none() {
                self.set_product_autosend(product, kind, true, kind.default_days());
            }
        }
    }

    pub fn set_visit_autosend(&mut self, visit: VisitId, draft: AutosendDraft) {
        match self
            .visit_autosends
            .iter_mut()
            .find(|a| a.visit == visit && a.kind == draft.kind)
        {
            Some(rule) => {
                rule.enabled = draft.enabled;
                rule.days = draft.days;
                rule.inherit = draft.inherit;
            }
            None => self.visit_autosends.push(VisitAutosend {
                visit,
                kind: draft.kind,
                enabled: draft.enabled,
                days: draft.days,
                inherit: draft.inherit,
            }),
        }
    }

    /// Adds an inheriting visit rule for every product rule the visit lacks.
    pub fn create_inheriting_autosends(&mut self, visit: VisitId) {
        let Some(product) = self.visits.get(&visit).map(|v| v.product) else {
            return;
        };
        let kinds: Vec<TemplateKind> = self
            .product_autosends
            .iter()
            .filter(|a| a.product == product)
            .map(|a| a.kind)
            .collect();
        for kind in kinds {
            if self.visit_autosend(visit, kind).is_none() {
                self.visit_autosends.push(VisitAutosend {
                    visit,
                    kind,
                    enabled: false,
                    days: None,
                    inherit: true,
                });
            }
        }
    }

    /// The visit's own rule, or the product's when the visit inherits or has none.
    pub fn effective_autosend(&self, visit: VisitId, kind: TemplateKind) -> Option<EffectiveAutosend> {
        let product = self.visits.get(&visit)?.product;
        let from_product = || {
            self.product_autosend(product, kind).map(|a| EffectiveAutosend {
                enabled: a.enabled,
                days: a.days,
            })
        };
        match self.visit_autosend(visit, kind) {
            Some(rule) if rule.inherit => from_product(),
            Some(rule) => Some(EffectiveAutosend {
                enabled: rule.enabled,
                days: rule.days,
            }),
            None => from_product(),
        }
    }

    pub fn autosend_enabled(&self, visit: VisitId, kind: TemplateKind) -> bool {
        self.effective_autosend(visit, kind)
            .is_some_and(|rule| rule.enabled)
    }

    /// Editors who may work on the product's unit, plus its coordinator.
    pub fn editors_of_product(&self, product: ProductId) -> Vec<Recipient> {
        let Some(p) = self.products.get(&product) else {
            return Vec::new();
        };
        let unit = self.units.get(&p.unit);
        self.users
            .values()
            .filter(|user| {
                Some(user.id) == p.coordinator || (user.role.is_editor() && user.can_edit(unit))
            })
            .map(|user| Recipient::user(user, RecipientRole::Editor))
            .collect()
    }

    pub(crate) fn guest_recipients(&self, visit: VisitId, booking: Option<BookingId>) -> Vec<Recipient> {
        let bookings = match booking {
            Some(id) => self.bookings.get(&id).into_iter().collect::<Vec<_>>(),
            None => self
                .bookings_for_visit(visit)
                .into_iter()
                .filter(|b| b.status != BookingStatus::Cancelled)
                .collect(),
        };
        bookings
            .into_iter()
            .filter_map(|b| self.guests.get(&b.guest))
            .map(|guest| Recipient {
                name: guest.full_name(),
                email: guest.email.clone(),
                role: RecipientRole::Guest,
                user: None,
                guest: Some(guest.id),
            })
            .collect()
    }

    pub(crate) fn user_recipients<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
        role: RecipientRole,
    ) -> Vec<Recipient> {
        users
            .into_iter()
            .filter_map(|id| self.users.get(id))
            .map(|user| Recipient::user(user, role))
            .collect()
    }

    /// Everyone the template kind addresses for this visit. Duplicates and
    /// recipients without an address are dropped.
    pub fn autosend_recipients(
        &self,
        visit: VisitId,
        kind: TemplateKind,
        booking: Option<BookingId>,
    ) -> Vec<Recipient> {
        let Some(v) = self.visits.get(&visit) else {
            return Vec::new();
        };
        let Some(product) = self.products.get(&v.product) else {
            return Vec::new();
        };
        let flags = kind.recipients();
        let mut all = Vec::new();
        if flags.booker {
            all.extend(self.guest_recipients(visit, booking));
        }
        if flags.editors {
            all.extend(self.editors_of_product(product.id));
        }
        if flags.hosts {
            all.extend(self.user_recipients(&v.hosts, RecipientRole::Host));
        }
        if flags.teachers {
            all.extend(self.user_recipients(&v.teachers, RecipientRole::Teacher));
        }
        if flags.potential_hosts {
            all.extend(self.user_recipients(
                product.potential_hosts.difference(&v.hosts),
                RecipientRole::PotentialHost,
            ));
        }
        if flags.potential_teachers {
            all.extend(self.user_recipients(
                product.potential_teachers.difference(&v.teachers),
                RecipientRole::PotentialTeacher,
            ));
        }
        if flags.room_responsible {
            all.extend(product.room_responsible.iter().map(|email| {
                Recipient::address(email.clone(), email.clone(), RecipientRole::RoomResponsible)
            }));
        }

        let mut seen = BTreeSet::new();
        all.retain(|r| !r.email.trim().is_empty() && seen.insert(r.email.to_lowercase()));
        all
    }

    /// Placeholder values describing the visit, its product and optionally a booking.
    pub fn mail_context(&self, visit: Option<VisitId>, booking: Option<BookingId>) -> RenderContext {
        let mut ctx = RenderContext::new();
        let mut put = |key: &str, value: String| {
            ctx.insert(key.to_string(), value);
        };

        let v = visit.and_then(|id| self.visits.get(&id));
        if let Some(v) = v {
            put("visit.id", v.id.to_string());
            put("visit.status", v.workflow_status.label().to_string());
            let time = v.any_event_time().and_then(|t| self.event_times.get(&t));
            if let Some(time) = time {
                put("visit.interval", time.interval_display());
                if let Some(start) = time.start {
                    put("visit.start", start.format("%d.%m.%Y %H:%M").to_string());
                }
                if let Some(end) = time.end {
                    put("visit.end", end.format("%d.%m.%Y %H:%M").to_string());
                }
            }
            if let Some(product) = self.products.get(&v.product) {
                put("product.id", product.id.to_string());
                put("product.title", product.title.clone());
                if let Some(unit) = self.units.get(&product.unit) {
                    put("product.unit", unit.name.clone());
                }
            }
        }

        let b = booking.and_then(|id| self.bookings.get(&id));
        if let Some(b) = b {
            put("booking.id", b.id.to_string());
            put("booking.status", b.status.label().to_string());
            if let Some(guest) = self.guests.get(&b.guest) {
                put("guest.name", guest.full_name());
                put("guest.email", guest.email.clone());
                put("guest.school", guest.school.clone());
                put("guest.attendees", guest.attendee_count.to_string());
            }
        }
        ctx
    }

    /// Renders `kind` for each recipient and queues the results. Returns the
    /// number of queued messages.
    pub fn send_template_mail(
        &mut self,
        kind: TemplateKind,
        visit: Option<VisitId>,
        booking: Option<BookingId>,
        recipients: Vec<Recipient>,
        extra: &RenderContext,
        now: Timestamp,
    ) -> usize {
        let unit = visit
            .and_then(|id| self.visits.get(&id))
            .and_then(|v| self.products.get(&v.product))
            .map(|p| p.unit);
        let template = self.resolve_template(kind, unit);
        let mut base = self.mail_context(visit, booking);
        base.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut queued = 0;
        for recipient in recipients {
            if recipient.email.trim().is_empty() {
                continue;
            }
            let mut ctx = base.clone();
            ctx.insert("recipient.name".into(), recipient.name.clone());
            ctx.insert("recipient.email".into(), recipient.email.clone());
            let (subject, body) = template.render(&ctx);
            let email = recipient.email.clone();
            self.queue_message(kind, subject, body, recipient, visit, booking, now);
            if let Some(visit) = visit {
                self.log_action(
                    None,
                    LogSubject::Visit(visit),
                    LogAction::MailSent,
                    format!("Mail '{}' queued for {email}", kind.key()),
                    now,
                );
            }
            queued += 1;
        }
        queued
    }

    /// Sends `kind` for the visit when its autosend rule is enabled. `only_to`
    /// replaces the recipients the kind would normally address.
    pub fn autosend(
        &mut self,
        visit: VisitId,
        kind: TemplateKind,
        booking: Option<BookingId>,
        only_to: Option<Vec<Recipient>>,
        now: Timestamp,
    ) -> usize {
        if !self.autosend_enabled(visit, kind) {
            debug!(visit = %visit, kind = kind.key(), "autosend disabled");
            return 0;
        }
        let recipients = only_to.unwrap_or_else(|| self.autosend_recipients(visit, kind, booking));
        self.send_template_mail(kind, Some(visit), booking, recipients, &RenderContext::new(), now)
    }
}
