//! Guest bookings and the waiting list.
//!
//! Seats are counted in attendees. A booking takes seats while it is Booked
//! or SpotOffered. When seats free up the oldest waiting booking that fits is
//! offered the spot, and the guest can accept or decline.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{LogAction, LogSubject};
use crate::ids::{BookingId, GuestId, VisitId};
use crate::notifications::template::TemplateKind;
use crate::scheduling::Timestamp;
use crate::service::BookingError;
use crate::store::BookingStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: GuestId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub school: String,
    pub grade_level: String,
    pub attendee_count: u32,
    pub teacher_count: u32,
    pub created_at: Timestamp,
    #[serde(default)]
    pub anonymized: bool,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Blanks every personal field. Counts are kept for statistics.
    pub fn anonymize(&mut self) {
        self.first_name = String::from("anonymized");
        self.last_name.clear();
        self.email.clear();
        self.phone.clear();
        self.anonymized = true;
    }
}

/// Guests that still carry personal data.
pub fn filter_anonymized<'a>(guests: impl IntoIterator<Item = &'a Guest>) -> Vec<&'a Guest> {
    guests.into_iter().filter(|g| !g.anonymized).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestDraft {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub grade_level: String,
    pub attendee_count: u32,
    #[serde(default)]
    pub teacher_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Booked,
    WaitingList,
    SpotOffered,
    Cancelled,
}

impl BookingStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BookingStatus::Booked => "Booked",
            BookingStatus::WaitingList => "On waiting list",
            BookingStatus::SpotOffered => "Spot offered",
            BookingStatus::Cancelled => "Cancelled",
        }
    }

    /// Whether the booking holds seats on the visit.
    pub const fn takes_seats(self) -> bool {
        matches!(self, BookingStatus::Booked | BookingStatus::SpotOffered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub visit: VisitId,
    pub guest: GuestId,
    pub status: BookingStatus,
    pub created_at: Timestamp,
}

impl BookingStore {
    pub fn booking(&self, booking: BookingId) -> Result<&Booking, BookingError> {
        self.bookings
            .get(&booking)
            .ok_or(BookingError::not_found("booking", booking.0))
    }

    /// Bookings of `visit`, oldest first.
    pub fn bookings_for_visit(&self, visit: VisitId) -> Vec<&Booking> {
        let mut bookings: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| b.visit == visit)
            .collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));
        bookings
    }

    fn attendees_where(&self, visit: VisitId, keep: impl Fn(BookingStatus) -> bool) -> u32 {
        self.bookings_for_visit(visit)
            .into_iter()
            .filter(|b| keep(b.status))
            .filter_map(|b| self.guests.get(&b.guest))
            .map(|g| g.attendee_count)
            .sum()
    }

    pub fn visit_attendee_count(&self, visit: VisitId) -> u32 {
        self.attendees_where(visit, BookingStatus::takes_seats)
    }

    /// Seats left on the visit. `None` means the product sets no maximum.
    pub fn visit_available_seats(&self, visit: VisitId) -> Option<u32> {
        let v = self.visits.get(&visit)?;
        let max = self.products.get(&v.product)?.maximum_visitors?;
        Some(max.saturating_sub(self.visit_attendee_count(visit)))
    }

    pub fn visit_waiting_list_capacity(&self, visit: VisitId) -> u32 {
        let Some(product) = self
            .visits
            .get(&visit)
            .and_then(|v| self.products.get(&v.product))
        else {
            return 0;
        };
        let waiting = self.attendees_where(visit, |s| s == BookingStatus::WaitingList);
        product.waiting_list_capacity().saturating_sub(waiting)
    }

    /// Seats a not yet booked event time offers: the product maximum, or
    /// what its visit has left.
    pub fn event_time_available_seats(&self, time: crate::ids::EventTimeId) -> Option<u32> {
        let event_time = self.event_times.get(&time)?;
        match event_time.visit {
            Some(visit) => self.visit_available_seats(visit),
            None => self.products.get(&event_time.product)?.maximum_visitors,
        }
    }

    /// Waiting list places of an event time: its visit's remaining places,
    /// or the product's capacity while the time has no visit.
    pub fn event_time_waiting_list_capacity(&self, time: crate::ids::EventTimeId) -> u32 {
        let Some(event_time) = self.event_times.get(&time) else {
            return 0;
        };
        match event_time.visit {
            Some(visit) => self.visit_waiting_list_capacity(visit),
            None => self
                .products
                .get(&event_time.product)
                .map_or(0, |p| p.waiting_list_capacity()),
        }
    }

    pub fn first_booking_at(&self, visit: VisitId) -> Option<Timestamp> {
        self.bookings_for_visit(visit)
            .first()
            .map(|b| b.created_at)
    }

    /// Books `guest` onto the visit, or onto its waiting list when seats ran out.
    pub fn book(
        &mut self,
        visit: VisitId,
        guest: GuestDraft,
        now: Timestamp,
    ) -> Result<BookingId, BookingError> {
        let v = self.visit(visit)?;
        if !v.workflow_status.is_active() {
            return Err(BookingError::NotBookable(format!(
                "visit {visit} is {}",
                v.workflow_status.label()
            )));
        }
        let product = self
            .products
            .get(&v.product)
            .ok_or(BookingError::not_found("product", v.product.0))?;
        if !product.is_bookable() {
            return Err(BookingError::NotBookable(format!(
                "product {} is not open for bookings",
                product.id
            )));
        }
        if guest.attendee_count == 0 {
            return Err(BookingError::Invalid(
                "a booking needs at least one attendee".to_string(),
            ));
        }
        if guest.email.trim().is_empty() {
            return Err(BookingError::Invalid("guest email is required".to_string()));
        }

        let fits = self
            .visit_available_seats(visit)
            .map_or(true, |seats| guest.attendee_count <= seats);
        let status = if fits {
            BookingStatus::Booked
        } else if self.visit_waiting_list_capacity(visit) >= guest.attendee_count {
            BookingStatus::WaitingList
        } else {
            return Err(BookingError::VisitFull(visit));
        };

        let guest_id = GuestId(self.next_id());
        self.guests.insert(
            guest_id,
            Guest {
                id: guest_id,
                first_name: guest.first_name,
                last_name: guest.last_name,
                email: guest.email,
                phone: guest.phone,
                school: guest.school,
                grade_level: guest.grade_level,
                attendee_count: guest.attendee_count,
                teacher_count: guest.teacher_count,
                created_at: now,
                anonymized: false,
            },
        );
        let id = BookingId(self.next_id());
        self.bookings.insert(
            id,
            Booking {
                id,
                visit,
                guest: guest_id,
                status,
                created_at: now,
            },
        );
        if let Some(v) = self.visits.get_mut(&visit) {
            v.needs_attention_since.get_or_insert(now);
        }

        self.log_action(
            None,
            LogSubject::Booking(id),
            LogAction::Create,
            format!("Booking created with status {}", status.label()),
            now,
        );
        let guest_mail = match status {
            BookingStatus::WaitingList => TemplateKind::BookingCreatedWaiting,
            _ => TemplateKind::BookingCreated,
        };
        self.autosend(visit, guest_mail, Some(id), None, now);
        for kind in [
            TemplateKind::EditorsBookingCreated,
            TemplateKind::RequestTeacherVolunteer,
            TemplateKind::RequestHostVolunteer,
            TemplateKind::RequestRoom,
        ] {
            self.autosend(visit, kind, Some(id), None, now);
        }
        self.refresh_visit_search(visit);
        info!(booking = %id, visit = %visit, status = status.label(), "booking created");
        Ok(id)
    }

    fn set_booking_status(&mut self, booking: BookingId, status: BookingStatus, now: Timestamp) {
        let Some(b) = self.bookings.get_mut(&booking) else {
            return;
        };
        let from = b.status;
        b.status = status;
        self.log_action(
            None,
            LogSubject::Booking(booking),
            LogAction::Change,
            format!("Status changed from {} to {}", from.label(), status.label()),
            now,
        );
    }

    /// Offers free seats to waiting bookings, oldest first, while they fit.
    pub fn offer_waiting_spots(&mut self, visit: VisitId, now: Timestamp) -> Vec<BookingId> {
        let mut offered = Vec::new();
        loop {
            let seats = self.visit_available_seats(visit);
            let next = self
                .bookings_for_visit(visit)
                .into_iter()
                .filter(|b| b.status == BookingStatus::WaitingList)
                .find(|b| {
                    let attendees = self
                        .guests
                        .get(&b.guest)
                        .map_or(u32::MAX, |g| g.attendee_count);
                    seats.map_or(true, |seats| attendees <= seats)
                })
                .map(|b| b.id);
            let Some(next) = next else {
                break;
            };
            self.set_booking_status(next, BookingStatus::SpotOffered, now);
            self.autosend(visit, TemplateKind::SpotOpen, Some(next), None, now);
            offered.push(next);
        }
        offered
    }

    pub fn cancel_booking(&mut self, booking: BookingId, now: Timestamp) -> Result<(), BookingError> {
        let b = self.booking(booking)?;
        if b.status == BookingStatus::Cancelled {
            return Err(BookingError::Conflict(format!(
                "booking {booking} is already cancelled"
            )));
        }
        let (visit, held_seats) = (b.visit, b.status.takes_seats());
        self.set_booking_status(booking, BookingStatus::Cancelled, now);
        if held_seats {
            self.offer_waiting_spots(visit, now);
        }
        self.refresh_visit_search(visit);
        Ok(())
    }

    fn offered_booking(&self, booking: BookingId) -> Result<VisitId, BookingError> {
        let b = self.booking(booking)?;
        if b.status != BookingStatus::SpotOffered {
            return Err(BookingError::Conflict(format!(
                "booking {booking} has no open offer"
            )));
        }
        Ok(b.visit)
    }

    pub fn accept_offer(&mut self, booking: BookingId, now: Timestamp) -> Result<(), BookingError> {
        let visit = self.offered_booking(booking)?;
        self.set_booking_status(booking, BookingStatus::Booked, now);
        self.autosend(visit, TemplateKind::SpotAccepted, Some(booking), None, now);
        Ok(())
    }

    pub fn decline_offer(&mut self, booking: BookingId, now: Timestamp) -> Result<(), BookingError> {
        let visit = self.offered_booking(booking)?;
        self.set_booking_status(booking, BookingStatus::Cancelled, now);
        self.autosend(visit, TemplateKind::SpotRejected, Some(booking), None, now);
        self.autosend(visit, TemplateKind::EditorsSpotRejected, Some(booking), None, now);
        self.offer_waiting_spots(visit, now);
        Ok(())
    }
}
