//! Visits, their workflow and the bookings guests make for them.

pub mod booking;
pub mod status;
pub mod visit;

pub use booking::{filter_anonymized, Booking, BookingStatus, Guest, GuestDraft};
pub use status::WorkflowStatus;
pub use visit::{RoomStatus, Visit, VisitStaffing};
