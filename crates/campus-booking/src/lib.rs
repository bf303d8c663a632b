//! Resource-aware booking of university visits, courses and teaching offers.
//!
//! Everything lives in one [`store::BookingStore`]. The domain modules add
//! behavior to it through `impl BookingStore` blocks, and
//! [`service::BookingService`] puts it behind a lock with permission checks
//! and mail dispatch.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ids;
pub mod notifications;
pub mod organization;
pub mod profile;
pub mod registry;
pub mod reports;
pub mod resources;
pub mod scheduling;
pub mod search;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod visits;

pub use service::{booking_router, BookingError, BookingService, DispatchReport, VisitMessage};
pub use store::{BookingStore, SnapshotError};
