//! Booking conflict and lifecycle engine: calendar policy, overlap
//! detection, slot suggestions, the booking state machine, atomic
//! approvals and the reconciliation sweeps that keep bookings honest.

pub mod calendar;
pub mod clock;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod mail;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;
