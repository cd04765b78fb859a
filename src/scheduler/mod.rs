//! Background maintenance module.
//!
//! Periodically removes duty rows whose date has passed, so the duty
//! table does not grow without bound.

mod janitor;

pub use janitor::{DutyJanitor, JanitorMessage};
