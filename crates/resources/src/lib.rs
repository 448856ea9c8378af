#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Bulkheads shared across processes
//!
//! A [`Resource`] hands out a bounded number of tickets for a named
//! resource. Every process opening the same name draws from the same pool,
//! and the kernel returns the tickets of processes that die holding them.

pub mod limits;
pub mod pool;
pub mod resource;

pub use limits::{target_tickets, validate, MAX_TICKETS};
pub use pool::TicketPool;
pub use resource::{Resource, Ticket};
