#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Process-shared sliding windows
//!
//! A sliding window is a bounded FIFO of integers, used by circuit breakers
//! to remember recent failures. Every process that opens the same name sees
//! the same entries. Access is serialised by a [`CrossProcessLock`], which
//! the kernel releases if its holder is killed.

pub mod backend;
#[cfg(unix)]
pub mod lock;
pub mod ring;
pub mod window;

pub use backend::WindowBackend;
#[cfg(unix)]
pub use lock::{CrossProcessLock, ExclusiveSection};
pub use ring::Ring;
pub use window::SlidingWindow;
