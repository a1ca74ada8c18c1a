//! Gatekeep - persistent attempt limiting with exponential backoff
//!
//! This crate throttles abuse-prone operations (login, signup, payment
//! creation, administrative review) on the caller's side. Attempt history is
//! kept in a pluggable key-value store so that it survives restarts, and
//! repeated violations earn exponentially longer blocks.
//!
//! It is a deterrent, not an authority: anyone able to clear the store can
//! reset their own history. Pair it with server-side limiting.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
