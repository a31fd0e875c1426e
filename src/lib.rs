//! Offline-first job cache and sync engine for field-service technicians.
//!
//! Reads are served from a TTL-bound local cache with a background refresh,
//! falling back to stale data or a bundled offline dataset when the network
//! is unavailable. Writes apply optimistically and queue for replay when they
//! cannot be confirmed. A session monitor ends idle work sessions and
//! reconciles them with the remote Session API.

pub mod cache;
pub mod clock;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod net;
pub mod query;
pub mod session;

#[cfg(test)]
mod test_support;
