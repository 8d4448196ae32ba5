//! Transjective membrane: a policy-gated, clock-synchronized bus between a
//! protected inner core and the untrusted outer world.
//!
//! Information crosses only as typed packets ([`packet`]) queued on the
//! [`bus::MembraneBus`]. The [`clock::Sys6MembraneClock`] decides when each
//! direction is preferred, the [`policy::CrossingPolicy`] decides whether a
//! packet may cross, and the [`codec::CodecPipeline`] sanitizes payloads
//! before they reach a [`sink`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod clock;
pub mod codec;
pub mod config;
pub mod logging;
pub mod packet;
pub mod policy;
pub mod sink;
