//! Tracker bookkeeping and announce transports.
//!
//! [`TrackerList`] decides when and where to announce; the transports only
//! carry requests out and replies back.

mod announce_entry;
mod list;
mod transport;
mod types;

pub use announce_entry::{AnnounceEntry, TrackerSource};
pub use list::{AnnounceTarget, TrackerList};
pub use transport::{DhtEvent, DhtService, LsdService, TrackerTransport};
pub use types::{
    AnnounceEvent, RequestKind, ScrapeResponse, TrackerEvent, TrackerFailure, TrackerReply,
    TrackerRequest, TrackerResponse,
};
