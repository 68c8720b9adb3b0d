//! Session engine
//!
//! A single actor task owns every [`Torrent`](crate::torrent::Torrent) of
//! a session. Callers talk to it through a [`SessionHandle`]; disk, tracker
//! and peer transports report back through an [`EventSender`].

pub mod actor;
pub mod commands;
pub mod events;
pub mod handle;
pub mod session;
pub mod test_mocks;

pub use actor::spawn_session;
pub use commands::SessionCommand;
pub use events::{EventReceiver, EventSender, PeerEvent, SessionEvent};
pub use handle::SessionHandle;
pub use session::Session;
pub use test_mocks::{
    ConnectionMonitor, MockConnection, MockConnectionFactory, MockDht, MockDisk, MockLsd,
    MockServices, MockTrackerTransport, TestTorrent,
};
