//! Shared fixture for driving a single torrent against mock services.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eddy_core::config::EddyConfig;
use eddy_core::engine::{ConnectionMonitor, MockConnection, MockServices, TestTorrent};
use eddy_core::torrent::connection::ConnectionId;
use eddy_core::torrent::{AddTorrentParams, Alert, AlertSink, Torrent};
use tokio::sync::mpsc;

/// A torrent wired to mock collaborators, with a manual clock.
pub struct TorrentFixture {
    pub torrent: Torrent,
    pub services: MockServices,
    pub alerts: mpsc::UnboundedReceiver<Alert>,
    pub now: Instant,
}

impl TorrentFixture {
    pub fn new(params: AddTorrentParams, config: EddyConfig) -> Self {
        let services = MockServices::new();
        let (sink, alerts) = AlertSink::channel();
        let now = Instant::now();
        let torrent = Torrent::new(params, Arc::new(config), services.collaborators(sink), now);
        Self {
            torrent,
            services,
            alerts,
            now,
        }
    }

    /// Adds `test` with its layout and starts it through the file check.
    pub fn started(test: &TestTorrent, config: EddyConfig) -> Self {
        let params = AddTorrentParams::new(test.info_hash).with_layout(test.layout.clone());
        Self::started_with(params, config)
    }

    pub fn started_with(params: AddTorrentParams, config: EddyConfig) -> Self {
        let mut fixture = Self::new(params, config);
        fixture.torrent.start(fixture.now);
        fixture.settle();
        fixture
    }

    /// Completes disk jobs until none are left, including the ones
    /// submitted while handling completions.
    pub fn settle(&mut self) {
        while let Some(completion) = self.services.disk.complete_next() {
            self.torrent.on_disk_completion(completion, self.now);
        }
    }

    /// Advances the clock and runs one tick.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.torrent.tick(self.now);
    }

    pub fn drain_alerts(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            alerts.push(alert);
        }
        alerts
    }

    /// Attaches an incoming connection from `remote`.
    pub fn attach(&mut self, id: u64, remote: SocketAddr) -> ConnectionMonitor {
        let connection = MockConnection::new(ConnectionId(id), remote);
        let monitor = connection.monitor();
        self.torrent
            .attach_peer(Box::new(connection), self.now)
            .expect("incoming peer accepted");
        monitor
    }
}

pub fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddr {
    SocketAddr::from(([a, b, c, d], port))
}

/// Configuration with a fixed random seed and default limits.
pub fn seeded_config() -> EddyConfig {
    let mut config = EddyConfig::for_testing();
    config.swarm.max_peerlist_size = 4000;
    config
}
