//! Actor task that owns the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::commands::SessionCommand;
use super::events::EventReceiver;
use super::handle::SessionHandle;
use super::session::Session;
use crate::config::EddyConfig;
use crate::torrent::alerts::{Alert, AlertSink};
use crate::torrent::controller::Collaborators;
use crate::torrent::resume_store::ResumeStore;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the session actor and returns its handle.
///
/// Torrents post alerts to the actor first; it persists `SaveResumeData`
/// blobs to `resume_store` and then forwards every alert to
/// `collab.alerts`. Transports report back through the sender paired with
/// `events`.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use eddy_core::config::EddyConfig;
/// use eddy_core::engine::{EventSender, MockServices, spawn_session};
/// use eddy_core::torrent::AlertSink;
///
/// let (events, receiver) = EventSender::channel();
/// let (alerts, _alert_rx) = AlertSink::channel();
/// let services = MockServices::auto(events);
/// let handle = spawn_session(EddyConfig::default(), services.collaborators(alerts), receiver, None);
/// handle.shutdown().await.unwrap();
/// # }
/// ```
pub fn spawn_session(
    config: EddyConfig,
    mut collab: Collaborators,
    events: EventReceiver,
    resume_store: Option<Arc<dyn ResumeStore>>,
) -> SessionHandle {
    let (sender, receiver) = mpsc::channel(100);
    let (internal, alerts) = AlertSink::channel();
    let user_alerts = std::mem::replace(&mut collab.alerts, internal);
    let actor = SessionActor {
        session: Session::new(config, collab),
        user_alerts,
        resume_store,
    };

    tokio::spawn(async move {
        run_actor_loop(actor, receiver, events, alerts).await;
    });

    SessionHandle::new(sender)
}

struct SessionActor {
    session: Session,
    user_alerts: AlertSink,
    resume_store: Option<Arc<dyn ResumeStore>>,
}

/// Current time on tokio's clock, so paused-time tests drive torrents too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn run_actor_loop(
    mut actor: SessionActor,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut events: EventReceiver,
    mut alerts: mpsc::UnboundedReceiver<Alert>,
) {
    tracing::debug!("Session actor started");
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                if !actor.handle_command(command).await {
                    break;
                }
            }
            Some(event) = events.recv() => actor.session.handle_event(event, now()),
            Some(alert) = alerts.recv() => actor.forward_alert(alert).await,
            _ = ticker.tick() => actor.session.tick(now()),
        }
    }

    while let Ok(alert) = alerts.try_recv() {
        actor.forward_alert(alert).await;
    }
    tracing::debug!("Session actor stopped");
}

impl SessionActor {
    async fn forward_alert(&mut self, alert: Alert) {
        if let (Alert::SaveResumeData { info_hash, resume }, Some(store)) = (&alert, &self.resume_store) {
            if let Err(e) = store.save(*info_hash, resume).await {
                tracing::warn!(%info_hash, error = %e, "Failed to persist resume data");
            }
        }
        self.user_alerts.post(alert);
    }

    /// Handles one command. Returns false on shutdown.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        let session = &mut self.session;
        match command {
            SessionCommand::AddTorrent { mut params, responder } => {
                if params.resume_data.is_none() {
                    if let Some(store) = &self.resume_store {
                        match store.load(params.info_hash).await {
                            Ok(blob) => params.resume_data = blob,
                            Err(e) => {
                                tracing::warn!(info_hash = %params.info_hash, error = %e, "Could not load resume data");
                            }
                        }
                    }
                }
                let result = session.add_torrent(*params, now());
                let _ = responder.send(result);
            }

            SessionCommand::RemoveTorrent {
                info_hash,
                delete_files,
                responder,
            } => {
                let result = session.remove_torrent(info_hash, delete_files, now());
                if result.is_ok() {
                    if let Some(store) = &self.resume_store {
                        if let Err(e) = store.remove(info_hash).await {
                            tracing::warn!(%info_hash, error = %e, "Could not remove resume data");
                        }
                    }
                }
                let _ = responder.send(result);
            }

            SessionCommand::GetStatus { info_hash, responder } => {
                let result = session.torrent(info_hash).map(|t| t.status(now()));
                let _ = responder.send(result);
            }

            SessionCommand::ListTorrents { responder } => {
                let _ = responder.send(session.list(now()));
            }

            SessionCommand::Pause {
                info_hash,
                graceful,
                responder,
            } => {
                let _ = responder.send(session.pause_torrent(info_hash, graceful, now()));
            }

            SessionCommand::Resume { info_hash, responder } => {
                let _ = responder.send(session.resume_torrent(info_hash, now()));
            }

            SessionCommand::ForceRecheck { info_hash, responder } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.force_recheck(now()));
                let _ = responder.send(result);
            }

            SessionCommand::SetAutoManaged {
                info_hash,
                auto_managed,
                responder,
            } => {
                let _ = responder.send(session.set_auto_managed(info_hash, auto_managed, now()));
            }

            SessionCommand::SetFilePriority {
                info_hash,
                file,
                priority,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.set_file_priority(file, priority, now()));
                let _ = responder.send(result);
            }

            SessionCommand::SetPieceDeadline {
                info_hash,
                piece,
                deadline,
                alert_when_available,
                responder,
            } => {
                let now = now();
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.set_piece_deadline(piece, now + deadline, alert_when_available, now));
                let _ = responder.send(result);
            }

            SessionCommand::ResetPieceDeadline {
                info_hash,
                piece,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .map(|t| t.reset_piece_deadline(piece, now()));
                let _ = responder.send(result);
            }

            SessionCommand::AddTracker {
                info_hash,
                url,
                tier,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.add_tracker(&url, tier, now()));
                let _ = responder.send(result);
            }

            SessionCommand::ForceReannounce {
                info_hash,
                after,
                url,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .map(|t| t.force_reannounce(after, url.as_deref(), now()));
                let _ = responder.send(result);
            }

            SessionCommand::ConnectPeer {
                info_hash,
                peer,
                responder,
            } => {
                let _ = responder.send(session.add_peer(info_hash, peer, now()));
            }

            SessionCommand::AttachPeer {
                info_hash,
                connection,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.attach_peer(connection, now()));
                let _ = responder.send(result);
            }

            SessionCommand::SetMetadata {
                info_hash,
                info,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.set_metadata(info, now()));
                let _ = responder.send(result);
            }

            SessionCommand::RenameFile {
                info_hash,
                file,
                name,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.rename_file(file, name));
                let _ = responder.send(result);
            }

            SessionCommand::MoveStorage {
                info_hash,
                path,
                responder,
            } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.move_storage(path));
                let _ = responder.send(result);
            }

            SessionCommand::SaveResumeData { info_hash, responder } => {
                let result = session
                    .torrent_mut(info_hash)
                    .and_then(|t| t.save_resume_data());
                let _ = responder.send(result);
            }

            SessionCommand::Shutdown { responder } => {
                tracing::info!(torrents = session.len(), "Shutting down session");
                session.abort_all(now());
                let _ = responder.send(());
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::engine::events::EventSender;
    use crate::engine::test_mocks::{MockConnection, MockServices, TestTorrent};
    use crate::torrent::connection::ConnectionId;
    use crate::torrent::controller::AddTorrentParams;
    use crate::torrent::resume_store::MemoryResumeStore;
    use crate::torrent::{InfoHash, TorrentError, TorrentState};

    struct Fixture {
        handle: SessionHandle,
        services: MockServices,
        alerts: mpsc::UnboundedReceiver<Alert>,
    }

    fn fixture(store: Option<Arc<dyn ResumeStore>>) -> Fixture {
        let (events, receiver) = EventSender::channel();
        let services = MockServices::auto(events);
        let (sink, alerts) = AlertSink::channel();
        let handle = spawn_session(
            EddyConfig::for_testing(),
            services.collaborators(sink),
            receiver,
            store,
        );
        Fixture {
            handle,
            services,
            alerts,
        }
    }

    async fn wait_for_state(handle: &SessionHandle, info_hash: InfoHash, state: TorrentState) {
        for _ in 0..50 {
            if handle.status(info_hash).await.unwrap().state == state {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("torrent never reached {state}");
    }

    #[tokio::test]
    async fn test_add_torrent_checks_and_starts() {
        let fx = fixture(None);
        let torrent = TestTorrent::new(4, 16 * 1024);
        let params = AddTorrentParams::new(torrent.info_hash)
            .with_layout(torrent.layout.clone())
            .with_trackers(vec![vec!["http://tracker.example.com/announce".to_string()]]);

        let info_hash = fx.handle.add_torrent(params).await.unwrap();
        wait_for_state(&fx.handle, info_hash, TorrentState::Downloading).await;

        let list = fx.handle.list_torrents().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].num_pieces, 4);
        assert!(!fx.services.tracker.requests().is_empty());

        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_torrent_errors() {
        let fx = fixture(None);
        let missing = InfoHash::new([9; 20]);

        assert!(matches!(
            fx.handle.status(missing).await,
            Err(TorrentError::TorrentNotFound { .. })
        ));
        assert!(matches!(
            fx.handle.pause(missing, false).await,
            Err(TorrentError::TorrentNotFound { .. })
        ));
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_incoming_peer() {
        let fx = fixture(None);
        let torrent = TestTorrent::new(2, 16 * 1024);
        let info_hash = fx
            .handle
            .add_torrent(AddTorrentParams::new(torrent.info_hash).with_layout(torrent.layout.clone()))
            .await
            .unwrap();
        wait_for_state(&fx.handle, info_hash, TorrentState::Downloading).await;

        let remote: SocketAddr = "10.1.2.3:51413".parse().unwrap();
        let connection = MockConnection::new(ConnectionId(1), remote);
        let id = fx
            .handle
            .attach_peer(info_hash, Box::new(connection))
            .await
            .unwrap();
        assert_eq!(id, ConnectionId(1));

        let status = fx.handle.status(info_hash).await.unwrap();
        assert_eq!(status.num_connections, 1);
        assert_eq!(status.list_peers, 1);

        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_data_is_persisted() {
        let store = Arc::new(MemoryResumeStore::new());
        let mut fx = fixture(Some(store.clone()));
        let torrent = TestTorrent::new(2, 16 * 1024);
        let info_hash = fx
            .handle
            .add_torrent(AddTorrentParams::new(torrent.info_hash).with_layout(torrent.layout.clone()))
            .await
            .unwrap();
        wait_for_state(&fx.handle, info_hash, TorrentState::Downloading).await;

        fx.handle.save_resume_data(info_hash).await.unwrap();
        loop {
            match fx.alerts.recv().await {
                Some(Alert::SaveResumeData { .. }) => break,
                Some(_) => continue,
                None => panic!("alert channel closed"),
            }
        }
        assert!(store.load(info_hash).await.unwrap().is_some());

        fx.handle.remove_torrent(info_hash, false).await.unwrap();
        assert!(store.load(info_hash).await.unwrap().is_none());
        fx.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let fx = fixture(None);
        fx.handle.shutdown().await.unwrap();

        let result = fx.handle.list_torrents().await;
        assert!(matches!(result, Err(TorrentError::EngineShutdown)));
        assert!(!fx.handle.is_running());
    }
}
