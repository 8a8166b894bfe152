use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::download::persist;
use crate::infohash::InfoHash;
use crate::peer::message::generate_peer_id;
use crate::peer::session::{self, SessionError};

/// What a download retired with. Exactly one is ever reported per infohash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Success,
    Timeout,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drain `peer_rx` with up to `concurrency` peer sessions in flight, bounded
/// by `deadline`. Reports exactly one of `Success`/`Timeout` on `event_tx`,
/// never only `Timeout` on the happy path.
pub fn spawn(
    info_hash: InfoHash,
    peer_rx: Receiver<SocketAddr>,
    output_folder: PathBuf,
    concurrency: usize,
    deadline: Duration,
    event_tx: Sender<(InfoHash, Event)>,
) {
    thread::spawn(move || {
        let outcome = run(info_hash, peer_rx, &output_folder, concurrency, deadline);
        let _ = event_tx.send((info_hash, outcome));
    });
}

fn run(
    info_hash: InfoHash,
    peer_rx: Receiver<SocketAddr>,
    output_folder: &Path,
    concurrency: usize,
    deadline: Duration,
) -> Event {
    run_with_session(
        info_hash,
        peer_rx,
        output_folder,
        concurrency,
        deadline,
        session::fetch_metadata,
    )
}

/// Same as `run`, but the per-peer session is pluggable so tests can stand in
/// a fake peer-session factory instead of dialing real sockets.
fn run_with_session<F>(
    info_hash: InfoHash,
    peer_rx: Receiver<SocketAddr>,
    output_folder: &Path,
    concurrency: usize,
    deadline: Duration,
    session_fn: F,
) -> Event
where
    F: Fn(SocketAddr, InfoHash, [u8; 20]) -> Result<Vec<u8>, SessionError> + Send + Sync + 'static,
{
    let peer_id = generate_peer_id();
    let deadline_at = Instant::now() + deadline;
    let succeeded = Arc::new(AtomicBool::new(false));
    let metadata: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let session_fn = Arc::new(session_fn);

    let handles: Vec<_> = (0..concurrency.max(1))
        .map(|_| {
            let peer_rx = peer_rx.clone();
            let succeeded = Arc::clone(&succeeded);
            let metadata = Arc::clone(&metadata);
            let session_fn = Arc::clone(&session_fn);
            thread::spawn(move || {
                attempt_peers(
                    info_hash,
                    peer_id,
                    peer_rx,
                    deadline_at,
                    &succeeded,
                    &metadata,
                    session_fn.as_ref(),
                )
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }

    match metadata.lock().unwrap().take() {
        Some(bytes) => {
            if let Err(err) = persist::save_metainfo(output_folder, info_hash, &bytes) {
                warn!("{}: failed to persist metadata: {}", info_hash, err);
            } else {
                info!("{}: metadata saved", info_hash);
            }
            Event::Success
        }
        None => Event::Timeout,
    }
}

fn attempt_peers<F>(
    info_hash: InfoHash,
    peer_id: [u8; 20],
    peer_rx: Receiver<SocketAddr>,
    deadline_at: Instant,
    succeeded: &AtomicBool,
    metadata: &Mutex<Option<Vec<u8>>>,
    session_fn: &F,
) where
    F: Fn(SocketAddr, InfoHash, [u8; 20]) -> Result<Vec<u8>, SessionError>,
{
    while !succeeded.load(Ordering::SeqCst) {
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let peer = match peer_rx.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(peer) => peer,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if peer.port() == 1 {
            debug!("{}: skipping obviously bogus peer {}", info_hash, peer);
            continue;
        }

        match session_fn(peer, info_hash, peer_id) {
            Ok(bytes) => {
                succeeded.store(true, Ordering::SeqCst);
                *metadata.lock().unwrap() = Some(bytes);
                break;
            }
            Err(err) => debug!("{}: peer {} failed: {}", info_hash, peer, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    fn test_info_hash() -> InfoHash {
        InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap()
    }

    #[test]
    fn reports_success_and_persists_when_a_session_returns_metadata() {
        let info_hash = test_info_hash();
        let (peer_tx, peer_rx) = channel::unbounded();
        peer_tx.send("127.0.0.1:6881".parse().unwrap()).unwrap();
        drop(peer_tx);

        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with_session(
            info_hash,
            peer_rx,
            dir.path(),
            4,
            Duration::from_secs(5),
            |_peer, _info_hash, _peer_id| Ok(b"d6:lengthi10ee".to_vec()),
        );

        assert_eq!(outcome, Event::Success);
        let written =
            std::fs::read(dir.path().join(format!("{}.torrent", info_hash.to_hex()))).unwrap();
        assert_eq!(written, b"d4:infod6:lengthi10eee".to_vec());
    }

    #[test]
    fn reports_timeout_when_every_session_fails() {
        let info_hash = test_info_hash();
        let (peer_tx, peer_rx) = channel::unbounded();
        peer_tx.send("127.0.0.1:6881".parse().unwrap()).unwrap();
        drop(peer_tx);

        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with_session(
            info_hash,
            peer_rx,
            dir.path(),
            4,
            Duration::from_secs(5),
            |_peer, _info_hash, _peer_id| Err(SessionError::BadHash),
        );

        assert_eq!(outcome, Event::Timeout);
        assert!(!dir
            .path()
            .join(format!("{}.torrent", info_hash.to_hex()))
            .exists());
    }

    #[test]
    fn reports_timeout_when_peer_buffer_closes_with_no_peers() {
        let info_hash = test_info_hash();
        let (peer_tx, peer_rx) = channel::unbounded::<SocketAddr>();
        drop(peer_tx);

        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with_session(
            info_hash,
            peer_rx,
            dir.path(),
            4,
            Duration::from_secs(5),
            |_peer, _info_hash, _peer_id| Ok(b"unreachable".to_vec()),
        );

        assert_eq!(outcome, Event::Timeout);
    }

    #[test]
    fn skips_bogus_port_one_peer_without_invoking_session() {
        let info_hash = test_info_hash();
        let (peer_tx, peer_rx) = channel::unbounded();
        peer_tx.send("127.0.0.1:1".parse().unwrap()).unwrap();
        drop(peer_tx);

        let dir = tempfile::tempdir().unwrap();
        let outcome = run_with_session(
            info_hash,
            peer_rx,
            dir.path(),
            1,
            Duration::from_millis(200),
            |_peer, _info_hash, _peer_id| panic!("bogus peer must never reach the session"),
        );

        assert_eq!(outcome, Event::Timeout);
    }
}
