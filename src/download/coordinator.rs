use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use log::{error, info, warn};

use crate::bterror;
use crate::download::peer_buffer::PeerBuffer;
use crate::download::worker::{self, Event};
use crate::error::BitTorrentError;
use crate::infohash::InfoHash;
use crate::tracker::dht::Dht;

pub struct Config {
    pub output_folder: PathBuf,
    pub workers: usize,
    pub download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output_folder: PathBuf::from("./tmp/"),
            workers: 8,
            download_timeout: Duration::from_secs(600),
        }
    }
}

struct Record {
    peer_buffer: PeerBuffer,
}

/// Drive every infohash in `infohashes` to completion (success or timeout) and
/// return once the active set has drained. This is the coordinator's main
/// event loop: infohash admission, DHT-result routing, download-event
/// routing. At most one download record exists per infohash at any instant.
pub fn run_downloads(infohashes: Vec<InfoHash>, config: Config) -> Result<(), BitTorrentError> {
    if infohashes.is_empty() {
        return Ok(());
    }

    let dht = Dht::new();
    dht.run();
    let dht_results = dht.results();

    let (event_tx, event_rx) = channel::unbounded::<(InfoHash, Event)>();
    let mut active: HashMap<InfoHash, Record> = HashMap::new();

    for info_hash in infohashes {
        if active.contains_key(&info_hash) {
            warn!("{}: already active, ignoring duplicate submission", info_hash);
            continue;
        }
        admit(info_hash, &dht, &config, event_tx.clone(), &mut active);
    }

    while !active.is_empty() {
        channel::select! {
            recv(dht_results) -> batch => match batch {
                Ok(batch) => route_peers(batch, &active),
                Err(_) => {
                    error!("dht result stream closed, aborting remaining downloads");
                    return Err(bterror!("dht stream closed unexpectedly"));
                }
            },
            recv(event_rx) -> event => {
                if let Ok((info_hash, outcome)) = event {
                    active.remove(&info_hash);
                    match outcome {
                        Event::Success => info!("{}: metadata verified and saved", info_hash),
                        Event::Timeout => warn!("{}: timed out with no verified peer", info_hash),
                    }
                }
            },
        }
    }

    Ok(())
}

fn admit(
    info_hash: InfoHash,
    dht: &Dht,
    config: &Config,
    event_tx: Sender<(InfoHash, Event)>,
    active: &mut HashMap<InfoHash, Record>,
) {
    let peer_buffer = PeerBuffer::spawn();
    dht.request_peers(info_hash);
    worker::spawn(
        info_hash,
        peer_buffer.peers(),
        config.output_folder.clone(),
        config.workers,
        config.download_timeout,
        event_tx,
    );
    active.insert(info_hash, Record { peer_buffer });
}

fn route_peers(batch: HashMap<InfoHash, Vec<SocketAddr>>, active: &HashMap<InfoHash, Record>) {
    for (info_hash, peers) in batch {
        if let Some(record) = active.get(&info_hash) {
            record.peer_buffer.push(peers);
        } else {
            log::trace!("{}: dropping DHT peer batch for inactive download", info_hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn routes_peers_only_to_active_downloads() {
        let info_hash = InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap();
        let inactive_hash = InfoHash::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let peer: SocketAddr = "127.0.0.1:6881".parse().unwrap();

        let mut active = HashMap::new();
        let peer_buffer = PeerBuffer::spawn();
        let peer_rx = peer_buffer.peers();
        active.insert(info_hash, Record { peer_buffer });

        let batch = HashMap::from([
            (info_hash, vec![peer]),
            (inactive_hash, vec![peer]),
        ]);
        route_peers(batch, &active);

        assert_eq!(peer_rx.recv_timeout(Duration::from_secs(1)).unwrap(), peer);
        assert!(peer_rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn run_downloads_returns_immediately_with_no_infohashes() {
        run_downloads(Vec::new(), Config::default()).unwrap();
    }
}
