use std::collections::VecDeque;
use std::net::SocketAddr;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use log::trace;

/// Cap on buffered addresses before the oldest is dropped. Peer quality is not
/// monotonic in arrival order, so dropping the oldest is as good as any policy.
const MAX_BUFFERED: usize = 1024;

/// Decouples bursty DHT peer-chunk arrivals from one-at-a-time dispatch to a
/// worker. Fed by `push`, drained by whoever holds a `peers()` receiver.
pub struct PeerBuffer {
    chunk_tx: Sender<Vec<SocketAddr>>,
    peer_rx: Receiver<SocketAddr>,
}

impl PeerBuffer {
    pub fn spawn() -> PeerBuffer {
        let (chunk_tx, chunk_rx) = channel::unbounded();
        let (peer_tx, peer_rx) = channel::bounded(0);
        thread::spawn(move || buffer_loop(chunk_rx, peer_tx));
        PeerBuffer { chunk_tx, peer_rx }
    }

    /// Push one DHT burst of peer addresses into the buffer. Order of ingest
    /// is preserved end to end; duplicates are not de-duplicated here.
    pub fn push(&self, chunk: Vec<SocketAddr>) {
        let _ = self.chunk_tx.send(chunk);
    }

    /// A receiving handle a worker can drain single peers from.
    pub fn peers(&self) -> Receiver<SocketAddr> {
        self.peer_rx.clone()
    }
}

fn buffer_loop(chunk_rx: Receiver<Vec<SocketAddr>>, peer_tx: Sender<SocketAddr>) {
    let mut queue: VecDeque<SocketAddr> = VecDeque::new();
    loop {
        match queue.front().copied() {
            Some(next) => {
                channel::select! {
                    recv(chunk_rx) -> chunk => match chunk {
                        Ok(chunk) => ingest(&mut queue, chunk),
                        Err(_) => break,
                    },
                    send(peer_tx, next) -> sent => {
                        if sent.is_err() {
                            break;
                        }
                        queue.pop_front();
                    },
                }
            }
            None => match chunk_rx.recv() {
                Ok(chunk) => ingest(&mut queue, chunk),
                Err(_) => break,
            },
        }
    }
    // best-effort drain of whatever remains before the channel closes
    while let Some(peer) = queue.pop_front() {
        if peer_tx.send(peer).is_err() {
            break;
        }
    }
}

fn ingest(queue: &mut VecDeque<SocketAddr>, chunk: Vec<SocketAddr>) {
    for peer in chunk {
        if queue.len() >= MAX_BUFFERED {
            queue.pop_front();
            trace!("peer buffer at capacity, dropping oldest address");
        }
        queue.push_back(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn preserves_ingest_order() {
        let buffer = PeerBuffer::spawn();
        let peers = buffer.peers();
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        buffer.push(vec![a, b]);

        assert_eq!(peers.recv_timeout(Duration::from_secs(1)).unwrap(), a);
        assert_eq!(peers.recv_timeout(Duration::from_secs(1)).unwrap(), b);
    }

    #[test]
    fn drops_oldest_once_full() {
        let buffer = PeerBuffer::spawn();
        let peers = buffer.peers();
        let overflow: Vec<SocketAddr> = (0..MAX_BUFFERED + 10)
            .map(|i| format!("127.0.0.1:{}", (i % 60000) + 1).parse().unwrap())
            .collect();
        buffer.push(overflow.clone());

        let first = peers.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_ne!(first, overflow[0]);
    }
}
