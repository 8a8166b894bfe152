use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, trace, warn};

use crate::{
    bencode::BencodedValue, bterror, bytes, bytes::Bytes, bytes::PullBytes, dict, error::BitTorrentError,
    infohash::InfoHash, list,
};

/// Well-known, long-lived DHT bootstrap nodes. This client has no persistent
/// routing table of its own, so every lookup walks outward from these.
const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "router.utorrent.com:6881",
    "dht.transmissionbt.com:6881",
];

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HOPS_PER_LOOKUP: usize = 8;
const RESULTS_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct Node {
    id: Option<[u8; 20]>,
    address: SocketAddr,
}

/// A minimal Kademlia-style KRPC client: bootstraps from a fixed node list and
/// walks `get_peers` against the closest known nodes, rather than maintaining
/// a persistent routing table per BEP-5.
pub struct Dht {
    node_id: [u8; 20],
    request_tx: Sender<InfoHash>,
    request_rx: Receiver<InfoHash>,
    results_tx: Sender<HashMap<InfoHash, Vec<SocketAddr>>>,
    results_rx: Receiver<HashMap<InfoHash, Vec<SocketAddr>>>,
}

impl Dht {
    pub fn new() -> Self {
        let (request_tx, request_rx) = channel::unbounded();
        let (results_tx, results_rx) = channel::bounded(RESULTS_BUFFER);
        Dht {
            node_id: rand::random(),
            request_tx,
            request_rx,
            results_tx,
            results_rx,
        }
    }

    /// Spawn the background UDP worker thread. Cheap to call once; `self` stays usable.
    pub fn run(&self) {
        let node_id = self.node_id;
        let request_rx = self.request_rx.clone();
        let results_tx = self.results_tx.clone();
        thread::spawn(move || dht_worker(node_id, request_rx, results_tx));
    }

    /// Fire-and-forget: queue a `get_peers` lookup for `info_hash`.
    pub fn request_peers(&self, info_hash: InfoHash) {
        if self.request_tx.send(info_hash).is_err() {
            warn!("dht worker has shut down, dropping request for {}", info_hash);
        }
    }

    /// A fresh handle to the results stream; batches of newly discovered peers per infohash.
    pub fn results(&self) -> Receiver<HashMap<InfoHash, Vec<SocketAddr>>> {
        self.results_rx.clone()
    }
}

impl Default for Dht {
    fn default() -> Self {
        Self::new()
    }
}

fn dht_worker(
    node_id: [u8; 20],
    request_rx: Receiver<InfoHash>,
    results_tx: Sender<HashMap<InfoHash, Vec<SocketAddr>>>,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(err) => {
            warn!("dht: failed to bind udp socket: {}", err);
            return;
        }
    };
    if let Err(err) = socket.set_read_timeout(Some(QUERY_TIMEOUT)) {
        warn!("dht: failed to set read timeout: {}", err);
        return;
    }

    let bootstrap: Vec<SocketAddr> = BOOTSTRAP_NODES
        .iter()
        .filter_map(|host| host.to_socket_addrs().ok().and_then(|mut it| it.next()))
        .collect();
    if bootstrap.is_empty() {
        warn!("dht: no bootstrap nodes resolved, lookups will find nothing");
    }

    for info_hash in request_rx.iter() {
        let peers = get_peers(&socket, node_id, &bootstrap, info_hash);
        if peers.is_empty() {
            debug!("dht: lookup for {} found no peers", info_hash);
            continue;
        }
        let batch = HashMap::from([(info_hash, peers)]);
        if results_tx.send(batch).is_err() {
            break;
        }
    }
}

/// Walk outward from the bootstrap nodes, following `nodes` replies toward the
/// target and collecting `values` replies, up to a bounded number of hops.
fn get_peers(
    socket: &UdpSocket,
    node_id: [u8; 20],
    bootstrap: &[SocketAddr],
    info_hash: InfoHash,
) -> Vec<SocketAddr> {
    let mut queue: VecDeque<SocketAddr> = bootstrap.iter().copied().collect();
    let mut visited = HashSet::new();
    let mut peers = Vec::new();
    let mut hops = 0;

    while let Some(addr) = queue.pop_front() {
        if hops >= MAX_HOPS_PER_LOOKUP {
            break;
        }
        if !visited.insert(addr) {
            continue;
        }
        hops += 1;

        match exchange_get_peers(socket, addr, node_id, info_hash) {
            Ok(GetPeersReturnData::Peers(found)) => peers.extend(found),
            Ok(GetPeersReturnData::Nodes(nodes)) => {
                queue.extend(nodes.into_iter().map(|node| node.address));
            }
            Err(err) => trace!("dht: node {} did not answer get_peers: {}", addr, err),
        }
    }
    peers
}

fn exchange_get_peers(
    socket: &UdpSocket,
    addr: SocketAddr,
    node_id: [u8; 20],
    info_hash: InfoHash,
) -> Result<GetPeersReturnData, BitTorrentError> {
    let transaction_id = Bytes(rand::random::<[u8; 2]>().to_vec());
    let query = KrpcMessage {
        transaction_id: transaction_id.clone(),
        dht_message: DhtMessage::Query(Query::GetPeers {
            id: Bytes(node_id.to_vec()),
            info_hash: *info_hash.as_bytes(),
        }),
    };
    let encoded = BencodedValue::from(query).encode()?;
    socket.send_to(&encoded, addr)?;

    let mut buf = [0u8; 2048];
    let (len, from) = socket.recv_from(&mut buf)?;
    if from != addr {
        return Err(bterror!("dht: response from unexpected address {}", from));
    }
    let response = <Result<KrpcMessage, _>>::from(BencodedValue::ingest(&mut &buf[..len])?)?;
    if response.transaction_id != transaction_id {
        return Err(bterror!("dht: transaction id mismatch"));
    }
    match response.dht_message {
        DhtMessage::Response(Response::GetPeers { response, .. }) => Ok(response),
        DhtMessage::Error(code, message) => {
            Err(bterror!("dht: node returned error {}: {}", code, message))
        }
        _ => Err(bterror!("dht: unexpected response to get_peers")),
    }
}

#[derive(Debug, Clone)]
struct KrpcMessage {
    transaction_id: Bytes,
    dht_message: DhtMessage,
}

#[derive(Debug, Clone)]
enum DhtMessage {
    Query(Query),
    Response(Response),
    Error(usize, String),
}

#[derive(Debug, Clone)]
enum Query {
    GetPeers { id: Bytes, info_hash: [u8; 20] },
}

#[derive(Debug, Clone)]
enum Response {
    GetPeers {
        id: Bytes,
        response: GetPeersReturnData,
    },
}

#[derive(Debug, Clone)]
enum GetPeersReturnData {
    Nodes(Vec<Node>),
    Peers(Vec<SocketAddr>),
}

fn decode_compact_peers(raw: &Bytes) -> Vec<SocketAddr> {
    raw.chunks_exact(6)
        .filter_map(|chunk| Result::<SocketAddr, BitTorrentError>::from(Bytes(chunk.to_vec())).ok())
        .collect()
}

fn encode_compact_peers(peers: &[SocketAddr]) -> Bytes {
    peers
        .iter()
        .flat_map(|addr| Bytes::from(*addr).into_inner())
        .collect()
}

fn decode_compact_nodes(raw: &Bytes) -> Vec<Node> {
    raw.chunks_exact(26)
        .filter_map(|chunk| {
            let id: [u8; 20] = chunk[0..20].try_into().ok()?;
            let address = Result::<SocketAddr, BitTorrentError>::from(Bytes(chunk[20..26].to_vec())).ok()?;
            Some(Node {
                id: Some(id),
                address,
            })
        })
        .collect()
}

fn encode_compact_nodes(nodes: &[Node]) -> Bytes {
    nodes
        .iter()
        .flat_map(|node| {
            node.id
                .unwrap_or([0u8; 20])
                .into_iter()
                .chain(Bytes::from(node.address).into_inner())
        })
        .collect()
}

impl From<KrpcMessage> for BencodedValue {
    fn from(value: KrpcMessage) -> Self {
        match value.dht_message {
            DhtMessage::Query(Query::GetPeers { id, info_hash }) => dict! {
                b"t" => value.transaction_id,
                b"y" => bytes!(b"q"),
                b"q" => bytes!(b"get_peers"),
                b"a" => dict! {
                    b"id" => id,
                    b"info_hash" => Bytes(info_hash.to_vec()),
                },
            },
            DhtMessage::Response(Response::GetPeers { id, response }) => dict! {
                b"t" => value.transaction_id,
                b"y" => bytes!(b"r"),
                b"r" => match response {
                    GetPeersReturnData::Nodes(nodes) => dict! {
                        b"id" => id,
                        b"nodes" => encode_compact_nodes(&nodes),
                    },
                    GetPeersReturnData::Peers(peers) => dict! {
                        b"id" => id,
                        b"values" => encode_compact_peers(&peers),
                    },
                },
            },
            DhtMessage::Error(code, message) => dict! {
                b"t" => value.transaction_id,
                b"y" => bytes!(b"e"),
                b"e" => list! { code as crate::bencode::Number, Bytes::from(message) },
            },
        }
    }
}

impl From<BencodedValue> for Result<KrpcMessage, BitTorrentError> {
    fn from(value: BencodedValue) -> Self {
        let mut message = value
            .into_dict()
            .ok_or_else(|| bterror!("Invalid KRPC message: not a dict"))?;
        let transaction_id = message
            .pull(b"t")
            .and_then(BencodedValue::into_bytes)
            .ok_or_else(|| bterror!("Invalid KRPC message: missing transaction id"))?;
        let message_type = message
            .pull(b"y")
            .and_then(BencodedValue::into_bytes)
            .ok_or_else(|| bterror!("Invalid KRPC message: missing message type"))?;

        let dht_message = match &message_type[..] {
            b"r" => {
                let mut response = message
                    .pull(b"r")
                    .and_then(BencodedValue::into_dict)
                    .ok_or_else(|| bterror!("Invalid KRPC message: missing response body"))?;
                let id = response
                    .pull(b"id")
                    .and_then(BencodedValue::into_bytes)
                    .ok_or_else(|| bterror!("Invalid KRPC message: missing id"))?;
                let nodes = response
                    .pull(b"nodes")
                    .and_then(BencodedValue::into_bytes)
                    .map(|raw| decode_compact_nodes(&raw));
                let values = response.pull(b"values").and_then(BencodedValue::into_list).map(
                    |list| {
                        list.into_iter()
                            .filter_map(BencodedValue::into_bytes)
                            .filter_map(|b| Result::<SocketAddr, BitTorrentError>::from(b).ok())
                            .collect::<Vec<_>>()
                    },
                );
                let response = match (nodes, values) {
                    (_, Some(peers)) if !peers.is_empty() => GetPeersReturnData::Peers(peers),
                    (Some(nodes), _) => GetPeersReturnData::Nodes(nodes),
                    _ => GetPeersReturnData::Peers(Vec::new()),
                };
                DhtMessage::Response(Response::GetPeers { id, response })
            }
            b"e" => {
                let mut error = message
                    .pull(b"e")
                    .and_then(BencodedValue::into_list)
                    .ok_or_else(|| bterror!("Invalid KRPC message: missing error body"))?;
                let error_message = error
                    .pop()
                    .and_then(BencodedValue::into_bytes)
                    .map(Bytes::into_string)
                    .ok_or_else(|| bterror!("Invalid KRPC message: missing error message"))?;
                let error_code = error
                    .pop()
                    .and_then(BencodedValue::into_int)
                    .ok_or_else(|| bterror!("Invalid KRPC message: missing error code"))?
                    as usize;
                DhtMessage::Error(error_code, error_message)
            }
            other => {
                return Err(bterror!(
                    "Invalid KRPC message: unsupported message type {:?}",
                    String::from_utf8_lossy(other)
                ))
            }
        };

        Ok(KrpcMessage {
            transaction_id,
            dht_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_peer_round_trips() {
        let peers = vec![
            "127.0.0.1:6881".parse().unwrap(),
            "10.0.0.5:51413".parse().unwrap(),
        ];
        let encoded = encode_compact_peers(&peers);
        let decoded = decode_compact_peers(&encoded);
        assert_eq!(decoded, peers);
    }

    #[test]
    fn compact_node_round_trips() {
        let nodes = vec![Node {
            id: Some([7u8; 20]),
            address: "127.0.0.1:6881".parse().unwrap(),
        }];
        let encoded = encode_compact_nodes(&nodes);
        let decoded = decode_compact_nodes(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, nodes[0].id);
        assert_eq!(decoded[0].address, nodes[0].address);
    }

    #[test]
    fn get_peers_query_round_trips_through_bencoding() {
        let info_hash = InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap();
        let message = KrpcMessage {
            transaction_id: Bytes(vec![1, 2]),
            dht_message: DhtMessage::Query(Query::GetPeers {
                id: Bytes(vec![9u8; 20]),
                info_hash: *info_hash.as_bytes(),
            }),
        };
        let encoded = BencodedValue::from(message).encode().unwrap();
        let decoded = BencodedValue::ingest(&mut &encoded[..]).unwrap();
        assert!(matches!(decoded, BencodedValue::Dict(_)));
    }
}
