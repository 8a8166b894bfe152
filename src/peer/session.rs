use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::trace;

use crate::error::BitTorrentError;
use crate::infohash::InfoHash;
use crate::peer::message::{
    self, encode_extension_handshake, encode_metadata_request, ExtensionHandshake, Frame,
    HandshakeMessage, MetadataMessage, PeerMessage, EXTENDED_HANDSHAKE_ID,
};
use crate::util::sha1_hash;

const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);
const FRAME_WAIT: Duration = Duration::from_secs(60);
const METADATA_PIECE_LEN: usize = 16384;
const MAX_METADATA_SIZE: i64 = 2 * 1024 * 1024;

/// Every way a peer session can fail. All of these are isolated to the one
/// session; the caller moves on to the next peer.
#[derive(Debug)]
pub enum SessionError {
    Connect(String),
    Handshake(String),
    Framing(String),
    Timeout(String),
    Rejected,
    Unsupported,
    BadHash,
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Connect(msg) => write!(f, "connect failed: {msg}"),
            SessionError::Handshake(msg) => write!(f, "handshake failed: {msg}"),
            SessionError::Framing(msg) => write!(f, "framing error: {msg}"),
            SessionError::Timeout(msg) => write!(f, "timed out: {msg}"),
            SessionError::Rejected => write!(f, "peer rejected metadata request"),
            SessionError::Unsupported => write!(f, "peer requested metadata from us"),
            SessionError::BadHash => write!(f, "assembled metadata hash mismatch"),
        }
    }
}

impl Error for SessionError {}

impl From<BitTorrentError> for SessionError {
    fn from(value: BitTorrentError) -> Self {
        SessionError::Framing(value.to_string())
    }
}

/// Drive one peer to completion: CONNECT -> HEADER -> EXT_WAIT -> PIECES -> VERIFY -> DONE/ERR.
/// Returns the verified metadata bytes, or the first error encountered.
pub fn fetch_metadata(
    peer: SocketAddr,
    info_hash: InfoHash,
    peer_id: [u8; 20],
) -> Result<Vec<u8>, SessionError> {
    // CONNECT
    let mut stream = TcpStream::connect_timeout(&peer, CONNECT_DEADLINE)
        .with_context(|| "Error connecting to peer")
        .map_err(|err| SessionError::Connect(err.to_string()))?;

    // HEADER
    stream
        .set_write_timeout(Some(HANDSHAKE_DEADLINE))
        .map_err(|err| SessionError::Handshake(err.to_string()))?;
    stream
        .set_read_timeout(Some(HANDSHAKE_DEADLINE))
        .map_err(|err| SessionError::Handshake(err.to_string()))?;

    let local_handshake = HandshakeMessage::new(info_hash, peer_id);
    std::io::Write::write_all(&mut stream, &local_handshake.encode())
        .map_err(|err| SessionError::Handshake(err.to_string()))?;

    let mut header = [0u8; message::HANDSHAKE_LEN];
    std::io::Read::read_exact(&mut stream, &mut header)
        .map_err(|err| SessionError::Handshake(err.to_string()))?;
    let their_handshake =
        HandshakeMessage::decode(&header).map_err(|err| SessionError::Handshake(err.to_string()))?;

    if their_handshake.info_hash != info_hash {
        return Err(SessionError::Handshake("infohash does not match".into()));
    }
    if !their_handshake.extensions {
        return Err(SessionError::Handshake(
            "peer does not advertise BEP-10 extensions".into(),
        ));
    }

    run_session(stream, info_hash)
}

/// Reader and writer OS threads feed/drain the session's driving thread over
/// channels, matching the teacher's thread-per-direction idiom rather than an
/// async runtime the rest of the binary does not use.
fn run_session(stream: TcpStream, info_hash: InfoHash) -> Result<Vec<u8>, SessionError> {
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>();
    let mut reader_stream = stream
        .try_clone()
        .map_err(|err| SessionError::Connect(err.to_string()))?;
    let reader = thread::spawn(move || loop {
        match message::read_frame(&mut reader_stream) {
            Ok(frame) => {
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
            Err(err) => {
                trace!("peer session reader stopped: {}", err);
                break;
            }
        }
    });

    let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>();
    let mut writer_stream = stream
        .try_clone()
        .map_err(|err| SessionError::Connect(err.to_string()))?;
    let writer = thread::spawn(move || {
        for payload in write_rx {
            if let Err(err) = message::write_frame(&mut writer_stream, &payload) {
                trace!("peer session writer stopped: {}", err);
                break;
            }
        }
    });

    let result = drive(&frame_rx, &write_tx, info_hash);

    drop(write_tx);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    let _ = reader.join();
    let _ = writer.join();

    result
}

enum Recv {
    Frame(Frame),
    Timeout,
    Closed,
}

fn recv_frame(frame_rx: &mpsc::Receiver<Frame>) -> Recv {
    match frame_rx.recv_timeout(FRAME_WAIT) {
        Ok(frame) => Recv::Frame(frame),
        Err(RecvTimeoutError::Timeout) => Recv::Timeout,
        Err(RecvTimeoutError::Disconnected) => Recv::Closed,
    }
}

fn drive(
    frame_rx: &mpsc::Receiver<Frame>,
    write_tx: &mpsc::Sender<Vec<u8>>,
    info_hash: InfoHash,
) -> Result<Vec<u8>, SessionError> {
    // EXT_WAIT
    let handshake_payload = encode_extension_handshake(&ExtensionHandshake::local())?;
    write_tx
        .send(handshake_payload)
        .map_err(|_| SessionError::Handshake("writer already closed".into()))?;

    let (peer_ut_metadata_id, metadata_size) = loop {
        match recv_frame(frame_rx) {
            Recv::Frame(frame) => {
                if let PeerMessage::Extension {
                    ext_id: EXTENDED_HANDSHAKE_ID,
                    body,
                } = PeerMessage::decode(frame)
                {
                    let handshake = ExtensionHandshake::decode(&body)?;
                    let ut_metadata_id = handshake
                        .ut_metadata_id()
                        .ok_or_else(|| SessionError::Handshake("peer missing ut_metadata".into()))?;
                    let size = handshake.metadata_size.ok_or_else(|| {
                        SessionError::Handshake("peer missing metadata_size".into())
                    })?;
                    if size <= 0 || size > MAX_METADATA_SIZE {
                        return Err(SessionError::Handshake(format!(
                            "metadata_size {} out of bounds",
                            size
                        )));
                    }
                    break (ut_metadata_id as u8, size as usize);
                }
                // anything besides the extension handshake is ignored while waiting
            }
            Recv::Timeout => return Err(SessionError::Timeout("extension handshake".into())),
            Recv::Closed => {
                return Err(SessionError::Framing(
                    "connection closed before extension handshake".into(),
                ))
            }
        }
    };

    // PIECES
    let total_pieces = (metadata_size + METADATA_PIECE_LEN - 1) / METADATA_PIECE_LEN;
    let last_index = (total_pieces.max(1) - 1) as i64;
    let mut buffer = Vec::with_capacity(metadata_size);
    let mut expected: i64 = 0;

    while (expected as usize) < total_pieces {
        let request = encode_metadata_request(expected as u32, peer_ut_metadata_id)?;
        write_tx
            .send(request)
            .map_err(|_| SessionError::Framing("writer already closed".into()))?;

        loop {
            match recv_frame(frame_rx) {
                Recv::Frame(frame) => match PeerMessage::decode(frame) {
                    PeerMessage::Extension { ext_id, body } if ext_id == message::LOCAL_UT_METADATA_ID => {
                        match MetadataMessage::decode(&body)? {
                            MetadataMessage::Data { piece, payload } => {
                                if piece != expected {
                                    return Err(SessionError::Framing(format!(
                                        "unexpected piece index {} (wanted {})",
                                        piece, expected
                                    )));
                                }
                                let is_last = expected == last_index;
                                if payload.len() > METADATA_PIECE_LEN
                                    || (payload.len() != METADATA_PIECE_LEN && !is_last)
                                {
                                    return Err(SessionError::Framing(format!(
                                        "invalid piece length {}",
                                        payload.len()
                                    )));
                                }
                                buffer.extend_from_slice(&payload);
                                expected += 1;
                                break;
                            }
                            MetadataMessage::Reject { .. } => return Err(SessionError::Rejected),
                            MetadataMessage::Request { .. } => return Err(SessionError::Unsupported),
                        }
                    }
                    _ => {} // ignore unrelated traffic, keep waiting for our piece
                },
                Recv::Timeout => {
                    return Err(SessionError::Timeout(format!("metadata piece {}", expected)))
                }
                Recv::Closed => {
                    return Err(SessionError::Framing(
                        "connection closed mid-transfer".into(),
                    ))
                }
            }
        }
    }

    if buffer.len() != metadata_size {
        return Err(SessionError::Framing(format!(
            "assembled {} bytes, expected {}",
            buffer.len(),
            metadata_size
        )));
    }

    // VERIFY
    if sha1_hash(&buffer) != *info_hash.as_bytes() {
        return Err(SessionError::BadHash);
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use crate::bencode::BencodedValue;
    use crate::dict;
    use crate::peer::message::{generate_peer_id, LOCAL_UT_METADATA_ID};

    /// Stands in for a real peer: speaks just enough of the protocol to drive
    /// `fetch_metadata` through CONNECT -> HEADER -> EXT_WAIT -> PIECES -> VERIFY.
    fn serve_one_peer(mut stream: TcpStream, info_hash: InfoHash, pieces: Vec<Vec<u8>>, total_size: usize) {
        let mut header = [0u8; message::HANDSHAKE_LEN];
        stream.read_exact(&mut header).unwrap();
        let their_handshake = HandshakeMessage::decode(&header).unwrap();
        assert_eq!(their_handshake.info_hash, info_hash);
        assert!(their_handshake.extensions);

        let reply = HandshakeMessage::new(info_hash, generate_peer_id());
        stream.write_all(&reply.encode()).unwrap();

        let frame = message::read_frame(&mut stream).unwrap();
        match PeerMessage::decode(frame) {
            PeerMessage::Extension {
                ext_id: EXTENDED_HANDSHAKE_ID,
                ..
            } => {}
            other => panic!("expected extension handshake, got {:?}", other),
        }

        const PEER_UT_METADATA_ID: i64 = 9;
        let handshake_body = dict! {
            b"m" => dict! { b"ut_metadata" => PEER_UT_METADATA_ID },
            b"metadata_size" => total_size as i64,
        }
        .encode()
        .unwrap();
        let handshake_frame: Vec<u8> = [message::EXTENDED_MESSAGE_ID, EXTENDED_HANDSHAKE_ID]
            .into_iter()
            .chain(handshake_body)
            .collect();
        message::write_frame(&mut stream, &handshake_frame).unwrap();

        for (index, piece) in pieces.into_iter().enumerate() {
            let frame = message::read_frame(&mut stream).unwrap();
            let (ext_id, body) = match PeerMessage::decode(frame) {
                PeerMessage::Extension { ext_id, body } => (ext_id, body),
                other => panic!("expected metadata request, got {:?}", other),
            };
            assert_eq!(ext_id as i64, PEER_UT_METADATA_ID);
            match MetadataMessage::decode(&body).unwrap() {
                MetadataMessage::Request { piece: requested } => {
                    assert_eq!(requested, index as i64);
                }
                other => panic!("expected request message, got {:?}", other),
            }

            let mut data_body = dict! {
                b"msg_type" => 1i64,
                b"piece" => index as i64,
                b"total_size" => total_size as i64,
            }
            .encode()
            .unwrap();
            data_body.extend_from_slice(&piece);
            let data_frame: Vec<u8> = [message::EXTENDED_MESSAGE_ID, LOCAL_UT_METADATA_ID]
                .into_iter()
                .chain(data_body)
                .collect();
            message::write_frame(&mut stream, &data_frame).unwrap();
        }
    }

    #[test]
    fn fetch_metadata_completes_full_exchange_against_loopback_peer() {
        let piece0 = vec![0xABu8; 16384];
        let piece1 = vec![0xCDu8; 100];
        let mut metadata = piece0.clone();
        metadata.extend_from_slice(&piece1);
        let total_size = metadata.len();
        let info_hash = InfoHash::from(sha1_hash(&metadata));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer_thread = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_one_peer(stream, info_hash, vec![piece0, piece1], total_size);
        });

        let result = fetch_metadata(addr, info_hash, generate_peer_id()).unwrap();
        assert_eq!(result, metadata);

        peer_thread.join().unwrap();
    }

    #[test]
    fn fetch_metadata_errors_on_infohash_mismatch() {
        let wanted = InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap();
        let other = InfoHash::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer_thread = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; message::HANDSHAKE_LEN];
            stream.read_exact(&mut header).unwrap();
            // reply advertising a different infohash than the one requested
            let reply = HandshakeMessage::new(other, generate_peer_id());
            stream.write_all(&reply.encode()).unwrap();
        });

        let err = fetch_metadata(addr, wanted, generate_peer_id()).unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));

        peer_thread.join().unwrap();
    }
}
