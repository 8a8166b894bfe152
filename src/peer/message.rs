use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use rand::Rng;

use crate::{
    bencode::BencodedValue, bterror, bytes, bytes::Bytes, bytes::PullBytes, dict,
    error::BitTorrentError, infohash::InfoHash, util::read_n_bytes,
};

pub const HANDSHAKE_LEN: usize = 68;
const PROTOCOL_NAME: &[u8; 19] = b"BitTorrent protocol";
const EXTENSION_FLAG_BYTE: usize = 25;
const EXTENSION_FLAG_BIT: u8 = 0x10;

pub const READ_DEADLINE: Duration = Duration::from_secs(60);
pub const WRITE_DEADLINE: Duration = Duration::from_secs(30);
pub const MAX_FRAME_LEN: u32 = 130 * 1024;

pub const EXTENDED_MESSAGE_ID: u8 = 20;
pub const EXTENDED_HANDSHAKE_ID: u8 = 0;
/// Sub-id we advertise for our own ut_metadata handler; stable for the process.
pub const LOCAL_UT_METADATA_ID: u8 = 1;

/// Build a peer-id that is always exactly 20 bytes: never truncate-sliced from a
/// variable-length concatenation (see the original source's peer-id bug).
pub fn generate_peer_id() -> [u8; 20] {
    const CLIENT_TAG: &[u8; 2] = b"01";
    const CHARSET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    let mut id = [0u8; 20];
    id[0..3].copy_from_slice(b"-md");
    id[3..5].copy_from_slice(CLIENT_TAG);
    let mut rng = rand::thread_rng();
    for slot in id[5..17].iter_mut() {
        *slot = CHARSET[rng.gen_range(0..CHARSET.len())];
    }
    id[17..20].copy_from_slice(b"000");
    id
}

/// One length-prefixed frame off the wire. `KeepAlive` is the zero-length frame.
#[derive(Debug, Clone)]
pub enum Frame {
    KeepAlive,
    Payload(Vec<u8>),
}

/// Read one frame, refreshing the read deadline first.
pub fn read_frame(stream: &mut TcpStream) -> Result<Frame, BitTorrentError> {
    stream.set_read_timeout(Some(READ_DEADLINE))?;
    let len = u32::from_be_bytes(read_n_bytes(stream, 4)?.try_into().unwrap());
    if len == 0 {
        return Ok(Frame::KeepAlive);
    }
    if len > MAX_FRAME_LEN {
        return Err(bterror!(
            "Frame length {} exceeds maximum of {}",
            len,
            MAX_FRAME_LEN
        ));
    }
    Ok(Frame::Payload(read_n_bytes(stream, len as usize)?))
}

/// Write one frame, refreshing the write deadline first.
pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), BitTorrentError> {
    stream.set_write_timeout(Some(WRITE_DEADLINE))?;
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    pub extensions: bool,
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
}

impl HandshakeMessage {
    pub fn new(info_hash: InfoHash, peer_id: [u8; 20]) -> Self {
        HandshakeMessage {
            extensions: true,
            info_hash,
            peer_id,
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = 0x13;
        buf[1..20].copy_from_slice(PROTOCOL_NAME);
        if self.extensions {
            buf[EXTENSION_FLAG_BYTE] = EXTENSION_FLAG_BIT;
        }
        buf[28..48].copy_from_slice(self.info_hash.as_bytes());
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    pub fn decode(bytes: &[u8; HANDSHAKE_LEN]) -> Result<HandshakeMessage, BitTorrentError> {
        if bytes[0] != 0x13 || &bytes[1..20] != PROTOCOL_NAME {
            return Err(bterror!("Invalid handshake protocol header"));
        }
        Ok(HandshakeMessage {
            extensions: bytes[EXTENSION_FLAG_BYTE] & EXTENSION_FLAG_BIT == EXTENSION_FLAG_BIT,
            info_hash: InfoHash::from(<[u8; 20]>::try_from(&bytes[28..48]).unwrap()),
            peer_id: bytes[48..68].try_into().unwrap(),
        })
    }
}

/// A BEP-10 extension handshake, the fields that matter: `m["ut_metadata"]` and `metadata_size`.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub m: HashMap<String, i64>,
    pub metadata_size: Option<i64>,
    pub v: Option<String>,
}

impl ExtensionHandshake {
    pub const UT_METADATA: &'static str = "ut_metadata";

    /// The handshake this crate advertises to peers.
    pub fn local() -> Self {
        let mut m = HashMap::new();
        m.insert(Self::UT_METADATA.to_string(), LOCAL_UT_METADATA_ID as i64);
        ExtensionHandshake {
            m,
            metadata_size: None,
            v: Some(format!("magnetdl/{}", env!("CARGO_PKG_VERSION"))),
        }
    }

    pub fn ut_metadata_id(&self) -> Option<i64> {
        self.m.get(Self::UT_METADATA).copied()
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitTorrentError> {
        let m_dict: HashMap<Bytes, BencodedValue> = self
            .m
            .iter()
            .map(|(name, id)| (Bytes::from(name.clone()), BencodedValue::Int(*id)))
            .collect();
        let mut dict = HashMap::from([(bytes!(b"m"), BencodedValue::Dict(m_dict))]);
        if let Some(v) = &self.v {
            dict.insert(bytes!(b"v"), Bytes::from(v.clone()).into());
        }
        if let Some(size) = self.metadata_size {
            dict.insert(bytes!(b"metadata_size"), BencodedValue::Int(size));
        }
        BencodedValue::Dict(dict).encode()
    }

    pub fn decode(raw: &[u8]) -> Result<ExtensionHandshake, BitTorrentError> {
        let mut dict = BencodedValue::ingest(&mut &raw[..])?
            .into_dict()
            .ok_or_else(|| bterror!("Extension handshake is not a dict"))?;
        let m = dict
            .pull(b"m")
            .and_then(BencodedValue::into_dict)
            .ok_or_else(|| bterror!("Extension handshake missing m dict"))?
            .into_iter()
            .filter_map(|(name, id)| id.into_int().map(|id| (name.to_string(), id)))
            .collect();
        let metadata_size = dict.pull(b"metadata_size").and_then(BencodedValue::into_int);
        let v = dict
            .pull(b"v")
            .and_then(BencodedValue::into_bytes)
            .map(|v| v.to_string());
        Ok(ExtensionHandshake {
            m,
            metadata_size,
            v,
        })
    }
}

pub fn encode_extension_handshake(handshake: &ExtensionHandshake) -> Result<Vec<u8>, BitTorrentError> {
    let body = handshake.encode()?;
    Ok([EXTENDED_MESSAGE_ID, EXTENDED_HANDSHAKE_ID]
        .into_iter()
        .chain(body)
        .collect())
}

pub fn encode_metadata_request(piece: u32, peer_ut_metadata_id: u8) -> Result<Vec<u8>, BitTorrentError> {
    let body = dict! {
        b"msg_type" => 0i64,
        b"piece" => piece as i64,
    }
    .encode()?;
    Ok([EXTENDED_MESSAGE_ID, peer_ut_metadata_id]
        .into_iter()
        .chain(body)
        .collect())
}

/// A BEP-9 `ut_metadata` message: bencoded dict prefix, plus raw trailing bytes for `Data`.
#[derive(Debug, Clone)]
pub enum MetadataMessage {
    Request { piece: i64 },
    Data { piece: i64, payload: Vec<u8> },
    Reject { piece: i64 },
}

impl MetadataMessage {
    /// Decode the bencoded prefix, then copy out whatever raw bytes follow it verbatim.
    pub fn decode(raw: &[u8]) -> Result<MetadataMessage, BitTorrentError> {
        let mut cursor = raw;
        let value = BencodedValue::ingest(&mut cursor)?;
        let trailing = &raw[raw.len() - cursor.len()..];

        let mut dict = value
            .into_dict()
            .ok_or_else(|| bterror!("Metadata message is not a dict"))?;
        let msg_type = dict
            .pull(b"msg_type")
            .and_then(BencodedValue::into_int)
            .ok_or_else(|| bterror!("Metadata message missing msg_type"))?;
        let piece = dict
            .pull(b"piece")
            .and_then(BencodedValue::into_int)
            .ok_or_else(|| bterror!("Metadata message missing piece"))?;

        match msg_type {
            0 => Ok(MetadataMessage::Request { piece }),
            1 => Ok(MetadataMessage::Data {
                piece,
                payload: trailing.to_vec(),
            }),
            2 => Ok(MetadataMessage::Reject { piece }),
            other => Err(bterror!("Invalid ut_metadata msg_type: {}", other)),
        }
    }
}

/// What the peer sent us after stripping the leading message id.
#[derive(Debug)]
pub enum PeerMessage {
    KeepAlive,
    Extension { ext_id: u8, body: Vec<u8> },
    Other { id: u8 },
}

impl PeerMessage {
    pub fn decode(frame: Frame) -> PeerMessage {
        let payload = match frame {
            Frame::KeepAlive => return PeerMessage::KeepAlive,
            Frame::Payload(payload) => payload,
        };
        match payload.split_first() {
            None => PeerMessage::KeepAlive,
            Some((&EXTENDED_MESSAGE_ID, rest)) => match rest.split_first() {
                Some((&ext_id, body)) => PeerMessage::Extension {
                    ext_id,
                    body: body.to_vec(),
                },
                None => PeerMessage::Other {
                    id: EXTENDED_MESSAGE_ID,
                },
            },
            Some((&id, _)) => PeerMessage::Other { id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips() {
        let info_hash = InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap();
        let message = HandshakeMessage::new(info_hash, generate_peer_id());
        let encoded = message.encode();
        let decoded = HandshakeMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.info_hash, info_hash);
        assert!(decoded.extensions);
        assert_eq!(decoded.peer_id, message.peer_id);
    }

    #[test]
    fn generated_peer_id_is_always_twenty_bytes() {
        for _ in 0..100 {
            assert_eq!(generate_peer_id().len(), 20);
        }
    }

    #[test]
    fn extension_handshake_round_trips_key_fields() {
        let mut handshake = ExtensionHandshake::local();
        handshake.metadata_size = Some(32768);
        let encoded = handshake.encode().unwrap();
        let decoded = ExtensionHandshake::decode(&encoded).unwrap();
        assert_eq!(decoded.ut_metadata_id(), Some(LOCAL_UT_METADATA_ID as i64));
        assert_eq!(decoded.metadata_size, Some(32768));
    }

    #[test]
    fn metadata_data_message_keeps_trailing_bytes_verbatim() {
        let mut body = dict! {
            b"msg_type" => 1i64,
            b"piece" => 0i64,
            b"total_size" => 16384i64,
        }
        .encode()
        .unwrap();
        let piece_bytes = vec![0xABu8; 16384];
        body.extend_from_slice(&piece_bytes);

        match MetadataMessage::decode(&body).unwrap() {
            MetadataMessage::Data { piece, payload } => {
                assert_eq!(piece, 0);
                assert_eq!(payload, piece_bytes);
            }
            other => panic!("expected Data message, got {:?}", other),
        }
    }

    #[test]
    fn rejects_oversize_frame_length() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        client
            .write_all(&(MAX_FRAME_LEN + 1).to_be_bytes())
            .unwrap();

        let err = read_frame(&mut server).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
