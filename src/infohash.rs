use std::fmt::{Debug, Display, Formatter};

use crate::bterror;
use crate::error::BitTorrentError;
use crate::util::bytes_to_hex;

pub const INFOHASH_LEN: usize = 20;

/// A 20-byte BitTorrent infohash: the SHA-1 digest of a torrent's bencoded `info` dict.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; INFOHASH_LEN]);

impl InfoHash {
    pub fn from_hex(hex_str: &str) -> Result<InfoHash, BitTorrentError> {
        let decoded = hex::decode(hex_str)?;
        let array: [u8; INFOHASH_LEN] = decoded[..].try_into().map_err(|_| {
            bterror!(
                "Infohash must be exactly {} bytes, got {}",
                INFOHASH_LEN,
                decoded.len()
            )
        })?;
        Ok(InfoHash(array))
    }

    pub fn as_bytes(&self) -> &[u8; INFOHASH_LEN] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        bytes_to_hex(&self.0)
    }
}

impl From<[u8; INFOHASH_LEN]> for InfoHash {
    fn from(value: [u8; INFOHASH_LEN]) -> Self {
        InfoHash(value)
    }
}

impl Display for InfoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for InfoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let hex_str = "4d753474429d817b80ff9e0c441ca660ec5d2450";
        let info_hash = InfoHash::from_hex(hex_str).unwrap();
        assert_eq!(info_hash.to_hex(), hex_str);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(InfoHash::from_hex("abcd").is_err());
    }
}
