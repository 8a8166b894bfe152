use std::io::Read;

use sha1::{Digest, Sha1};

use crate::bterror;
use crate::error::BitTorrentError;

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Read exactly `n` bytes from a stream, failing if the peer closes early.
pub fn read_n_bytes<R: Read>(stream: &mut R, n: usize) -> Result<Vec<u8>, BitTorrentError> {
    let mut buf = vec![0u8; n];
    stream
        .read_exact(&mut buf)
        .map_err(|err| bterror!("Error reading {} bytes: {}", n, err))?;
    Ok(buf)
}
