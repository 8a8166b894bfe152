use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::error::BitTorrentError;
use crate::infohash::InfoHash;

/// Write `d4:info<metadata>e` to `<output_folder>/<hex-infohash>.torrent`,
/// creating the output directory if missing. Does not retry on failure.
pub fn save_metainfo(
    output_folder: &Path,
    info_hash: InfoHash,
    metadata: &[u8],
) -> Result<(), BitTorrentError> {
    fs::create_dir_all(output_folder).with_context(|| "Error creating output folder")?;
    let path = output_folder.join(format!("{}.torrent", info_hash.to_hex()));
    let contents: Vec<u8> = b"d4:info"
        .iter()
        .copied()
        .chain(metadata.iter().copied())
        .chain(std::iter::once(b'e'))
        .collect();
    fs::write(path, contents).with_context(|| "Error writing to disk")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_expected_bencoded_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let info_hash = InfoHash::from_hex("4d753474429d817b80ff9e0c441ca660ec5d2450").unwrap();
        save_metainfo(dir.path(), info_hash, b"d6:lengthi10ee").unwrap();

        let written = fs::read(dir.path().join(format!("{}.torrent", info_hash.to_hex()))).unwrap();
        assert_eq!(written, b"d4:infod6:lengthi10eee".to_vec());
    }

    #[test]
    fn creates_missing_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested/deeper");
        let info_hash = InfoHash::from_hex("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        save_metainfo(&nested, info_hash, b"d1:xi1ee").unwrap();
        assert!(nested.join(format!("{}.torrent", info_hash.to_hex())).exists());
    }
}
