//! On-disk carry-over of the pool across restarts.
//!
//! `txpool.dat` holds every pooled transaction in sequence order as a
//! length-prefixed `(fork, txid, assembled tx)` list. The file is removed
//! after a successful load so a crash mid-run can never double-apply it.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use forknet_error::Errno;
use forknet_logger::error;
use forknet_types::serialize::{Decode, Encode};
use forknet_types::{AssembledTx, H256};

pub struct TxPoolData {
    path_file: PathBuf,
}

impl TxPoolData {
    /// Prepares `<data_dir>/txpool/txpool.dat`.
    pub fn initialize(data_dir: &Path) -> Result<Self, Errno> {
        let dir = data_dir.join("txpool");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|err| {
                error!("txpool data: create dir fail: {err}");
                Errno::SysStorage
            })?;
        }
        if !dir.is_dir() {
            return Err(Errno::SysStorage);
        }
        let path_file = dir.join("txpool.dat");
        if path_file.exists() && !path_file.is_file() {
            return Err(Errno::SysStorage);
        }
        Ok(TxPoolData { path_file })
    }

    pub fn save(&self, entries: &[(H256, (H256, AssembledTx))]) -> Result<(), Errno> {
        let mut buf = BytesMut::new();
        (entries.len() as u32).encode(&mut buf);
        for (fork, (txid, tx)) in entries {
            fork.encode(&mut buf);
            txid.encode(&mut buf);
            tx.encode(&mut buf);
        }
        fs::write(&self.path_file, &buf).map_err(|err| {
            error!("txpool data: save fail: {err}");
            Errno::SysStorage
        })
    }

    /// Loads and deletes the file. A missing file is an empty pool.
    pub fn load(&self) -> Result<Vec<(H256, (H256, AssembledTx))>, Errno> {
        if !self.path_file.is_file() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&self.path_file).map_err(|err| {
            error!("txpool data: read fail: {err}");
            Errno::SysStorage
        })?;
        let entries = decode_entries(&raw).map_err(|err| {
            error!("txpool data: decode fail: {err}");
            Errno::SysStorage
        })?;

        if let Err(err) = fs::remove_file(&self.path_file) {
            error!("txpool data: remove fail: {err}");
            return Err(Errno::SysStorage);
        }
        Ok(entries)
    }
}

type PersistedEntry = (H256, (H256, AssembledTx));

fn decode_entries(raw: &[u8]) -> Result<Vec<PersistedEntry>, forknet_types::DecodeError> {
    let mut buf = raw;
    let count = u32::decode(&mut buf)? as usize;
    let mut entries = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        let fork = H256::decode(&mut buf)?;
        let txid = H256::decode(&mut buf)?;
        let tx = AssembledTx::decode(&mut buf)?;
        entries.push((fork, (txid, tx)));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forknet_types::{Destination, Transaction};

    #[test]
    fn save_load_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = TxPoolData::initialize(dir.path()).unwrap();

        let tx = Transaction {
            amount: 5,
            ..Default::default()
        };
        let entries = vec![(
            H256::from_u64(1),
            (
                tx.hash(),
                AssembledTx::new(tx, -1, Destination::new_pubkey(H256::from_u64(2)), 9),
            ),
        )];
        data.save(&entries).unwrap();

        let loaded = data.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, H256::from_u64(1));
        assert_eq!(loaded[0].1 .1.value_in, 9);

        // second load sees nothing: the file is gone
        assert!(data.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = TxPoolData::initialize(dir.path()).unwrap();
        fs::write(dir.path().join("txpool").join("txpool.dat"), [9u8, 9, 9]).unwrap();
        assert_eq!(data.load(), Err(Errno::SysStorage));
    }
}
