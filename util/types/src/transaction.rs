use crate::serialize::{decode_vec, encode_vec, encoded_vec_size, Decode, DecodeError, Encode};
use crate::{Destination, H256};
use bytes::BytesMut;
use forknet_hash::blake2b_256;

/// Transaction kind. Mint kinds only ever appear embedded in blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u16)]
pub enum TxType {
    Token = 0x0000,
    Genesis = 0x0100,
    Stake = 0x0200,
    Work = 0x0300,
}

impl TxType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0000 => Some(TxType::Token),
            0x0100 => Some(TxType::Genesis),
            0x0200 => Some(TxType::Stake),
            0x0300 => Some(TxType::Work),
            _ => None,
        }
    }

    pub fn is_mint(self) -> bool {
        matches!(self, TxType::Genesis | TxType::Stake | TxType::Work)
    }
}

/// Reference to the n-th output of the transaction `hash`.
///
/// A transaction has at most two outputs: 0 pays `send_to`, 1 returns the
/// change to the spender.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OutPoint {
    pub hash: H256,
    pub n: u8,
}

impl OutPoint {
    pub fn new(hash: H256, n: u8) -> Self {
        OutPoint { hash, n }
    }
}

impl Encode for OutPoint {
    fn encode(&self, buf: &mut BytesMut) {
        self.hash.encode(buf);
        self.n.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        33
    }
}

impl Decode for OutPoint {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(OutPoint {
            hash: H256::decode(buf)?,
            n: u8::decode(buf)?,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TxIn {
    pub prev_out: OutPoint,
}

impl TxIn {
    pub fn new(prev_out: OutPoint) -> Self {
        TxIn { prev_out }
    }
}

impl Encode for TxIn {
    fn encode(&self, buf: &mut BytesMut) {
        self.prev_out.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        self.prev_out.encoded_size()
    }
}

impl Decode for TxIn {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(TxIn {
            prev_out: OutPoint::decode(buf)?,
        })
    }
}

/// A spendable output.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TxOut {
    pub dest: Destination,
    pub amount: u64,
    pub lock_until: u32,
}

impl TxOut {
    pub fn new(dest: Destination, amount: u64, lock_until: u32) -> Self {
        TxOut {
            dest,
            amount,
            lock_until,
        }
    }

    pub fn is_null(&self) -> bool {
        self.amount == 0 && self.dest.is_null()
    }
}

impl Encode for TxOut {
    fn encode(&self, buf: &mut BytesMut) {
        self.dest.encode(buf);
        self.amount.encode(buf);
        self.lock_until.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        self.dest.encoded_size() + 8 + 4
    }
}

impl Decode for TxOut {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(TxOut {
            dest: Destination::decode(buf)?,
            amount: u64::decode(buf)?,
            lock_until: u32::decode(buf)?,
        })
    }
}

/// A forknet transaction.
///
/// `hash_anchor` pins the fork the transaction belongs to: it names a block
/// on that fork and admission fails when the anchor resolves elsewhere.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub version: u16,
    pub typ: TxType,
    pub timestamp: u32,
    pub lock_until: u32,
    pub hash_anchor: H256,
    pub inputs: Vec<TxIn>,
    pub send_to: Destination,
    pub amount: u64,
    pub tx_fee: u64,
    pub vch_data: Vec<u8>,
    pub vch_sig: Vec<u8>,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: 1,
            typ: TxType::Token,
            timestamp: 0,
            lock_until: 0,
            hash_anchor: H256::zero(),
            inputs: Vec::new(),
            send_to: Destination::default(),
            amount: 0,
            tx_fee: 0,
            vch_data: Vec::new(),
            vch_sig: Vec::new(),
        }
    }
}

impl Transaction {
    pub fn hash(&self) -> H256 {
        H256(blake2b_256(self.encode_to_vec()))
    }

    pub fn is_mint(&self) -> bool {
        self.typ.is_mint()
    }

    /// Outpoints of all inputs.
    pub fn input_pts(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(|txin| txin.prev_out)
    }
}

impl Encode for Transaction {
    fn encode(&self, buf: &mut BytesMut) {
        self.version.encode(buf);
        (self.typ as u16).encode(buf);
        self.timestamp.encode(buf);
        self.lock_until.encode(buf);
        self.hash_anchor.encode(buf);
        encode_vec(&self.inputs, buf);
        self.send_to.encode(buf);
        self.amount.encode(buf);
        self.tx_fee.encode(buf);
        self.vch_data.encode(buf);
        self.vch_sig.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        2 + 2
            + 4
            + 4
            + 32
            + encoded_vec_size(&self.inputs)
            + self.send_to.encoded_size()
            + 8
            + 8
            + self.vch_data.encoded_size()
            + self.vch_sig.encoded_size()
    }
}

impl Decode for Transaction {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Transaction {
            version: u16::decode(buf)?,
            typ: TxType::from_u16(u16::decode(buf)?).ok_or(DecodeError::BadValue("tx type"))?,
            timestamp: u32::decode(buf)?,
            lock_until: u32::decode(buf)?,
            hash_anchor: H256::decode(buf)?,
            inputs: decode_vec(buf)?,
            send_to: Destination::decode(buf)?,
            amount: u64::decode(buf)?,
            tx_fee: u64::decode(buf)?,
            vch_data: Vec::<u8>::decode(buf)?,
            vch_sig: Vec::<u8>::decode(buf)?,
        })
    }
}

/// A transaction whose inputs have been resolved: the paying destination
/// and total input value ride along with it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssembledTx {
    pub tx: Transaction,
    pub block_height: i32,
    pub dest_in: Destination,
    pub value_in: u64,
}

impl AssembledTx {
    pub fn new(tx: Transaction, block_height: i32, dest_in: Destination, value_in: u64) -> Self {
        AssembledTx {
            tx,
            block_height,
            dest_in,
            value_in,
        }
    }

    /// Amount flowing back to the spender through output 1.
    pub fn change_amount(&self) -> u64 {
        self.value_in
            .saturating_sub(self.tx.amount)
            .saturating_sub(self.tx.tx_fee)
    }

    /// The n-th output, or a null output when the slot is unused.
    pub fn output(&self, n: u8) -> TxOut {
        match n {
            0 => TxOut::new(self.tx.send_to, self.tx.amount, self.tx.lock_until),
            1 => {
                let change = self.change_amount();
                if change == 0 {
                    TxOut::default()
                } else {
                    TxOut::new(self.dest_in, change, 0)
                }
            }
            _ => TxOut::default(),
        }
    }
}

impl Encode for AssembledTx {
    fn encode(&self, buf: &mut BytesMut) {
        self.tx.encode(buf);
        self.block_height.encode(buf);
        self.dest_in.encode(buf);
        self.value_in.encode(buf);
    }
}

impl Decode for AssembledTx {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(AssembledTx {
            tx: Transaction::decode(buf)?,
            block_height: i32::decode(buf)?,
            dest_in: Destination::decode(buf)?,
            value_in: u64::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            timestamp: 1000,
            hash_anchor: H256::from_u64(77),
            inputs: vec![TxIn::new(OutPoint::new(H256::from_u64(3), 0))],
            send_to: Destination::new_pubkey(H256::from_u64(5)),
            amount: 90,
            tx_fee: 10,
            ..Default::default()
        }
    }

    #[test]
    fn codec_roundtrip() {
        let tx = sample_tx();
        let bytes = tx.encode_to_vec();
        assert_eq!(bytes.len(), tx.encoded_size());
        assert_eq!(Transaction::decode_all(&bytes).unwrap(), tx);
    }

    #[test]
    fn hash_commits_to_content() {
        let tx = sample_tx();
        let mut other = tx.clone();
        other.amount += 1;
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn assembled_outputs() {
        let dest_in = Destination::new_pubkey(H256::from_u64(11));
        let atx = AssembledTx::new(sample_tx(), 42, dest_in, 150);
        assert_eq!(atx.output(0).amount, 90);
        assert_eq!(atx.output(1).amount, 50);
        assert_eq!(atx.output(1).dest, dest_in);
        assert!(atx.output(2).is_null());

        let exact = AssembledTx::new(sample_tx(), 42, dest_in, 100);
        assert!(exact.output(1).is_null());
    }
}
