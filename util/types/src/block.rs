use crate::serialize::{decode_vec, encode_vec, encoded_vec_size, Decode, DecodeError, Encode};
use crate::{Destination, Transaction, TxType, H256};
use bytes::BytesMut;
use forknet_hash::blake2b_256;

/// Block kind.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u16)]
pub enum BlockType {
    Genesis = 0x0001,
    Origin = 0x0002,
    Primary = 0x0101,
    Subsidiary = 0x0201,
    Extended = 0x0202,
    Vacant = 0x0204,
}

impl BlockType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x0001 => Some(BlockType::Genesis),
            0x0002 => Some(BlockType::Origin),
            0x0101 => Some(BlockType::Primary),
            0x0201 => Some(BlockType::Subsidiary),
            0x0202 => Some(BlockType::Extended),
            0x0204 => Some(BlockType::Vacant),
            _ => None,
        }
    }
}

/// A forknet block.
///
/// Block hashes carry the block height in their leading four big-endian
/// bytes, so the height of any block is recoverable from its hash alone.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub version: u16,
    pub typ: BlockType,
    pub timestamp: u32,
    pub height: u32,
    pub prev: H256,
    pub merkle_root: H256,
    pub vch_proof: Vec<u8>,
    pub tx_mint: Transaction,
    pub txs: Vec<Transaction>,
    pub vch_sig: Vec<u8>,
}

impl Default for Block {
    fn default() -> Self {
        Block {
            version: 1,
            typ: BlockType::Vacant,
            timestamp: 0,
            height: 0,
            prev: H256::zero(),
            merkle_root: H256::zero(),
            vch_proof: Vec::new(),
            tx_mint: Transaction::default(),
            txs: Vec::new(),
            vch_sig: Vec::new(),
        }
    }
}

impl Block {
    pub fn hash(&self) -> H256 {
        let mut inner = blake2b_256(self.encode_to_vec());
        inner[..4].copy_from_slice(&self.height.to_be_bytes());
        H256(inner)
    }

    /// Height embedded in a block hash.
    pub fn height_of_hash(hash: &H256) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&hash.as_bytes()[..4]);
        u32::from_be_bytes(raw)
    }

    pub fn is_genesis(&self) -> bool {
        self.typ == BlockType::Genesis
    }

    pub fn is_origin(&self) -> bool {
        matches!(self.typ, BlockType::Genesis | BlockType::Origin)
    }

    /// Whether the block extends the primary fork.
    pub fn is_primary(&self) -> bool {
        matches!(self.typ, BlockType::Genesis | BlockType::Primary)
    }

    pub fn is_vacant(&self) -> bool {
        self.typ == BlockType::Vacant
    }

    pub fn is_proof_of_work(&self) -> bool {
        self.tx_mint.typ == TxType::Work
    }
}

impl Encode for Block {
    fn encode(&self, buf: &mut BytesMut) {
        self.version.encode(buf);
        (self.typ as u16).encode(buf);
        self.timestamp.encode(buf);
        self.height.encode(buf);
        self.prev.encode(buf);
        self.merkle_root.encode(buf);
        self.vch_proof.encode(buf);
        self.tx_mint.encode(buf);
        encode_vec(&self.txs, buf);
        self.vch_sig.encode(buf);
    }

    fn encoded_size(&self) -> usize {
        2 + 2
            + 4
            + 4
            + 32
            + 32
            + self.vch_proof.encoded_size()
            + self.tx_mint.encoded_size()
            + encoded_vec_size(&self.txs)
            + self.vch_sig.encoded_size()
    }
}

impl Decode for Block {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Block {
            version: u16::decode(buf)?,
            typ: BlockType::from_u16(u16::decode(buf)?)
                .ok_or(DecodeError::BadValue("block type"))?,
            timestamp: u32::decode(buf)?,
            height: u32::decode(buf)?,
            prev: H256::decode(buf)?,
            merkle_root: H256::decode(buf)?,
            vch_proof: Vec::<u8>::decode(buf)?,
            tx_mint: Transaction::decode(buf)?,
            txs: decode_vec(buf)?,
            vch_sig: Vec::<u8>::decode(buf)?,
        })
    }
}

/// Input context of one block transaction: who paid, and how much went in.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TxContext {
    pub dest_in: Destination,
    pub value_in: u64,
}

impl Encode for TxContext {
    fn encode(&self, buf: &mut BytesMut) {
        self.dest_in.encode(buf);
        self.value_in.encode(buf);
    }
}

impl Decode for TxContext {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(TxContext {
            dest_in: Destination::decode(buf)?,
            value_in: u64::decode(buf)?,
        })
    }
}

/// A block bundled with the input contexts of its transactions, as handed
/// out by the chain when the tip moves.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockEx {
    pub block: Block,
    pub tx_contexts: Vec<TxContext>,
}

impl BlockEx {
    pub fn new(block: Block, tx_contexts: Vec<TxContext>) -> Self {
        BlockEx { block, tx_contexts }
    }
}

/// A sparse trail of block hashes from a claimant's head back toward
/// genesis, used to negotiate a common ancestor.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct BlockLocator {
    pub blocks: Vec<H256>,
}

impl BlockLocator {
    pub fn new(blocks: Vec<H256>) -> Self {
        BlockLocator { blocks }
    }
}

impl Encode for BlockLocator {
    fn encode(&self, buf: &mut BytesMut) {
        encode_vec(&self.blocks, buf);
    }

    fn encoded_size(&self) -> usize {
        encoded_vec_size(&self.blocks)
    }
}

impl Decode for BlockLocator {
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(BlockLocator {
            blocks: decode_vec(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxType;

    fn mint_tx(typ: TxType) -> Transaction {
        Transaction {
            typ,
            amount: 500,
            ..Default::default()
        }
    }

    #[test]
    fn hash_embeds_height() {
        let block = Block {
            typ: BlockType::Primary,
            height: 0x00AB_CDEF,
            tx_mint: mint_tx(TxType::Work),
            ..Default::default()
        };
        assert_eq!(Block::height_of_hash(&block.hash()), 0x00AB_CDEF);
    }

    #[test]
    fn codec_roundtrip() {
        let block = Block {
            typ: BlockType::Primary,
            timestamp: 9_000,
            height: 17,
            prev: H256::from_u64(16),
            tx_mint: mint_tx(TxType::Stake),
            txs: vec![Transaction::default()],
            ..Default::default()
        };
        let bytes = block.encode_to_vec();
        assert_eq!(bytes.len(), block.encoded_size());
        assert_eq!(Block::decode_all(&bytes).unwrap(), block);
    }

    #[test]
    fn classification() {
        let mut block = Block {
            typ: BlockType::Primary,
            tx_mint: mint_tx(TxType::Work),
            ..Default::default()
        };
        assert!(block.is_primary());
        assert!(block.is_proof_of_work());
        assert!(!block.is_vacant());

        block.typ = BlockType::Subsidiary;
        block.tx_mint = mint_tx(TxType::Stake);
        assert!(!block.is_primary());
        assert!(!block.is_proof_of_work());
    }
}
