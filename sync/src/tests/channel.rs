use std::sync::Arc;

use forknet_protocol::{
    CloseReason, Endpoint, MsgRsp, MsgRspResult, MsgRspSubType, DataCommand, NodeRole,
    OutgoingEvent, PeerAddress, PeerEvent, ServiceFlags,
};
use forknet_traits::BlockChain;
use forknet_tx_pool::{PoolConfig, TxPool};
use forknet_types::{Inv, InvKind, OutPoint, Transaction, TxIn, TxOut, Destination, H256};

use crate::channel::{NetChannel, SYNTXINV_TIMEOUT};
use crate::tests::util::{make_block, MockChain, MockCore, MockDispatcher, MockPeerNet};

struct Node {
    channel: Arc<NetChannel>,
    net: Arc<MockPeerNet>,
    chain: Arc<MockChain>,
    pool: Arc<TxPool>,
    genesis: H256,
    _dir: tempfile::TempDir,
}

fn node(role: NodeRole) -> Node {
    let chain = MockChain::new();
    let genesis = chain.genesis;
    let core = Arc::new(MockCore { genesis });
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(
        TxPool::new(
            &PoolConfig {
                data_dir: dir.path().to_path_buf(),
            },
            core.clone(),
            chain.clone(),
        )
        .unwrap(),
    );
    let net = Arc::new(MockPeerNet::default());
    let dispatcher = Arc::new(MockDispatcher::new(chain.clone(), pool.clone()));
    let channel = Arc::new(NetChannel::new(
        role,
        net.clone(),
        core,
        chain.clone(),
        pool.clone(),
        dispatcher,
    ));
    channel.subscribe_fork(&genesis, 0);
    net.take();
    Node {
        channel,
        net,
        chain,
        pool,
        genesis,
        _dir: dir,
    }
}

fn peer_addr() -> PeerAddress {
    PeerAddress::new(
        ServiceFlags::NODE_NETWORK,
        Endpoint::from("127.0.0.1:9900".parse::<std::net::SocketAddr>().unwrap()),
    )
}

fn activate(node: &Node, nonce: u64) {
    node.channel.handle_event(PeerEvent::Active {
        nonce,
        addr: peer_addr(),
    });
}

fn has_close(events: &[OutgoingEvent]) -> Option<CloseReason> {
    events.iter().find_map(|event| match event {
        OutgoingEvent::Close { reason, .. } => Some(*reason),
        _ => None,
    })
}

fn get_data_invs(events: &[OutgoingEvent]) -> Vec<Inv> {
    events
        .iter()
        .flat_map(|event| match event {
            OutgoingEvent::GetData { invs, .. } => invs.clone(),
            _ => Vec::new(),
        })
        .collect()
}

#[test]
fn fresh_peer_gets_a_getblocks_roundtrip() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);

    let events = node.net.take();
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::GetBlocks { nonce: 1, locator, .. } if !locator.blocks.is_empty()
    )));

    // peer answers "nothing past your locator"
    node.channel.handle_event(PeerEvent::MsgRsp {
        nonce: 1,
        fork: node.genesis,
        rsp: MsgRsp::new(
            DataCommand::GetBlocks,
            MsgRspSubType::Non,
            MsgRspResult::GetBlocksEmpty,
        ),
    });
    let events = node.net.take();
    assert!(events
        .iter()
        .any(|event| matches!(event, OutgoingEvent::GetBlocks { nonce: 1, .. })));
}

#[test]
fn single_block_fetch_and_broadcast() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    activate(&node, 2);
    node.net.take();

    let block = make_block(1, node.genesis, 7);
    let hash = block.hash();

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::block(hash)],
    });
    let events = node.net.take();
    assert_eq!(get_data_invs(&events), vec![Inv::block(hash)]);

    node.channel.handle_event(PeerEvent::Block {
        nonce: 1,
        fork: node.genesis,
        block,
    });

    assert!(node.chain.exists(&hash));
    let events = node.net.take();
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::Reward { nonce: 1, .. }
    )));
    // announced to the peer that did not serve it
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::Inv { nonce: 2, invs, .. } if invs.contains(&Inv::block(hash))
    )));
    assert!(has_close(&events).is_none());
}

#[test]
fn orphan_block_connects_when_parent_arrives() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let b1 = make_block(1, node.genesis, 1);
    let b1_hash = b1.hash();
    let b2 = make_block(2, b1_hash, 2);
    let b2_hash = b2.hash();

    // the child shows up first
    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::block(b2_hash)],
    });
    node.channel.handle_event(PeerEvent::Block {
        nonce: 1,
        fork: node.genesis,
        block: b2,
    });
    assert!(!node.chain.exists(&b2_hash));

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::block(b1_hash)],
    });
    node.channel.handle_event(PeerEvent::Block {
        nonce: 1,
        fork: node.genesis,
        block: b1,
    });

    assert!(node.chain.exists(&b1_hash));
    assert!(node.chain.exists(&b2_hash), "orphan connected behind parent");
}

#[test]
fn tx_with_missing_prev_fetches_the_parent() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let dest = Destination::new_pubkey(H256::from_u64(5));
    let funding = OutPoint::new(H256::from_u64(900), 0);
    node.chain.add_utxo(funding, TxOut::new(dest, 100, 0));

    let parent = Transaction {
        timestamp: 10,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(funding)],
        send_to: dest,
        amount: 100,
        ..Default::default()
    };
    let parent_id = parent.hash();
    let child = Transaction {
        timestamp: 11,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(OutPoint::new(parent_id, 0))],
        send_to: dest,
        amount: 100,
        ..Default::default()
    };
    let child_id = child.hash();

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::tx(child_id)],
    });
    let events = node.net.take();
    assert_eq!(get_data_invs(&events), vec![Inv::tx(child_id)]);

    node.channel.handle_event(PeerEvent::Tx {
        nonce: 1,
        fork: node.genesis,
        tx: child,
    });
    // child is parked, the missing parent is requested instead
    assert!(!node.pool.exists(&child_id));
    let events = node.net.take();
    assert_eq!(get_data_invs(&events), vec![Inv::tx(parent_id)]);
    assert!(has_close(&events).is_none());

    node.channel.handle_event(PeerEvent::Tx {
        nonce: 1,
        fork: node.genesis,
        tx: parent,
    });
    assert!(node.pool.exists(&parent_id));
    assert!(node.pool.exists(&child_id), "orphan tx retried after parent");
}

#[test]
fn conflicting_tx_is_dropped_without_misbehavior() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let dest = Destination::new_pubkey(H256::from_u64(5));
    let funding = OutPoint::new(H256::from_u64(900), 0);
    node.chain.add_utxo(funding, TxOut::new(dest, 100, 0));

    let pooled = Transaction {
        timestamp: 10,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(funding)],
        send_to: dest,
        amount: 100,
        ..Default::default()
    };
    node.pool.push(pooled).unwrap();

    let rival = Transaction {
        timestamp: 11,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(funding)],
        send_to: Destination::new_pubkey(H256::from_u64(6)),
        amount: 100,
        ..Default::default()
    };
    let rival_id = rival.hash();

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::tx(rival_id)],
    });
    node.channel.handle_event(PeerEvent::Tx {
        nonce: 1,
        fork: node.genesis,
        tx: rival,
    });

    assert!(!node.pool.exists(&rival_id));
    assert!(has_close(&node.net.take()).is_none());
}

#[test]
fn fourth_repeat_mint_block_misbehaves() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();
    node.chain.mark_repeat_height(1);

    for salt in 0..4u32 {
        let block = make_block(1, node.genesis, salt);
        let hash = block.hash();
        node.channel.handle_event(PeerEvent::Inv {
            nonce: 1,
            fork: node.genesis,
            invs: vec![Inv::block(hash)],
        });
        let events = node.net.take();
        assert!(
            get_data_invs(&events).contains(&Inv::block(hash)),
            "repeat block {salt} still gets fetched"
        );
        node.channel.handle_event(PeerEvent::Block {
            nonce: 1,
            fork: node.genesis,
            block,
        });
        let events = node.net.take();
        if salt < 3 {
            assert!(has_close(&events).is_none(), "repeat {salt} tolerated");
        } else {
            assert_eq!(has_close(&events), Some(CloseReason::DdosAttack));
        }
    }
}

#[test]
fn role_filter_silently_ignores_out_of_scope_traffic() {
    let node = node(NodeRole::Fork);
    activate(&node, 1);
    node.net.take();

    let block = make_block(1, node.genesis, 1);
    let hash = block.hash();
    node.channel.handle_event(PeerEvent::Block {
        nonce: 1,
        fork: node.genesis,
        block,
    });

    assert!(!node.chain.exists(&hash));
    let events = node.net.take();
    assert!(events.is_empty(), "primary-fork block ignored by fork node");
}

#[test]
fn oversized_inv_closes_the_connection() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let exactly_max: Vec<Inv> = (0..forknet_types::MAX_INV_COUNT_WIRE as u64)
        .map(|n| Inv::tx(H256::from_u64(n + 1)))
        .collect();
    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: exactly_max.clone(),
    });
    assert!(has_close(&node.net.take()).is_none(), "8192 invs accepted");

    let mut one_over = exactly_max;
    one_over.push(Inv::tx(H256::from_u64(0x9999)));
    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: one_over,
    });
    assert_eq!(has_close(&node.net.take()), Some(CloseReason::DdosAttack));
}

#[test]
fn far_ahead_block_inv_is_dropped() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let admitted = make_block(512, H256::from_u64(77), 1).hash();
    let too_far = make_block(513, H256::from_u64(78), 1).hash();

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::block(too_far)],
    });
    assert!(get_data_invs(&node.net.take()).is_empty());

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::block(admitted)],
    });
    assert_eq!(get_data_invs(&node.net.take()), vec![Inv::block(admitted)]);
}

#[test]
fn get_data_serves_pool_and_chain_or_fails() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let dest = Destination::new_pubkey(H256::from_u64(5));
    let funding = OutPoint::new(H256::from_u64(900), 0);
    node.chain.add_utxo(funding, TxOut::new(dest, 100, 0));
    let tx = Transaction {
        timestamp: 10,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(funding)],
        send_to: dest,
        amount: 100,
        ..Default::default()
    };
    let txid = tx.hash();
    node.pool.push(tx).unwrap();

    let missing = H256::from_u64(0xDEAD);
    node.channel.handle_event(PeerEvent::GetData {
        nonce: 1,
        fork: node.genesis,
        invs: vec![Inv::tx(txid), Inv::block(missing)],
    });

    let events = node.net.take();
    assert!(events
        .iter()
        .any(|event| matches!(event, OutgoingEvent::Tx { nonce: 1, .. })));
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::GetFail { invs, .. } if invs.contains(&Inv::block(missing))
    )));
}

#[test]
fn get_blocks_replies_inv_empty_or_equal() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    let b1 = make_block(1, node.genesis, 1);
    let b1_hash = b1.hash();
    node.chain.append(b1);
    node.net.take();

    // locator at genesis: the successor is announced
    node.channel.handle_event(PeerEvent::GetBlocks {
        nonce: 1,
        fork: node.genesis,
        locator: forknet_types::BlockLocator::new(vec![node.genesis]),
    });
    let events = node.net.take();
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::Inv { invs, .. } if invs.contains(&Inv::block(b1_hash))
    )));

    // locator at the tip: equal
    node.channel.handle_event(PeerEvent::GetBlocks {
        nonce: 1,
        fork: node.genesis,
        locator: forknet_types::BlockLocator::new(vec![b1_hash]),
    });
    let events = node.net.take();
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::MsgRsp { rsp, .. }
            if rsp.result == MsgRspResult::GetBlocksEqual as u64
    )));
}

#[test]
fn push_tx_cycle_announces_pool_and_goes_idle() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    let dest = Destination::new_pubkey(H256::from_u64(5));
    let funding = OutPoint::new(H256::from_u64(900), 0);
    node.chain.add_utxo(funding, TxOut::new(dest, 100, 0));
    let tx = Transaction {
        timestamp: 10,
        hash_anchor: node.genesis,
        inputs: vec![TxIn::new(funding)],
        send_to: dest,
        amount: 100,
        ..Default::default()
    };
    let txid = tx.hash();
    node.pool.push(tx).unwrap();

    node.channel.broadcast_tx_inv(&node.genesis);
    let interval = node.channel.push_tx_cycle();
    assert_eq!(interval, SYNTXINV_TIMEOUT);

    let events = node.net.take();
    assert!(events.iter().any(|event| matches!(
        event,
        OutgoingEvent::Inv { nonce: 1, invs, .. } if invs.contains(&Inv::tx(txid))
    )));

    // the peer now knows the tx; no re-announce while it is fetching
    let _ = node.channel.push_tx_cycle();
    assert!(node.net.take().is_empty());
}

#[test]
fn subscribe_outside_primary_is_misbehavior() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    node.channel.handle_event(PeerEvent::Subscribe {
        nonce: 1,
        fork: H256::from_u64(0xBEEF),
        forks: vec![H256::from_u64(2)],
    });
    assert_eq!(has_close(&node.net.take()), Some(CloseReason::DdosAttack));
}

#[test]
fn unknown_fork_inv_is_misbehavior() {
    let node = node(NodeRole::Backbone);
    activate(&node, 1);
    node.net.take();

    node.channel.handle_event(PeerEvent::Inv {
        nonce: 1,
        fork: H256::from_u64(0xBEEF),
        invs: vec![Inv::new(InvKind::Tx, H256::from_u64(1))],
    });
    assert_eq!(has_close(&node.net.take()), Some(CloseReason::DdosAttack));
}
