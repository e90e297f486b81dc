//! Peer server: gossip synchronization plus the mining trigger. Each
//! connection carries exactly one framed message; the sender dials, writes
//! the frame, and closes its write half. Connections are handled by a fixed
//! pool of workers, and all node-local mutable state lives behind
//! [`NodeState`] so no worker touches a raw container directly.

use crate::config::GLOBAL_CONFIG;
use crate::core::{Block, Blockchain, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::network::message::{
    AddressPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload, NODE_VERSION,
};
use crate::network::node::KnownNodes;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const CENTRAL_NODE: &str = "127.0.0.1:2001";
pub const TRANSACTION_THRESHOLD: usize = 2;
const WORKER_COUNT: usize = 4;
const TCP_WRITE_TIMEOUT: u64 = 5000;

/// All mutable node-local state, shared by the connection workers and the
/// mining thread through one handle.
pub struct NodeState {
    known_nodes: KnownNodes,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    mining: AtomicBool,
}

impl NodeState {
    fn new() -> NodeState {
        NodeState {
            known_nodes: KnownNodes::new(CENTRAL_NODE),
            mempool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
            mining: AtomicBool::new(false),
        }
    }
}

pub struct Server {
    blockchain: Blockchain,
    state: Arc<NodeState>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(blockchain: Blockchain) -> Server {
        Server {
            blockchain,
            state: Arc::new(NodeState::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for signalling the accept loop and workers to stop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Bind, greet the central node, then dispatch connections to a fixed
    /// pool of worker threads until shutdown is signalled.
    pub fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| LedgerError::Network(format!("failed to bind {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| LedgerError::Network(format!("failed to set nonblocking: {e}")))?;
        info!("node listening on {addr}");

        if !addr.eq(CENTRAL_NODE) {
            let best_height = self.blockchain.get_best_height()?;
            send_version(&self.state, CENTRAL_NODE, best_height);
        }

        let (sender, receiver) = mpsc::channel::<TcpStream>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(WORKER_COUNT);
        for worker_id in 0..WORKER_COUNT {
            let receiver = Arc::clone(&receiver);
            let blockchain = self.blockchain.clone();
            let state = Arc::clone(&self.state);
            let shutdown = Arc::clone(&self.shutdown);
            workers.push(thread::spawn(move || loop {
                let stream = {
                    let guard = match receiver.lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            error!("worker {worker_id}: receiver lock poisoned");
                            break;
                        }
                    };
                    guard.recv()
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    // Channel closed, the accept loop is gone.
                    Err(_) => break,
                };
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = handle_connection(&blockchain, &state, stream) {
                    error!("worker {worker_id}: connection failed: {e}");
                }
            }));
        }

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if sender.send(stream).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("accept failed: {e}");
                }
            }
        }

        drop(sender);
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        Ok(())
    }
}

fn handle_connection(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    mut stream: TcpStream,
) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(60)))
        .map_err(|e| LedgerError::Network(format!("failed to set read timeout: {e}")))?;

    let mut frame = Vec::new();
    stream
        .read_to_end(&mut frame)
        .map_err(|e| LedgerError::Network(format!("failed to read frame: {e}")))?;
    let _ = stream.shutdown(Shutdown::Both);

    let message = Message::decode(&frame)?;
    info!("received {} message", message.command());

    match message {
        Message::Address(payload) => handle_address(blockchain, state, payload),
        Message::Version(payload) => handle_version(blockchain, state, payload),
        Message::GetBlocks(payload) => handle_get_blocks(blockchain, state, payload),
        Message::Inv(payload) => handle_inv(state, payload),
        Message::GetData(payload) => handle_get_data(blockchain, state, payload),
        Message::Block(payload) => handle_block(blockchain, state, payload),
        Message::Tx(payload) => handle_tx(blockchain, state, payload),
    }
}

fn handle_address(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: AddressPayload,
) -> Result<()> {
    for addr in &payload.addr_list {
        state.known_nodes.add(addr);
    }
    info!("known nodes: {}", state.known_nodes.len());
    // Ask every peer for its chain so the freshly learned ones get polled.
    let best_height = blockchain.get_best_height()?;
    let node_addr = GLOBAL_CONFIG.get_node_addr();
    for addr in state.known_nodes.addrs() {
        if addr.eq(&node_addr) {
            continue;
        }
        send_version(state, &addr, best_height);
    }
    Ok(())
}

fn handle_version(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: VersionPayload,
) -> Result<()> {
    info!(
        "version from {}: protocol={} best_height={}",
        payload.addr_from, payload.version, payload.best_height
    );
    let local_best_height = blockchain.get_best_height()?;
    if local_best_height < payload.best_height {
        send_get_blocks(state, &payload.addr_from);
    }
    if local_best_height > payload.best_height {
        send_version(state, &payload.addr_from, local_best_height);
    }
    state.known_nodes.add(&payload.addr_from);
    Ok(())
}

fn handle_get_blocks(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: GetBlocksPayload,
) -> Result<()> {
    let hashes = blockchain.get_block_hashes()?;
    send_inv(state, &payload.addr_from, InvKind::Block, hashes);
    Ok(())
}

fn handle_inv(state: &Arc<NodeState>, payload: InvPayload) -> Result<()> {
    match payload.kind {
        InvKind::Block => {
            state.blocks_in_transit.replace(&payload.items);
            if let Some(block_hash) = payload.items.first() {
                send_get_data(state, &payload.addr_from, InvKind::Block, block_hash);
                state.blocks_in_transit.remove(block_hash);
            }
        }
        InvKind::Tx => {
            if let Some(txid) = payload.items.first() {
                if !state.mempool.contains(&HEXLOWER.encode(txid)) {
                    send_get_data(state, &payload.addr_from, InvKind::Tx, txid);
                }
            }
        }
    }
    Ok(())
}

fn handle_get_data(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: GetDataPayload,
) -> Result<()> {
    match payload.kind {
        InvKind::Block => match blockchain.get_block_by_bytes(&payload.id)? {
            Some(block) => send_block(state, &payload.addr_from, &block),
            None => info!("requested block not found"),
        },
        InvKind::Tx => {
            let txid_hex = HEXLOWER.encode(&payload.id);
            if let Some(tx) = state.mempool.get(&txid_hex) {
                send_tx(state, &payload.addr_from, &tx);
            }
        }
    }
    Ok(())
}

fn handle_block(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: BlockPayload,
) -> Result<()> {
    let block = Block::deserialize(&payload.block)?;

    if !ProofOfWork::validate(&block, blockchain.get_target_bits())? {
        let rejection = LedgerError::Consensus(format!(
            "block {} from {} fails proof of work",
            block.get_hash(),
            payload.addr_from
        ));
        warn!("rejecting block: {rejection}");
        return Ok(());
    }

    let old_tip = blockchain.get_tip_hash();
    blockchain.add_block(&block)?;
    info!("added block {} from {}", block.get_hash(), payload.addr_from);

    if let Some(next_hash) = state.blocks_in_transit.first() {
        send_get_data(state, &payload.addr_from, InvKind::Block, &next_hash);
        state.blocks_in_transit.remove(&next_hash);
        return Ok(());
    }

    // Transit drained: bring the UTXO index up to date. A block that extends
    // the previous tip directly can be applied incrementally; anything else
    // needs a full rebuild.
    let utxo_set = UTXOSet::new(blockchain.clone());
    let new_tip = blockchain.get_tip_hash();
    if new_tip.eq(block.get_hash()) && block.get_pre_block_hash().eq(&old_tip) {
        utxo_set.update(&block)?;
    } else {
        utxo_set.reindex()?;
    }
    Ok(())
}

fn handle_tx(
    blockchain: &Blockchain,
    state: &Arc<NodeState>,
    payload: TxPayload,
) -> Result<()> {
    let tx = Transaction::deserialize(&payload.transaction)?;

    if !blockchain.verify_transaction(&tx)? {
        warn!(
            "rejecting transaction {} from {}: verification failed",
            tx.id_hex(),
            payload.addr_from
        );
        return Ok(());
    }
    let txid_hex = tx.id_hex();
    state.mempool.add(tx);
    info!("transaction {txid_hex} added to mempool");

    let node_addr = GLOBAL_CONFIG.get_node_addr();
    if node_addr.eq(CENTRAL_NODE) {
        // The central node relays the announcement to everyone else.
        let txid = HEXLOWER
            .decode(txid_hex.as_bytes())
            .map_err(|e| LedgerError::Serialization(format!("bad txid hex: {e}")))?;
        for addr in state.known_nodes.addrs() {
            if addr.eq(&node_addr) || addr.eq(&payload.addr_from) {
                continue;
            }
            send_inv(state, &addr, InvKind::Tx, vec![txid.clone()]);
        }
    }

    if state.mempool.len() >= TRANSACTION_THRESHOLD && GLOBAL_CONFIG.is_miner() {
        spawn_miner(blockchain, state);
    }
    Ok(())
}

/// Start the mining thread unless one is already running.
fn spawn_miner(blockchain: &Blockchain, state: &Arc<NodeState>) {
    if state.mining.swap(true, Ordering::SeqCst) {
        return;
    }
    let blockchain = blockchain.clone();
    let state = Arc::clone(state);
    thread::spawn(move || {
        if let Err(e) = mine_pending_transactions(&blockchain, &state) {
            error!("mining failed: {e}");
        }
        state.mining.store(false, Ordering::SeqCst);
    });
}

/// Drain the mempool into blocks: verify candidates, drop the ones that no
/// longer check out, mine the rest plus a coinbase, then announce. Repeats
/// while transactions keep arriving.
fn mine_pending_transactions(blockchain: &Blockchain, state: &Arc<NodeState>) -> Result<()> {
    let mining_addr = GLOBAL_CONFIG
        .get_mining_addr()
        .ok_or_else(|| LedgerError::Mining(String::from("mining address not configured")))?;

    loop {
        let mut txs = Vec::new();
        for tx in state.mempool.get_all() {
            if blockchain.verify_transaction(&tx)? {
                txs.push(tx);
            } else {
                warn!("dropping invalid transaction {} from mempool", tx.id_hex());
                state.mempool.remove(&tx.id_hex());
            }
        }
        if txs.is_empty() {
            info!("no valid transactions to mine");
            return Ok(());
        }

        let coinbase_tx = Transaction::new_coinbase_tx(&mining_addr)?;
        txs.push(coinbase_tx);

        let new_block = blockchain.mine_block(&txs)?;
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.update(&new_block)?;
        info!("mined block {}", new_block.get_hash());

        for tx in &txs {
            state.mempool.remove(&tx.id_hex());
        }

        let node_addr = GLOBAL_CONFIG.get_node_addr();
        for addr in state.known_nodes.addrs() {
            if addr.eq(&node_addr) {
                continue;
            }
            send_inv(state, &addr, InvKind::Block, vec![new_block.get_hash_bytes()]);
        }

        if state.mempool.is_empty() {
            return Ok(());
        }
    }
}

fn send_version(state: &Arc<NodeState>, addr: &str, height: usize) {
    let message = Message::Version(VersionPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        version: NODE_VERSION,
        best_height: height,
    });
    send_message(state, addr, &message);
}

fn send_get_blocks(state: &Arc<NodeState>, addr: &str) {
    let message = Message::GetBlocks(GetBlocksPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
    });
    send_message(state, addr, &message);
}

fn send_inv(state: &Arc<NodeState>, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
    let message = Message::Inv(InvPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        kind,
        items,
    });
    send_message(state, addr, &message);
}

fn send_get_data(state: &Arc<NodeState>, addr: &str, kind: InvKind, id: &[u8]) {
    let message = Message::GetData(GetDataPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        kind,
        id: id.to_vec(),
    });
    send_message(state, addr, &message);
}

fn send_block(state: &Arc<NodeState>, addr: &str, block: &Block) {
    let serialized = match block.serialize() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to serialize block for {addr}: {e}");
            return;
        }
    };
    let message = Message::Block(BlockPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        block: serialized,
    });
    send_message(state, addr, &message);
}

fn send_tx(state: &Arc<NodeState>, addr: &str, tx: &Transaction) {
    let serialized = match tx.serialize() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to serialize transaction for {addr}: {e}");
            return;
        }
    };
    let message = Message::Tx(TxPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: serialized,
    });
    send_message(state, addr, &message);
}

/// Dial a peer and write one frame. An unreachable peer is evicted from the
/// known set rather than failing the caller.
fn send_message(state: &Arc<NodeState>, addr: &str, message: &Message) {
    if addr.eq(&GLOBAL_CONFIG.get_node_addr()) {
        return;
    }
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            error!("failed to encode {} message: {e}", message.command());
            return;
        }
    };
    match TcpStream::connect(addr) {
        Ok(mut stream) => {
            if let Err(e) = stream
                .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
                .and_then(|_| stream.write_all(&frame))
                .and_then(|_| stream.flush())
            {
                error!("failed to send {} to {addr}: {e}", message.command());
                return;
            }
            let _ = stream.shutdown(Shutdown::Write);
        }
        Err(e) => {
            warn!("peer {addr} unreachable, evicting: {e}");
            state.known_nodes.evict(addr);
        }
    }
}

/// One-shot transaction submission used by the CLI when mining locally is
/// disabled.
pub fn send_transaction(addr: &str, tx: &Transaction) -> Result<()> {
    let message = Message::Tx(TxPayload {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: tx.serialize()?,
    });
    let frame = message.encode()?;
    let mut stream = TcpStream::connect(addr)
        .map_err(|e| LedgerError::Network(format!("failed to connect {addr}: {e}")))?;
    stream
        .write_all(&frame)
        .and_then(|_| stream.flush())
        .map_err(|e| LedgerError::Network(format!("failed to send transaction: {e}")))?;
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use tempfile::TempDir;

    const TEST_BITS: u32 = 8;

    #[test]
    fn test_blocks_failing_proof_of_work_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let miner = Wallet::new().unwrap();
        let db_path = tmp.path().join("chain");
        let blockchain = Blockchain::create_blockchain_with_path_and_bits(
            &miner.get_address(),
            db_path.to_str().unwrap(),
            TEST_BITS,
        )
        .unwrap();
        let state = Arc::new(NodeState::new());
        let tip_before = blockchain.get_tip_hash();

        // A block whose stored hash was never earned by a proof-of-work run.
        let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
        let forged = Block::new_unmined(
            0,
            tip_before.clone(),
            String::from("00deadbeef"),
            &[coinbase],
            0,
            1,
        );
        let payload = BlockPayload {
            addr_from: String::from("127.0.0.1:9999"),
            block: forged.serialize().unwrap(),
        };
        handle_block(&blockchain, &state, payload).unwrap();

        assert_eq!(blockchain.get_tip_hash(), tip_before);
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(!blockchain.block_exists(forged.get_hash()).unwrap());
    }
}
