//! End-to-end ledger tests over a temporary sled database. A low difficulty
//! keeps mining fast enough for CI.

use minichain::wallet::Wallet;
use minichain::{Block, Blockchain, Transaction, UTXOSet, SUBSIDY};
use tempfile::TempDir;

const TEST_BITS: u32 = 8;

fn test_chain(genesis_address: &str) -> (TempDir, Blockchain) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir
        .path()
        .join("chain")
        .to_str()
        .expect("temp path is not utf-8")
        .to_string();
    let blockchain =
        Blockchain::create_blockchain_with_path_and_bits(genesis_address, &db_path, TEST_BITS)
            .expect("failed to create blockchain");
    (temp_dir, blockchain)
}

fn balance_of(utxo_set: &UTXOSet, wallet: &Wallet) -> u64 {
    let pub_key_hash = minichain::wallet::hash_pub_key(wallet.get_public_key());
    utxo_set
        .find_utxo(&pub_key_hash)
        .expect("utxo lookup failed")
        .iter()
        .map(|output| output.get_value())
        .sum()
}

#[test]
fn test_mined_blocks_extend_the_chain() {
    let miner = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&miner.get_address());

    assert_eq!(blockchain.get_best_height().unwrap(), 0);
    let genesis_hash = blockchain.get_tip_hash();

    let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let block = blockchain.mine_block(&[coinbase]).unwrap();

    assert_eq!(blockchain.get_best_height().unwrap(), 1);
    assert_eq!(blockchain.get_tip_hash(), block.get_hash());
    assert_eq!(block.get_pre_block_hash(), genesis_hash);

    // The iterator walks tip to genesis.
    let mut iterator = blockchain.iterator();
    let tip = iterator.next_block().unwrap().unwrap();
    let genesis = iterator.next_block().unwrap().unwrap();
    assert_eq!(tip.get_hash(), block.get_hash());
    assert_eq!(genesis.get_hash(), genesis_hash);
    assert!(iterator.next_block().unwrap().is_none());
}

#[test]
fn test_signed_transfer_moves_balance() {
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&alice.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    assert_eq!(balance_of(&utxo_set, &alice), SUBSIDY);

    let tx =
        Transaction::new_utxo_transaction(&alice, &bob.get_address(), 4, &utxo_set).unwrap();
    let block = blockchain.mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();

    assert_eq!(balance_of(&utxo_set, &bob), 4);
    assert_eq!(balance_of(&utxo_set, &alice), SUBSIDY - 4);
}

#[test]
fn test_overspend_is_rejected() {
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&alice.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let result =
        Transaction::new_utxo_transaction(&alice, &bob.get_address(), SUBSIDY + 1, &utxo_set);
    assert!(result.is_err());
}

#[test]
fn test_double_spend_within_a_block_is_rejected() {
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&alice.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    // Both transactions select the same genesis output because the index is
    // not updated between them.
    let tx1 =
        Transaction::new_utxo_transaction(&alice, &bob.get_address(), 3, &utxo_set).unwrap();
    let tx2 =
        Transaction::new_utxo_transaction(&alice, &bob.get_address(), 5, &utxo_set).unwrap();

    assert!(blockchain.mine_block(&[tx1, tx2]).is_err());
}

#[test]
fn test_fork_choice_prefers_strictly_higher_blocks() {
    let miner = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&miner.get_address());

    let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let block_a = blockchain.mine_block(&[coinbase]).unwrap();
    assert_eq!(blockchain.get_tip_hash(), block_a.get_hash());

    // A competing block at the same height does not displace the tip.
    let rival_coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let rival = Block::new(
        block_a.get_pre_block_hash().to_string(),
        &[rival_coinbase],
        block_a.get_height(),
        TEST_BITS,
    )
    .unwrap();
    blockchain.add_block(&rival).unwrap();
    assert_eq!(blockchain.get_tip_hash(), block_a.get_hash());
    assert!(blockchain.block_exists(rival.get_hash()).unwrap());

    // A strictly higher block becomes the new tip.
    let next_coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let higher = Block::new(
        rival.get_hash().to_string(),
        &[next_coinbase],
        block_a.get_height() + 1,
        TEST_BITS,
    )
    .unwrap();
    blockchain.add_block(&higher).unwrap();
    assert_eq!(blockchain.get_tip_hash(), higher.get_hash());
    assert_eq!(blockchain.get_best_height().unwrap(), higher.get_height());
}

#[test]
fn test_adding_a_known_block_is_a_no_op() {
    let miner = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&miner.get_address());

    let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let block = blockchain.mine_block(&[coinbase]).unwrap();

    blockchain.add_block(&block).unwrap();
    assert_eq!(blockchain.get_best_height().unwrap(), 1);
    assert_eq!(blockchain.get_tip_hash(), block.get_hash());
}

#[test]
fn test_spendable_selection_covers_requested_amount() {
    let alice = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&alice.get_address());

    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    let pub_key_hash = minichain::wallet::hash_pub_key(alice.get_public_key());
    let (accumulated, selected) = utxo_set.find_spendable_outputs(&pub_key_hash, 7).unwrap();
    assert!(accumulated >= 7);
    assert_eq!(selected.len(), 1);

    // More than the chain holds: selection comes back short.
    let (accumulated, _) = utxo_set
        .find_spendable_outputs(&pub_key_hash, SUBSIDY + 1)
        .unwrap();
    assert_eq!(accumulated, SUBSIDY);
}

#[test]
fn test_incremental_updates_match_a_full_reindex() {
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let carol = Wallet::new().unwrap();
    let (_tmp, blockchain) = test_chain(&alice.get_address());

    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    // Maintain the index incrementally across two transfers.
    let tx = Transaction::new_utxo_transaction(&alice, &bob.get_address(), 4, &utxo_set).unwrap();
    let block = blockchain.mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();

    let tx = Transaction::new_utxo_transaction(&bob, &carol.get_address(), 3, &utxo_set).unwrap();
    let block = blockchain.mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();

    let balances = (
        balance_of(&utxo_set, &alice),
        balance_of(&utxo_set, &bob),
        balance_of(&utxo_set, &carol),
    );
    assert_eq!(balances, (SUBSIDY - 4, 1, 3));
    let tracked = utxo_set.count_transactions().unwrap();

    // A rebuild from the chain must land on the same index.
    utxo_set.reindex().unwrap();
    assert_eq!(
        (
            balance_of(&utxo_set, &alice),
            balance_of(&utxo_set, &bob),
            balance_of(&utxo_set, &carol),
        ),
        balances
    );
    assert_eq!(utxo_set.count_transactions().unwrap(), tracked);
}

#[test]
fn test_node_id_opens_the_node_scoped_database() {
    let tmp = TempDir::new().expect("failed to create temp dir");
    std::env::set_current_dir(tmp.path()).expect("failed to enter temp dir");

    let miner = Wallet::new().unwrap();
    let node_path = tmp.path().join("data").join("node_2001");
    let blockchain = Blockchain::create_blockchain_with_path_and_bits(
        &miner.get_address(),
        node_path.to_str().expect("temp path is not utf-8"),
        TEST_BITS,
    )
    .unwrap();
    let tip = blockchain.get_tip_hash();
    drop(blockchain);

    // The node-id constructor resolves to the same per-node directory, so
    // a chain created for node 2001 is the one node 2001 serves.
    let reopened = Blockchain::new_blockchain_with_node_id("2001").unwrap();
    assert_eq!(reopened.get_tip_hash(), tip);
    assert_eq!(reopened.get_best_height().unwrap(), 0);
}
