use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use minichain::wallet::{convert_address, hash_pub_key, validate_address, ADDRESS_CHECK_SUM_LEN};
use minichain::{
    send_transaction, utils, Blockchain, Command, Opt, Server, Transaction, UTXOSet, Wallets,
    CENTRAL_NODE, GLOBAL_CONFIG,
};
use std::process;

const MINE_TRUE: usize = 1;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    // Every verb operates on this node's own database, so a chain created
    // here is the one startnode later serves.
    let node_id = GLOBAL_CONFIG.node_id_or_port();

    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = Blockchain::create_blockchain_with_node_id(&address, &node_id)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::new();
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let payload = utils::base58_decode(&address)?;
            if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
                return Err("Address too short".into());
            }
            // Strip the version byte and trailing checksum.
            let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];

            let blockchain = Blockchain::new_blockchain_with_node_id(&node_id)?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance: u64 = utxo_set
                .find_utxo(pub_key_hash)?
                .iter()
                .map(|output| output.get_value())
                .sum();
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new();
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }
            if amount == 0 {
                return Err("Amount must be positive".into());
            }

            let wallets = Wallets::new();
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for address: {from}"))?;

            let blockchain = Blockchain::new_blockchain_with_node_id(&node_id)?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine == MINE_TRUE {
                let coinbase_tx = Transaction::new_coinbase_tx(&from)?;
                let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
                utxo_set.update(&block)?;
            } else {
                send_transaction(CENTRAL_NODE, &transaction)?;
            }
            println!("Success!")
        }
        Command::Printchain => {
            let mut block_iterator = Blockchain::new_blockchain_with_node_id(&node_id)?.iterator();
            while let Some(block) = block_iterator.next_block()? {
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block Timestamp: {}", block.get_timestamp());

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", tx.id_hex());

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let txid_hex = HEXLOWER.encode(input.get_txid());
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            let address = convert_address(pub_key_hash.as_slice());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                txid_hex,
                                input.get_vout(),
                                address,
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        let address = convert_address(output.get_pub_key_hash());
                        println!("-- Output value = {}, to = {}", output.get_value(), address,)
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::new_blockchain_with_node_id(&node_id)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            let socket_addr = GLOBAL_CONFIG.get_node_addr();
            GLOBAL_CONFIG.set_node_id(node_id.clone());

            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr);
            }

            let blockchain = Blockchain::new_blockchain_with_node_id(&node_id)?;
            println!("Start node server on {socket_addr}");
            Server::new(blockchain).run(&socket_addr)?;
        }
    }
    Ok(())
}
