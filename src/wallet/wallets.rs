//! Thin keystore over a bincode-encoded wallet file. The core never touches
//! this directly; callers resolve a private/public key pair by address and
//! hand the keys to the transaction builder.

use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::warn;
use std::collections::HashMap;
use std::env::current_dir;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};

pub const WALLET_FILE: &str = "wallet.dat";

pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Default for Wallets {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallets {
    /// Load the wallet file from the working directory; start empty when no
    /// file exists or it cannot be read.
    pub fn new() -> Wallets {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
        };
        if let Err(e) = wallets.load_from_file() {
            warn!("could not load wallet file: {e}");
        }
        wallets
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) -> Result<()> {
        let path = current_dir()?.join(WALLET_FILE);
        if !path.exists() {
            return Ok(());
        }
        let mut file = File::open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf)?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let path = current_dir()?.join(WALLET_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .map_err(|e| LedgerError::Wallet(format!("cannot open {WALLET_FILE}: {e}")))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&serialize(&self.wallets)?)?;
        writer.flush()?;
        Ok(())
    }
}
