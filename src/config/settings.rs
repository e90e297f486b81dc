use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

/// Process-wide runtime settings, seeded from the environment at first use.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";

pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let node_addr =
            env::var(NODE_ADDRESS_KEY).unwrap_or_else(|_| String::from(DEFAULT_NODE_ADDR));

        let mut map = HashMap::new();
        map.insert(String::from(NODE_ADDRESS_KEY), node_addr);
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            map.insert(String::from(NODE_ID_KEY), node_id);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn get_node_addr(&self) -> String {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner
            .get(NODE_ADDRESS_KEY)
            .expect("Node address should always be present in config")
            .clone()
    }

    pub fn set_node_addr(&self, addr: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config");
        inner.insert(String::from(NODE_ADDRESS_KEY), addr);
    }

    pub fn set_mining_addr(&self, addr: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config");
        inner.insert(String::from(MINING_ADDRESS_KEY), addr);
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner.get(MINING_ADDRESS_KEY).cloned()
    }

    pub fn is_miner(&self) -> bool {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner.contains_key(MINING_ADDRESS_KEY)
    }

    pub fn set_node_id(&self, node_id: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config");
        inner.insert(String::from(NODE_ID_KEY), node_id);
    }

    pub fn get_node_id(&self) -> Option<String> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner.get(NODE_ID_KEY).cloned()
    }

    /// Derive a node id from the listen address port when none was set,
    /// e.g. "127.0.0.1:2001" -> "2001".
    pub fn node_id_or_port(&self) -> String {
        if let Some(node_id) = self.get_node_id() {
            return node_id;
        }
        let addr = self.get_node_addr();
        match addr.split(':').next_back() {
            Some(port) => port.to_string(),
            None => String::from("default"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mining_addr_toggles_miner_flag() {
        let config = Config::new();
        assert!(!config.is_miner());
        config.set_mining_addr(String::from("some-address"));
        assert!(config.is_miner());
        assert_eq!(config.get_mining_addr(), Some(String::from("some-address")));
    }

    #[test]
    fn test_node_id_falls_back_to_port() {
        let config = Config::new();
        config.set_node_addr(String::from("127.0.0.1:2077"));
        assert_eq!(config.node_id_or_port(), "2077");

        config.set_node_id(String::from("alpha"));
        assert_eq!(config.node_id_or_port(), "alpha");
    }
}
