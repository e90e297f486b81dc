//! Known-peer bookkeeping. Peers are plain socket address strings kept in
//! discovery order; the first entry is the node we bootstrap sync from.

use std::sync::RwLock;

pub struct KnownNodes {
    inner: RwLock<Vec<String>>,
}

impl KnownNodes {
    pub fn new(seed: &str) -> KnownNodes {
        KnownNodes {
            inner: RwLock::new(vec![String::from(seed)]),
        }
    }

    pub fn add(&self, addr: &str) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on known nodes");
        if !inner.iter().any(|known| known == addr) {
            inner.push(String::from(addr));
        }
    }

    /// Drop a peer that could not be reached.
    pub fn evict(&self, addr: &str) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on known nodes");
        if let Some(idx) = inner.iter().position(|known| known == addr) {
            inner.remove(idx);
        }
    }

    pub fn first(&self) -> Option<String> {
        self.inner
            .read()
            .expect("Failed to acquire read lock on known nodes")
            .first()
            .cloned()
    }

    pub fn addrs(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("Failed to acquire read lock on known nodes")
            .to_vec()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.inner
            .read()
            .expect("Failed to acquire read lock on known nodes")
            .iter()
            .any(|known| known == addr)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("Failed to acquire read lock on known nodes")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let nodes = KnownNodes::new("127.0.0.1:2001");
        nodes.add("127.0.0.1:2002");
        nodes.add("127.0.0.1:2002");
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains("127.0.0.1:2002"));
    }

    #[test]
    fn test_evict_removes_peer() {
        let nodes = KnownNodes::new("127.0.0.1:2001");
        nodes.add("127.0.0.1:2002");
        nodes.evict("127.0.0.1:2002");
        assert!(!nodes.contains("127.0.0.1:2002"));
        assert_eq!(nodes.first(), Some(String::from("127.0.0.1:2001")));
    }
}
