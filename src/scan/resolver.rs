use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Decides which addresses belong to the wallet and under which source key.
///
/// The scanner never derives addresses itself; it only asks this question.
pub trait AddressResolver: Send + Sync {
    /// Returns the source key owning `address`, or `None` if the address is not watched.
    fn owner_of(&self, address: &str) -> Option<String>;
}

impl<F> AddressResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn owner_of(&self, address: &str) -> Option<String> {
        self(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub address: String,
    pub source_key: String,
}

/// A fixed address → source key registry.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    owners: HashMap<String, String>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, address: impl Into<String>, source_key: impl Into<String>) -> &mut Self {
        self.owners.insert(address.into(), source_key.into());
        self
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }
}

impl FromIterator<WatchEntry> for WatchList {
    fn from_iter<I: IntoIterator<Item = WatchEntry>>(iter: I) -> Self {
        Self {
            owners: iter.into_iter().map(|e| (e.address, e.source_key)).collect(),
        }
    }
}

impl AddressResolver for WatchList {
    fn owner_of(&self, address: &str) -> Option<String> {
        self.owners.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_list_and_closure_resolvers() {
        let list: WatchList = vec![WatchEntry {
            address: "bnb1alice".into(),
            source_key: "acc-1".into(),
        }]
        .into_iter()
        .collect();
        assert_eq!(list.owner_of("bnb1alice").as_deref(), Some("acc-1"));
        assert_eq!(list.owner_of("bnb1bob"), None);

        let closure = |address: &str| (address == "bnb1bob").then(|| "acc-2".to_string());
        assert_eq!(closure.owner_of("bnb1bob").as_deref(), Some("acc-2"));
    }
}
