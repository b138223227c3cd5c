//! `Store`: a lazily populated, lowercase-keyed registry of `Item`s for a
//! single store name. Items are created on first access and cached forever
//! after; mutating the registry itself (as opposed to the items it holds)
//! is not supported, matching the historical `Store.__setitem__` et al.
//! raising `NotImplementedError`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::item::Item;

pub struct Store {
    pub name: String,
    items: Mutex<HashMap<String, Arc<Item>>>,
}

impl Store {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            items: Mutex::new(HashMap::new()),
        })
    }

    /// Look up an existing item by key, lowercased on ingress.
    pub fn get(&self, key: &str) -> Option<Arc<Item>> {
        self.items.lock().get(&key.to_lowercase()).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.lock().contains_key(&key.to_lowercase())
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.lock().keys().cloned().collect()
    }

    /// Fetch an existing item or create it with `create`, registering it
    /// under its lowercased key. Mirrors the historical double-checked
    /// lazy-instantiation in `Store.__getitem__`.
    pub fn get_or_create(&self, key: &str, create: impl FnOnce() -> Arc<Item>) -> Arc<Item> {
        let key = key.to_lowercase();
        let mut items = self.items.lock();
        if let Some(existing) = items.get(&key) {
            return existing.clone();
        }
        let item = create();
        items.insert(key, item.clone());
        item
    }

    /// Register a pre-built item, failing if one is already registered
    /// under that key. This is how a daemon adds its authoritative items,
    /// as opposed to [`Store::get_or_create`] which lets clients silently
    /// share a lazily built cache.
    pub fn insert_new(&self, key: &str, item: Arc<Item>) -> Result<(), Error> {
        let key = key.to_lowercase();
        let mut items = self.items.lock();
        if items.contains_key(&key) {
            return Err(Error::DuplicateItem(key));
        }
        items.insert(key, item);
        Ok(())
    }

    pub fn set(&self, _key: &str, _item: Arc<Item>) -> Result<(), Error> {
        Err(Error::NotSupported("Store does not support direct item assignment".to_string()))
    }

    pub fn del(&self, _key: &str) -> Result<(), Error> {
        Err(Error::NotSupported("Store does not support item deletion".to_string()))
    }

    pub fn clear(&self) -> Result<(), Error> {
        Err(Error::NotSupported("Store does not support clear()".to_string()))
    }

    pub fn copy(&self) -> Result<(), Error> {
        Err(Error::NotSupported("Store does not support copy()".to_string()))
    }

    pub fn update(&self) -> Result<(), Error> {
        Err(Error::NotSupported("Store does not support update()".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktl_config::ProvenanceStratum;
    use mktl_net::PublishSession;
    use std::collections::HashSet;

    async fn dummy_item(store: &str, key: &str) -> Arc<Item> {
        let publish = Arc::new(PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap());
        Item::new_authoritative(store, key, Vec::<ProvenanceStratum>::new(), publish)
    }

    #[tokio::test]
    async fn get_or_create_only_builds_once() {
        let store = Store::new("mystore");
        let calls = Mutex::new(0);

        let item = dummy_item("mystore", "temp").await;
        let item1 = store.get_or_create("TEMP", || {
            *calls.lock() += 1;
            item.clone()
        });
        let item2 = store.get_or_create("temp", || {
            *calls.lock() += 1;
            item.clone()
        });

        assert!(Arc::ptr_eq(&item1, &item2));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn insert_new_rejects_duplicates() {
        let store = Store::new("mystore");
        let item = dummy_item("mystore", "temp").await;
        store.insert_new("temp", item.clone()).unwrap();

        let err = store.insert_new("TEMP", item).unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(_)));
    }

    #[test]
    fn mutation_methods_are_not_supported() {
        let store = Store::new("mystore");
        assert!(store.clear().is_err());
        assert!(store.copy().is_err());
        assert!(store.update().is_err());
        assert!(store.del("temp").is_err());
    }
}
