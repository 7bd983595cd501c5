//! Thread-safe in-memory [`SessionTier`] for tests, demos, and ephemeral sessions.

// self
use crate::{
	_prelude::*,
	store::{SessionTier, StoreFuture},
};

type TierMap = Arc<RwLock<HashMap<String, String>>>;

/// In-process key/value tier. Clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryTier(TierMap);
impl MemoryTier {
	/// Inserts a raw value, bypassing any adapter layered on top.
	pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
		self.0.write().insert(key.into(), value.into());
	}

	/// Returns the raw value stored under `key`.
	pub fn raw(&self, key: &str) -> Option<String> {
		self.0.read().get(key).cloned()
	}

	/// Returns a copy of every stored entry.
	pub fn snapshot(&self) -> HashMap<String, String> {
		self.0.read().clone()
	}
}
impl SessionTier for MemoryTier {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.raw(key)) })
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().insert(key.to_owned(), value);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().remove(key);

			Ok(())
		})
	}
}
