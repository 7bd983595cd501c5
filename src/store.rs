//! Storage contracts and built-in tiers for the persisted session.
//!
//! A tier is a plain string key/value backend ([`SessionTier`]). [`CredentialStore`] pairs a
//! primary tier with an optional legacy tier, each addressed through its own [`TierKeys`].

pub mod credential;
pub mod encoded;
pub mod file;
pub mod memory;
pub mod metrics;
pub mod migration;

pub use credential::CredentialStore;
pub use encoded::EncodedTier;
pub use file::FileTier;
pub use memory::MemoryTier;
pub use metrics::StoreMetrics;
pub use migration::{LegacyMigration, MigrationOutcome};

// self
use crate::_prelude::*;

/// Boxed future returned by [`SessionTier`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Key/value backend holding one tier of session data.
pub trait SessionTier
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

	/// Removes `key`; removing a missing key succeeds.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}
impl<T> SessionTier for Arc<T>
where
	T: ?Sized + SessionTier,
{
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		(**self).get(key)
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		(**self).set(key, value)
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		(**self).remove(key)
	}
}

/// Error type produced by [`SessionTier`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Persisted session data could not be decoded.
	#[error("Corrupt session data: {message}.")]
	Corrupt {
		/// Human-readable error payload.
		message: String,
	},
}

/// The three values making up a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
	/// Access token.
	Access,
	/// Refresh token.
	Refresh,
	/// Serialized user profile.
	User,
}
impl Slot {
	/// Every slot, in write order.
	pub const ALL: [Slot; 3] = [Slot::Access, Slot::Refresh, Slot::User];
}

/// Key names used by one tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierKeys {
	/// Key of the access token.
	pub access: String,
	/// Key of the refresh token.
	pub refresh: String,
	/// Key of the serialized user profile.
	pub user: String,
}
impl TierKeys {
	/// Builds `<prefix>access`, `<prefix>refresh`, and `<prefix>user`.
	pub fn with_prefix(prefix: &str) -> Self {
		Self {
			access: format!("{prefix}access"),
			refresh: format!("{prefix}refresh"),
			user: format!("{prefix}user"),
		}
	}

	/// Keys of the primary tier.
	pub fn primary() -> Self {
		Self::with_prefix("ch_v2.0_")
	}

	/// Keys of the legacy tier.
	pub fn legacy() -> Self {
		Self::with_prefix("ch_")
	}

	/// Returns the key for `slot`.
	pub fn key(&self, slot: Slot) -> &str {
		match slot {
			Slot::Access => &self.access,
			Slot::Refresh => &self.refresh,
			Slot::User => &self.user,
		}
	}
}

/// A tier addressed through its key set.
#[derive(Clone)]
pub struct KeyedTier {
	tier: Arc<dyn SessionTier>,
	keys: TierKeys,
}
impl KeyedTier {
	/// Pairs `tier` with `keys`.
	pub fn new(tier: Arc<dyn SessionTier>, keys: TierKeys) -> Self {
		Self { tier, keys }
	}

	/// Returns the key set.
	pub fn keys(&self) -> &TierKeys {
		&self.keys
	}

	/// Reads one slot, treating an empty string as absent.
	pub async fn read(&self, slot: Slot) -> Result<Option<String>, StoreError> {
		Ok(self.tier.get(self.keys.key(slot)).await?.filter(|value| !value.is_empty()))
	}

	/// Writes one slot.
	pub async fn write(&self, slot: Slot, value: String) -> Result<(), StoreError> {
		self.tier.set(self.keys.key(slot), value).await
	}

	/// Removes one slot.
	pub async fn remove(&self, slot: Slot) -> Result<(), StoreError> {
		self.tier.remove(self.keys.key(slot)).await
	}

	/// Writes `writes` in order as one unit.
	///
	/// When a write fails, the slots already written get their previous values back before the
	/// error is returned, so the tier never keeps only part of the update.
	pub async fn write_all(&self, writes: &[(Slot, String)]) -> Result<(), StoreError> {
		let mut previous = Vec::with_capacity(writes.len());

		for (slot, _) in writes {
			// An unreadable value cannot be restored; rolling back removes it instead.
			previous.push((*slot, self.read(*slot).await.ok().flatten()));
		}

		for (written, (slot, value)) in writes.iter().enumerate() {
			if let Err(e) = self.write(*slot, value.clone()).await {
				self.restore(&previous[..written]).await;

				return Err(e);
			}
		}

		Ok(())
	}

	async fn restore(&self, previous: &[(Slot, Option<String>)]) {
		for (slot, value) in previous.iter().rev() {
			let restored = match value {
				Some(value) => self.write(*slot, value.clone()).await,
				None => self.remove(*slot).await,
			};

			if let Err(e) = restored {
				tracing::warn!(error = %e, ?slot, "Failed to roll back a partial write.");
			}
		}
	}

	/// Removes every slot, attempting all of them and reporting the first failure.
	pub async fn clear(&self) -> Result<(), StoreError> {
		let mut first_error = None;

		for slot in Slot::ALL {
			if let Err(e) = self.tier.remove(self.keys.key(slot)).await {
				first_error.get_or_insert(e);
			}
		}

		first_error.map_or(Ok(()), Err)
	}
}
impl Debug for KeyedTier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeyedTier").field("keys", &self.keys).finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn tier_keys_follow_the_persisted_layout() {
		let primary = TierKeys::primary();
		let legacy = TierKeys::legacy();

		assert_eq!(primary.key(Slot::Access), "ch_v2.0_access");
		assert_eq!(primary.key(Slot::Refresh), "ch_v2.0_refresh");
		assert_eq!(primary.key(Slot::User), "ch_v2.0_user");
		assert_eq!(legacy.key(Slot::Access), "ch_access");
		assert_eq!(legacy.key(Slot::Refresh), "ch_refresh");
		assert_eq!(legacy.key(Slot::User), "ch_user");
	}

	#[tokio::test]
	async fn keyed_tier_treats_empty_values_as_absent() {
		let backend = MemoryTier::default();
		let tier = KeyedTier::new(Arc::new(backend.clone()), TierKeys::legacy());

		backend.insert("ch_access", "");
		tier.write(Slot::Refresh, "R1".into()).await.expect("Memory writes should succeed.");

		assert_eq!(tier.read(Slot::Access).await.expect("Memory reads should succeed."), None);
		assert_eq!(
			tier.read(Slot::Refresh).await.expect("Memory reads should succeed.").as_deref(),
			Some("R1")
		);

		tier.clear().await.expect("Memory clears should succeed.");

		assert!(backend.snapshot().is_empty());
	}
}
