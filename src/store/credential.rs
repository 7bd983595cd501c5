//! Session accessor combining the primary and legacy tiers.

// std
use std::{
	path::PathBuf,
	sync::atomic::{AtomicBool, Ordering},
};
// self
use crate::{
	_prelude::*,
	auth::{Session, TokenSecret, UserProfile},
	store::{
		EncodedTier, FileTier, KeyedTier, LegacyMigration, MemoryTier, MigrationOutcome,
		SessionTier, Slot, StoreError, StoreMetrics, TierKeys,
	},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Origin {
	#[default]
	Primary,
	Legacy,
}

#[derive(Debug, Default)]
struct Loaded {
	access: Option<TokenSecret>,
	refresh: Option<TokenSecret>,
	// Stored as-is; partial profiles stay mergeable and are filtered on the way out.
	user: Option<UserProfile>,
	origin: Origin,
}
impl Loaded {
	fn valid_user(&self) -> Option<UserProfile> {
		self.user.clone().filter(UserProfile::is_valid)
	}
}

/// Durable `{access, refresh, user}` session with a primary tier and an optional legacy tier.
///
/// Every operation runs under one async lock, so a reader never observes half of a token pair
/// and migration never races a write. Storage failures are logged and never returned:
///
/// - A primary write failure switches the store into degraded mode, where the legacy tier holds
///   and serves the session until a primary write succeeds again.
/// - Corrupt persisted data wipes the whole session.
/// - Reads promote a legacy session into the primary tier according to [`LegacyMigration`].
pub struct CredentialStore {
	primary: KeyedTier,
	legacy: Option<KeyedTier>,
	migration: LegacyMigration,
	degraded: AtomicBool,
	lock: AsyncMutex<()>,
	metrics: Arc<StoreMetrics>,
}
impl CredentialStore {
	/// Creates a store over `primary` using the default primary key layout.
	pub fn new(primary: Arc<dyn SessionTier>) -> Self {
		Self {
			primary: KeyedTier::new(primary, TierKeys::primary()),
			legacy: None,
			migration: LegacyMigration::default(),
			degraded: AtomicBool::new(false),
			lock: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Creates a process-local store with an encoded in-memory primary tier.
	pub fn in_memory() -> Self {
		Self::new(Arc::new(EncodedTier::new(MemoryTier::default())))
	}

	/// Opens a store whose primary tier is the encoded JSON file at `path`.
	///
	/// Fails with [`Error::Storage`] when the file cannot be read or parsed.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
		let file = FileTier::open(path)?;

		Ok(Self::new(Arc::new(EncodedTier::new(file))))
	}

	/// Attaches the legacy tier using the legacy key layout.
	pub fn with_legacy(mut self, legacy: Arc<dyn SessionTier>) -> Self {
		self.legacy = Some(KeyedTier::new(legacy, TierKeys::legacy()));

		self
	}

	/// Overrides the key layout of the primary tier.
	pub fn with_primary_keys(mut self, keys: TierKeys) -> Self {
		self.primary = KeyedTier::new(self.primary_tier(), keys);

		self
	}

	/// Overrides the migration policy.
	pub fn with_migration(mut self, migration: LegacyMigration) -> Self {
		self.migration = migration;

		self
	}

	/// Shares an external metrics sink.
	pub fn with_metrics(mut self, metrics: Arc<StoreMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Returns the store counters.
	pub fn metrics(&self) -> &Arc<StoreMetrics> {
		&self.metrics
	}

	/// Returns `true` while the legacy tier is authoritative because primary writes fail.
	pub fn is_degraded(&self) -> bool {
		self.degraded.load(Ordering::SeqCst)
	}

	/// Returns the current access token.
	pub async fn access_token(&self) -> Option<TokenSecret> {
		let _guard = self.lock.lock().await;

		self.load_locked().await.access
	}

	/// Returns the current refresh token.
	pub async fn refresh_token(&self) -> Option<TokenSecret> {
		let _guard = self.lock.lock().await;

		self.load_locked().await.refresh
	}

	/// Returns the stored user when it is a valid profile.
	pub async fn user(&self) -> Option<UserProfile> {
		let _guard = self.lock.lock().await;

		self.load_locked().await.valid_user()
	}

	/// Returns a consistent snapshot of the whole session.
	pub async fn session(&self) -> Session {
		let _guard = self.lock.lock().await;
		let loaded = self.load_locked().await;

		let user = loaded.valid_user();

		Session { access_token: loaded.access, refresh_token: loaded.refresh, user }
	}

	/// Returns `true` when an access token is available.
	///
	/// A session served by the legacy tier additionally needs a valid user, matching what that
	/// tier has always required.
	pub async fn is_authenticated(&self) -> bool {
		let _guard = self.lock.lock().await;
		let loaded = self.load_locked().await;
		let has_access = loaded.access.as_ref().is_some_and(|token| !token.is_empty());

		match loaded.origin {
			Origin::Primary => has_access,
			Origin::Legacy => has_access && loaded.valid_user().is_some(),
		}
	}

	/// Persists a token pair. Without a new refresh token the stored one is kept.
	pub async fn set_tokens(&self, access: TokenSecret, refresh: Option<TokenSecret>) {
		let _guard = self.lock.lock().await;
		let mut writes = vec![(Slot::Access, access.expose().to_owned())];

		if let Some(refresh) = refresh {
			writes.push((Slot::Refresh, refresh.expose().to_owned()));
		}

		self.write_locked(writes).await;
	}

	/// Merges `update` into the stored user field by field and persists the result.
	pub async fn set_user(&self, update: UserProfile) {
		let _guard = self.lock.lock().await;
		let mut user = self.load_locked().await.user.unwrap_or_default();

		user.merge(update);

		match serde_json::to_string(&user) {
			Ok(raw) => self.write_locked(vec![(Slot::User, raw)]).await,
			Err(e) => tracing::warn!(error = %e, "Failed to serialize the user profile."),
		}
	}

	/// Wipes both tiers and leaves degraded mode. Clearing an empty store is a no-op.
	pub async fn clear(&self) {
		let _guard = self.lock.lock().await;

		self.wipe_locked().await;
	}

	fn primary_tier(&self) -> Arc<dyn SessionTier> {
		self.primary.tier.clone()
	}

	async fn load_locked(&self) -> Loaded {
		match self.try_load_locked().await {
			Ok(loaded) => loaded,
			Err(e @ StoreError::Corrupt { .. }) => {
				tracing::warn!(error = %e, "Persisted session is corrupt; clearing it.");
				self.metrics.record_corrupt_read();
				self.wipe_locked().await;

				Loaded::default()
			},
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read the persisted session.");

				Loaded::default()
			},
		}
	}

	async fn try_load_locked(&self) -> Result<Loaded, StoreError> {
		if let Some(legacy) = &self.legacy {
			if self.is_degraded() {
				return read_tier(legacy, Origin::Legacy).await;
			}

			match self.migration.run(&self.primary, legacy).await? {
				MigrationOutcome::Promoted => self.metrics.record_promotion(),
				MigrationOutcome::Abandoned => self.metrics.record_abandoned_promotion(),
				_ => (),
			}
		}

		read_tier(&self.primary, Origin::Primary).await
	}

	async fn write_locked(&self, writes: Vec<(Slot, String)>) {
		let writes = if self.is_degraded() { self.resync_writes(writes).await } else { writes };

		match self.primary.write_all(&writes).await {
			Ok(()) => {
				if self.degraded.swap(false, Ordering::SeqCst) {
					tracing::info!("Primary tier accepted a write; leaving degraded mode.");
				}
				if let Some(legacy) = &self.legacy
					&& let Err(e) = legacy.write_all(&writes).await
				{
					tracing::debug!(error = %e, "Failed to mirror the session to the legacy tier.");
				}
			},
			Err(e) => {
				let Some(legacy) = &self.legacy else {
					tracing::error!(
						error = %e,
						"Primary tier write failed and no fallback tier exists."
					);

					return;
				};

				if !self.degraded.swap(true, Ordering::SeqCst) {
					tracing::warn!(error = %e, "Primary tier write failed; now degraded.");
				}

				self.metrics.record_degraded_write();

				if let Err(e) = legacy.write_all(&writes).await {
					tracing::warn!(error = %e, "Fallback tier write failed; the update was lost.");
				}
			},
		}
	}

	// While degraded the legacy tier holds the newest state, so a primary write must carry every
	// slot the caller did not supply.
	async fn resync_writes(&self, mut writes: Vec<(Slot, String)>) -> Vec<(Slot, String)> {
		let Some(legacy) = &self.legacy else {
			return writes;
		};

		for slot in Slot::ALL {
			if writes.iter().any(|(written, _)| *written == slot) {
				continue;
			}

			match legacy.read(slot).await {
				Ok(Some(value)) => writes.push((slot, value)),
				Ok(None) => (),
				Err(e) => {
					tracing::debug!(error = %e, "Failed to read the fallback tier for resync.")
				},
			}
		}

		writes
	}

	async fn wipe_locked(&self) {
		if let Err(e) = self.primary.clear().await {
			tracing::warn!(error = %e, "Failed to clear the primary tier.");
		}
		if let Some(legacy) = &self.legacy
			&& let Err(e) = legacy.clear().await
		{
			tracing::warn!(error = %e, "Failed to clear the legacy tier.");
		}

		self.degraded.store(false, Ordering::SeqCst);
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore")
			.field("primary", &self.primary)
			.field("legacy", &self.legacy)
			.field("migration", &self.migration)
			.field("degraded", &self.is_degraded())
			.finish_non_exhaustive()
	}
}

async fn read_tier(tier: &KeyedTier, origin: Origin) -> Result<Loaded, StoreError> {
	let access = tier.read(Slot::Access).await?.map(TokenSecret::from);
	let refresh = tier.read(Slot::Refresh).await?.map(TokenSecret::from);
	let user = match tier.read(Slot::User).await? {
		Some(raw) => parse_user(&raw)?,
		None => None,
	};

	Ok(Loaded { access, refresh, user, origin })
}

fn parse_user(raw: &str) -> Result<Option<UserProfile>, StoreError> {
	let value = serde_json::from_str::<Value>(raw).map_err(|e| StoreError::Corrupt {
		message: format!("User record is not valid JSON: {e}"),
	})?;

	Ok(UserProfile::from_value(value))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, store::StoreFuture};

	/// Memory tier whose writes can be switched to fail, for every key or for keys ending in a
	/// given suffix.
	#[derive(Clone, Default)]
	struct FlakyTier {
		inner: MemoryTier,
		failing: Arc<Mutex<Option<&'static str>>>,
	}
	impl FlakyTier {
		fn fail_writes(&self, failing: bool) {
			*self.failing.lock() = failing.then_some("");
		}

		fn fail_writes_ending_in(&self, suffix: &'static str) {
			*self.failing.lock() = Some(suffix);
		}
	}
	impl SessionTier for FlakyTier {
		fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
			self.inner.get(key)
		}

		fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
			if (*self.failing.lock()).is_some_and(|suffix| key.ends_with(suffix)) {
				return Box::pin(async {
					Err(StoreError::Backend { message: "quota exceeded".into() })
				});
			}

			self.inner.set(key, value)
		}

		fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
			self.inner.remove(key)
		}
	}

	fn valid_user() -> UserProfile {
		UserProfile::new().with_field("id", "u-1").with_field("email", "ada@example.com")
	}

	fn flaky_store() -> (CredentialStore, FlakyTier, MemoryTier) {
		let primary = FlakyTier::default();
		let legacy = MemoryTier::default();
		let store = CredentialStore::new(Arc::new(primary.clone()))
			.with_legacy(Arc::new(legacy.clone()));

		(store, primary, legacy)
	}

	#[tokio::test]
	async fn tokens_round_trip_encoded_and_mirrored() {
		let (store, primary, legacy) = tiered_store();

		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;

		assert_eq!(store.access_token().await, Some(TokenSecret::new("A1")));
		assert_eq!(store.refresh_token().await, Some(TokenSecret::new("R1")));
		assert_eq!(primary.raw("ch_v2.0_access").as_deref(), Some("QTE="));
		assert_eq!(legacy.raw("ch_access").as_deref(), Some("A1"));
		assert!(store.is_authenticated().await);
	}

	#[tokio::test]
	async fn missing_refresh_token_keeps_the_stored_one() {
		let (store, _, _) = tiered_store();

		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;
		store.set_tokens(TokenSecret::new("A2"), None).await;

		let session = store.session().await;

		assert_eq!(session.access_token, Some(TokenSecret::new("A2")));
		assert_eq!(session.refresh_token, Some(TokenSecret::new("R1")));
	}

	#[tokio::test]
	async fn set_user_merges_and_hides_invalid_profiles() {
		let (store, _, _) = tiered_store();

		store.set_user(UserProfile::new().with_field("id", "u-1")).await;

		assert_eq!(store.user().await, None);

		store
			.set_user(
				UserProfile::new()
					.with_field("email", "ada@example.com")
					.with_field("first_name", "Ada"),
			)
			.await;

		let user = store.user().await.expect("Merged profile should be valid.");

		assert_eq!(user.id().as_deref(), Some("u-1"));
		assert_eq!(user.get("first_name"), Some(&Value::from("Ada")));
	}

	#[tokio::test]
	async fn legacy_sessions_are_promoted_once() {
		let (store, primary, legacy) = tiered_store();

		legacy.insert("ch_access", "A0");
		legacy.insert("ch_refresh", "R0");
		legacy.insert("ch_user", r#"{"id":"u-1","email":"ada@example.com"}"#);

		assert_eq!(store.access_token().await, Some(TokenSecret::new("A0")));
		assert_eq!(store.refresh_token().await, Some(TokenSecret::new("R0")));
		assert!(store.user().await.is_some());
		assert_eq!(store.metrics().promotions(), 1);
		assert_eq!(primary.raw("ch_v2.0_access").as_deref(), Some("QTA="));
	}

	#[tokio::test]
	async fn corrupt_primary_data_wipes_the_session() {
		let (store, primary, legacy) = tiered_store();

		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;
		primary.insert("ch_v2.0_access", "%%% not base64");

		assert_eq!(store.access_token().await, None);
		assert!(primary.snapshot().is_empty());
		assert!(legacy.snapshot().is_empty());
		assert_eq!(store.metrics().corrupt_reads(), 1);
	}

	#[tokio::test]
	async fn unparsable_user_blob_wipes_the_session() {
		let (store, primary, _) = tiered_store();

		store.set_tokens(TokenSecret::new("A1"), None).await;
		store.set_user(valid_user()).await;
		primary.insert("ch_v2.0_user", "bm90IGpzb24=");

		assert!(store.session().await.is_empty());
		assert!(primary.snapshot().is_empty());
	}

	#[tokio::test]
	async fn failing_primary_degrades_to_the_legacy_tier() {
		let (store, primary, legacy) = flaky_store();

		primary.fail_writes(true);
		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;

		assert!(store.is_degraded());
		assert_eq!(legacy.raw("ch_access").as_deref(), Some("A1"));
		assert_eq!(store.access_token().await, Some(TokenSecret::new("A1")));
		assert!(!store.is_authenticated().await);

		store.set_user(valid_user()).await;

		assert!(store.is_authenticated().await);
		assert_eq!(store.metrics().degraded_writes(), 2);

		primary.fail_writes(false);
		store.set_tokens(TokenSecret::new("A2"), None).await;

		assert!(!store.is_degraded());
		assert_eq!(primary.inner.raw("ch_v2.0_access").as_deref(), Some("A2"));
		assert_eq!(primary.inner.raw("ch_v2.0_refresh").as_deref(), Some("R1"));
		assert!(primary.inner.raw("ch_v2.0_user").is_some());
	}

	#[tokio::test]
	async fn failed_promotion_discards_the_legacy_session() {
		let (store, primary, legacy) = flaky_store();

		primary.fail_writes(true);
		legacy.insert("ch_access", "A0");
		legacy.insert("ch_refresh", "R0");

		assert_eq!(store.access_token().await, None);
		assert!(legacy.snapshot().is_empty());
		assert_eq!(store.metrics().abandoned_promotions(), 1);
	}

	#[tokio::test]
	async fn partially_failed_promotion_leaves_no_half_session() {
		let (store, primary, legacy) = flaky_store();

		primary.fail_writes_ending_in("refresh");
		legacy.insert("ch_access", "A0");
		legacy.insert("ch_refresh", "R0");

		let session = store.session().await;

		assert!(session.is_empty());
		assert!(!store.is_authenticated().await);
		assert!(primary.inner.snapshot().is_empty());
		assert!(legacy.snapshot().is_empty());
		assert_eq!(store.metrics().abandoned_promotions(), 1);
	}

	#[tokio::test]
	async fn partially_failed_pair_write_keeps_the_previous_pair() {
		let primary = FlakyTier::default();
		let store = CredentialStore::new(Arc::new(primary.clone()));

		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;
		primary.fail_writes_ending_in("refresh");
		store.set_tokens(TokenSecret::new("A2"), Some(TokenSecret::new("R2"))).await;

		let session = store.session().await;

		assert_eq!(session.access_token, Some(TokenSecret::new("A1")));
		assert_eq!(session.refresh_token, Some(TokenSecret::new("R1")));

		primary.fail_writes(false);
		store.clear().await;
		primary.fail_writes_ending_in("refresh");
		store.set_tokens(TokenSecret::new("A3"), Some(TokenSecret::new("R3"))).await;

		assert!(primary.inner.snapshot().is_empty());
	}

	#[test]
	fn unreadable_session_files_fail_to_open() {
		let path = std::env::temp_dir().join(format!(
			"session_broker_credential_open_{}_{}.json",
			std::process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		));

		std::fs::write(&path, b"{not json").expect("Failed to seed corrupt session file.");

		let err = CredentialStore::open(&path).expect_err("Corrupt files should be rejected.");

		assert!(matches!(err, Error::Storage(StoreError::Corrupt { .. })));

		std::fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary session file {}: {e}", path.display())
		});
	}

	#[tokio::test]
	async fn clear_is_idempotent_and_wipes_both_tiers() {
		let (store, primary, legacy) = tiered_store();

		store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;
		store.set_user(valid_user()).await;
		store.clear().await;
		store.clear().await;

		assert!(store.session().await.is_empty());
		assert!(!store.is_authenticated().await);
		assert!(primary.snapshot().is_empty());
		assert!(legacy.snapshot().is_empty());
	}
}
