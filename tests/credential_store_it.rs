// std
use std::{
	env, fs,
	path::{Path, PathBuf},
	process,
	sync::Arc,
};
// crates.io
use time::OffsetDateTime;
// self
use session_broker::{
	auth::{TokenSecret, UserProfile},
	store::{CredentialStore, MemoryTier, SessionTier, StoreMetrics},
};

fn temp_path(name: &str) -> PathBuf {
	env::temp_dir().join(format!(
		"session_broker_store_it_{name}_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	))
}

fn open_store(path: &Path, legacy: &MemoryTier, metrics: Arc<StoreMetrics>) -> CredentialStore {
	let legacy: Arc<dyn SessionTier> = Arc::new(legacy.clone());

	CredentialStore::open(path)
		.expect("Failed to open the primary tier file.")
		.with_legacy(legacy)
		.with_metrics(metrics)
}

#[tokio::test]
async fn legacy_session_is_promoted_into_a_persistent_primary_tier() {
	let path = temp_path("promote");
	let legacy = MemoryTier::default();
	let metrics = Arc::new(StoreMetrics::default());

	legacy.insert("ch_access", "A1");
	legacy.insert("ch_refresh", "R1");
	legacy.insert("ch_user", r#"{"id":9,"email":"grace@example.com"}"#);

	let store = open_store(&path, &legacy, metrics.clone());

	assert!(store.is_authenticated().await);
	assert_eq!(metrics.promotions(), 1);

	drop(store);

	let reopened = open_store(&path, &MemoryTier::default(), Arc::new(StoreMetrics::default()));
	let session = reopened.session().await;

	assert_eq!(session.access_token, Some(TokenSecret::new("A1")));
	assert_eq!(session.refresh_token, Some(TokenSecret::new("R1")));
	assert_eq!(session.user.as_ref().and_then(UserProfile::email), Some("grace@example.com"));

	let raw = fs::read_to_string(&path).expect("Primary tier file should exist.");

	assert!(!raw.contains("\"A1\""), "Primary tier values should be encoded at rest.");

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary tier file {}: {e}", path.display())
	});
}

#[tokio::test]
async fn clearing_removes_both_tiers() {
	let path = temp_path("clear");
	let legacy = MemoryTier::default();
	let store = open_store(&path, &legacy, Arc::new(StoreMetrics::default()));

	store.set_tokens(TokenSecret::new("A1"), Some(TokenSecret::new("R1"))).await;
	store.set_user(UserProfile::new().with_field("id", 1)).await;
	store.clear().await;

	assert!(store.session().await.is_empty());
	assert!(legacy.snapshot().is_empty());

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary tier file {}: {e}", path.display())
	});
}
