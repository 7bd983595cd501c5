//! Lazy one-way promotion of legacy sessions into the primary tier.

// self
use crate::{
	_prelude::*,
	auth::UserProfile,
	store::{KeyedTier, Slot, StoreError},
};

/// Policy applied when the primary tier has no access token but the legacy tier does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LegacyMigration {
	/// Copy the legacy session into empty primary slots on the next read.
	#[default]
	Promote,
	/// Never promote; the legacy tier is only read while the store is degraded.
	Disabled,
}

/// Result of one migration check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
	/// The primary tier already holds an access token.
	Current,
	/// Neither tier holds an access token.
	Empty,
	/// Migration is disabled.
	Skipped,
	/// The legacy session was copied into the primary tier.
	Promoted,
	/// Writing the primary tier failed and the legacy session was discarded.
	Abandoned,
}

impl LegacyMigration {
	/// Runs the migration check.
	///
	/// Only empty primary slots are filled, so a stale legacy value never replaces a primary one.
	/// A legacy user is carried over only when it parses into a valid profile. The promotion is
	/// written as one unit: when any slot fails, the slots it already wrote are rolled back and
	/// the legacy tier is cleared. Read failures on the primary tier propagate.
	pub async fn run(
		self,
		primary: &KeyedTier,
		legacy: &KeyedTier,
	) -> Result<MigrationOutcome, StoreError> {
		if primary.read(Slot::Access).await?.is_some() {
			return Ok(MigrationOutcome::Current);
		}
		if self == Self::Disabled {
			return Ok(MigrationOutcome::Skipped);
		}

		let Some(access) = legacy.read(Slot::Access).await? else {
			return Ok(MigrationOutcome::Empty);
		};

		match Self::promote(primary, legacy, access).await {
			Ok(()) => {
				tracing::info!("Promoted legacy session into the primary tier.");

				Ok(MigrationOutcome::Promoted)
			},
			Err(e) => {
				tracing::warn!(error = %e, "Legacy promotion failed; discarding legacy data.");

				if let Err(e) = legacy.clear().await {
					tracing::warn!(error = %e, "Failed to clear the legacy tier.");
				}

				Ok(MigrationOutcome::Abandoned)
			},
		}
	}

	async fn promote(
		primary: &KeyedTier,
		legacy: &KeyedTier,
		access: String,
	) -> Result<(), StoreError> {
		let refresh = legacy.read(Slot::Refresh).await?;
		let user = legacy.read(Slot::User).await?.and_then(|raw| valid_user_blob(&raw));
		let mut writes = vec![(Slot::Access, access)];

		if let Some(refresh) = refresh
			&& primary.read(Slot::Refresh).await?.is_none()
		{
			writes.push((Slot::Refresh, refresh));
		}
		if let Some(user) = user
			&& primary.read(Slot::User).await?.is_none()
		{
			writes.push((Slot::User, user));
		}

		primary.write_all(&writes).await
	}
}

fn valid_user_blob(raw: &str) -> Option<String> {
	let user = serde_json::from_str::<Value>(raw).ok().and_then(UserProfile::from_value);

	match user {
		Some(user) if user.is_valid() => Some(raw.to_owned()),
		_ => {
			tracing::debug!("Skipping incomplete legacy user record during promotion.");

			None
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::{EncodedTier, MemoryTier, TierKeys};

	fn tiers() -> (KeyedTier, KeyedTier, MemoryTier, MemoryTier) {
		let primary_backend = MemoryTier::default();
		let legacy_backend = MemoryTier::default();
		let primary = KeyedTier::new(
			Arc::new(EncodedTier::new(primary_backend.clone())),
			TierKeys::primary(),
		);
		let legacy = KeyedTier::new(Arc::new(legacy_backend.clone()), TierKeys::legacy());

		(primary, legacy, primary_backend, legacy_backend)
	}

	#[tokio::test]
	async fn promotion_is_idempotent() {
		let (primary, legacy, primary_backend, legacy_backend) = tiers();

		legacy_backend.insert("ch_access", "A0");
		legacy_backend.insert("ch_refresh", "R0");
		legacy_backend.insert("ch_user", r#"{"id":"u-1","email":"a@b.io"}"#);

		let first = LegacyMigration::Promote
			.run(&primary, &legacy)
			.await
			.expect("First migration should succeed.");
		let after_first = primary_backend.snapshot();
		let second = LegacyMigration::Promote
			.run(&primary, &legacy)
			.await
			.expect("Second migration should succeed.");

		assert_eq!(first, MigrationOutcome::Promoted);
		assert_eq!(second, MigrationOutcome::Current);
		assert_eq!(primary_backend.snapshot(), after_first);
		assert_eq!(
			primary.read(Slot::Refresh).await.expect("Primary reads should succeed.").as_deref(),
			Some("R0")
		);
	}

	#[tokio::test]
	async fn invalid_legacy_users_are_not_promoted() {
		let (primary, legacy, _, legacy_backend) = tiers();

		legacy_backend.insert("ch_access", "A0");
		legacy_backend.insert("ch_user", r#"{"id":"u-1"}"#);

		LegacyMigration::Promote.run(&primary, &legacy).await.expect("Migration should succeed.");

		assert_eq!(primary.read(Slot::User).await.expect("Primary reads should succeed."), None);
	}

	#[tokio::test]
	async fn existing_primary_values_are_never_overwritten() {
		let (primary, legacy, _, legacy_backend) = tiers();

		primary.write(Slot::Refresh, "R-primary".into()).await.expect("Seed should succeed.");
		legacy_backend.insert("ch_access", "A0");
		legacy_backend.insert("ch_refresh", "R-legacy");

		LegacyMigration::Promote.run(&primary, &legacy).await.expect("Migration should succeed.");

		assert_eq!(
			primary.read(Slot::Refresh).await.expect("Primary reads should succeed.").as_deref(),
			Some("R-primary")
		);
	}

	#[tokio::test]
	async fn disabled_policy_and_empty_tiers_do_nothing() {
		let (primary, legacy, primary_backend, legacy_backend) = tiers();

		assert_eq!(
			LegacyMigration::Promote.run(&primary, &legacy).await.expect("Check should succeed."),
			MigrationOutcome::Empty
		);

		legacy_backend.insert("ch_access", "A0");

		assert_eq!(
			LegacyMigration::Disabled.run(&primary, &legacy).await.expect("Check should succeed."),
			MigrationOutcome::Skipped
		);
		assert!(primary_backend.snapshot().is_empty());
	}
}
