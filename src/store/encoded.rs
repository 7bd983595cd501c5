//! Adapter that encodes values before they reach the backing tier.

// crates.io
use base64::{Engine, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	store::{SessionTier, StoreError, StoreFuture},
};

/// Base64-encodes every value written to the inner tier.
///
/// Values that fail to decode on read surface as [`StoreError::Corrupt`], which the credential
/// store answers by wiping the session.
#[derive(Clone, Debug, Default)]
pub struct EncodedTier<T>(T);
impl<T> EncodedTier<T>
where
	T: SessionTier,
{
	/// Wraps `inner`.
	pub fn new(inner: T) -> Self {
		Self(inner)
	}

	/// Returns the wrapped tier.
	pub fn inner(&self) -> &T {
		&self.0
	}

	fn decode(key: &str, raw: &str) -> Result<String, StoreError> {
		let bytes = STANDARD.decode(raw.trim()).map_err(|e| StoreError::Corrupt {
			message: format!("Value under `{key}` is not valid base64: {e}"),
		})?;

		String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
			message: format!("Value under `{key}` is not valid UTF-8: {e}"),
		})
	}
}
impl<T> SessionTier for EncodedTier<T>
where
	T: SessionTier,
{
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move {
			match self.0.get(key).await? {
				Some(raw) => Self::decode(key, &raw).map(Some),
				None => Ok(None),
			}
		})
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.0.set(key, STANDARD.encode(value)).await })
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		self.0.remove(key)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryTier;

	#[tokio::test]
	async fn values_are_encoded_at_rest() {
		let backend = MemoryTier::default();
		let tier = EncodedTier::new(backend.clone());

		tier.set("ch_v2.0_access", "A1".into()).await.expect("Encoded writes should succeed.");

		assert_eq!(backend.raw("ch_v2.0_access").as_deref(), Some("QTE="));
		assert_eq!(
			tier.get("ch_v2.0_access").await.expect("Encoded reads should succeed.").as_deref(),
			Some("A1")
		);
	}

	#[tokio::test]
	async fn undecodable_values_are_corrupt() {
		let backend = MemoryTier::default();
		let tier = EncodedTier::new(backend.clone());

		backend.insert("ch_v2.0_access", "%%%");

		let err = tier.get("ch_v2.0_access").await.expect_err("Garbage should not decode.");

		assert!(matches!(err, StoreError::Corrupt { .. }));
	}
}
