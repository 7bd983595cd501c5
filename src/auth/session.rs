//! Point-in-time view of the credentials held by the store.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserProfile},
};

/// Snapshot of the persisted session.
///
/// Produced by [`CredentialStore::session`](crate::store::CredentialStore::session); all three
/// fields are read under the store lock, so the snapshot never mixes two different writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
	/// Bearer token attached to outbound requests.
	pub access_token: Option<TokenSecret>,
	/// Token exchanged for a new access token when the current one expires.
	pub refresh_token: Option<TokenSecret>,
	/// Signed-in user, present only when the stored record is valid.
	pub user: Option<UserProfile>,
}
impl Session {
	/// Returns `true` when no credential or user data is held.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
	}

	/// Returns `true` when a non-empty access token is present.
	pub fn has_access_token(&self) -> bool {
		self.access_token.as_ref().is_some_and(|token| !token.is_empty())
	}
}
