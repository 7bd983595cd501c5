//! Opaque user profile bag with the minimal validity checks the session relies on.

// crates.io
use serde_json::Map;
// self
use crate::_prelude::*;

/// User profile persisted alongside the session tokens.
///
/// The profile is an opaque JSON object. Only `id` and `email` are inspected, to decide whether
/// a stored record is complete enough to count as a signed-in user; every other field is carried
/// through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(Map<String, Value>);
impl UserProfile {
	/// Creates an empty profile.
	pub fn new() -> Self {
		Self::default()
	}

	/// Wraps a JSON value, returning `None` unless it is an object.
	pub fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(fields) => Some(Self(fields)),
			_ => None,
		}
	}

	/// Adds or replaces a single field.
	pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());

		self
	}

	/// Returns the raw field value, if present.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	/// Returns every stored field.
	pub fn fields(&self) -> &Map<String, Value> {
		&self.0
	}

	/// Returns the identifier as a string; numeric identifiers are rendered in decimal.
	pub fn id(&self) -> Option<String> {
		match self.0.get("id")? {
			Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
			Value::Number(id) => Some(id.to_string()),
			_ => None,
		}
	}

	/// Returns the email field when it looks like an address.
	pub fn email(&self) -> Option<&str> {
		let email = self.0.get("email")?.as_str()?;
		let (local, domain) = email.split_once('@')?;

		(!local.trim().is_empty() && !domain.trim().is_empty()).then_some(email)
	}

	/// A profile is usable only with both an identifier and an email-like field.
	pub fn is_valid(&self) -> bool {
		self.id().is_some() && self.email().is_some()
	}

	/// Overwrites fields present in `update`, keeping every field it does not mention.
	pub fn merge(&mut self, update: UserProfile) {
		for (key, value) in update.0 {
			self.0.insert(key, value);
		}
	}
}
