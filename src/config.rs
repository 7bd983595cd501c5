//! Session configuration: API location, auth-flow paths, timeouts, and retry defaults.

// self
use crate::{_prelude::*, error::ConfigError, retry::RetryConfig};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Validated session configuration.
///
/// Build it with [`SessionConfig::parse`] or [`SessionConfig::new`] plus the `with_*` methods, or
/// load it from JSON with [`SessionConfig::from_json`]. Paths are absolute (start with `/`) and
/// are appended to [`api_base_url`](Self::api_base_url) verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
	/// Base URL every API path is appended to, without a trailing slash.
	pub api_base_url: Url,
	/// Token refresh endpoint path.
	pub refresh_path: String,
	/// Credential login endpoint path.
	pub login_path: String,
	/// Logout endpoint path.
	pub logout_path: String,
	/// Application path the user is sent to when the session is lost.
	pub login_redirect: String,
	/// Application paths where the login redirect is suppressed.
	pub auth_paths: Vec<String>,
	/// Per-request transport timeout.
	pub request_timeout: Duration,
	/// Optional bound on the refresh round-trip.
	pub refresh_timeout: Option<Duration>,
	/// Whether network-class refresh failures clear the session.
	pub clear_on_transient_refresh_failure: bool,
	/// Value of the `X-Client-Version` header.
	pub client_version: String,
	/// Stable device label hashed into the `X-Device-ID` header.
	pub device_label: Option<String>,
	/// Default retry parameters for [`SessionClient`](crate::client::SessionClient) calls.
	pub retry: RetrySettings,
	/// How the dispatcher waits out `429 Too Many Requests`.
	pub rate_limit: RateLimitSettings,
}
impl SessionConfig {
	/// Creates a configuration with default paths and timeouts.
	pub fn new(api_base_url: Url) -> Self {
		Self {
			api_base_url: trim_base(api_base_url),
			refresh_path: "/user/auth/token/refresh/".into(),
			login_path: "/user/auth/login/".into(),
			logout_path: "/user/auth/logout/".into(),
			login_redirect: "/login".into(),
			auth_paths: vec!["/login".into(), "/signup".into(), "/verify-email".into()],
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			refresh_timeout: None,
			clear_on_transient_refresh_failure: true,
			client_version: env!("CARGO_PKG_VERSION").into(),
			device_label: None,
			retry: RetrySettings::default(),
			rate_limit: RateLimitSettings::default(),
		}
	}

	/// Parses `api_base_url` and validates the resulting defaults.
	pub fn parse(api_base_url: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(api_base_url)
			.map_err(|_| ConfigError::InvalidBaseUrl { url: api_base_url.to_owned() })?;
		let config = Self::new(url);

		config.validate()?;

		Ok(config)
	}

	/// Loads and validates a JSON document.
	///
	/// Only `api_base_url` is required; durations are given in milliseconds
	/// (`request_timeout_ms`, `refresh_timeout_ms`, `retry.delay_ms`).
	pub fn from_json(document: &str) -> Result<Self, ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_str(document);
		let raw: RawConfig = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| ConfigError::Parse { source })?;
		let config = raw.into_config()?;

		config.validate()?;

		Ok(config)
	}

	/// Checks every setting, returning the first problem found.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let base = &self.api_base_url;

		if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
			return Err(ConfigError::InvalidBaseUrl { url: base.to_string() });
		}

		for path in [&self.refresh_path, &self.login_path, &self.logout_path, &self.login_redirect]
			.into_iter()
			.chain(&self.auth_paths)
		{
			if !path.starts_with('/') {
				return Err(ConfigError::RelativePath { path: path.clone() });
			}
		}

		self.retry.validate()
	}

	/// Resolves an absolute API path against the base URL.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		if !path.starts_with('/') {
			return Err(ConfigError::RelativePath { path: path.to_owned() });
		}

		let joined = format!("{}{path}", self.api_base_url.as_str().trim_end_matches('/'));

		Url::parse(&joined)
			.map_err(|source| ConfigError::InvalidEndpoint { path: path.to_owned(), source })
	}

	/// Returns `true` when `current_path` belongs to an auth flow (login, signup, verification).
	///
	/// Matching is by whole path segment, ignoring any query string or fragment.
	pub fn is_auth_path(&self, current_path: &str) -> bool {
		let path = current_path.split(['?', '#']).next().unwrap_or_default();

		self.auth_paths.iter().any(|auth| {
			let auth = auth.trim_end_matches('/');

			path.strip_prefix(auth).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
		})
	}

	/// Overrides the per-request timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Bounds the refresh round-trip.
	pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Controls whether network-class refresh failures clear the session.
	pub fn with_transient_refresh_clear(mut self, clear: bool) -> Self {
		self.clear_on_transient_refresh_failure = clear;

		self
	}

	/// Overrides the `X-Client-Version` header value.
	pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
		self.client_version = version.into();

		self
	}

	/// Sets the device label hashed into `X-Device-ID`.
	pub fn with_device_label(mut self, label: impl Into<String>) -> Self {
		self.device_label = Some(label.into());

		self
	}

	/// Overrides the login redirect target.
	pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
		self.login_redirect = path.into();

		self
	}

	/// Replaces the auth-flow paths where redirects are suppressed.
	pub fn with_auth_paths<I, S>(mut self, paths: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.auth_paths = paths.into_iter().map(Into::into).collect();

		self
	}

	/// Overrides the default retry parameters.
	pub fn with_retry(mut self, retry: RetrySettings) -> Self {
		self.retry = retry;

		self
	}

	/// Overrides the `429` handling.
	pub fn with_rate_limit(mut self, rate_limit: RateLimitSettings) -> Self {
		self.rate_limit = rate_limit;

		self
	}
}

/// Serializable retry parameters, turned into a [`RetryConfig`] per call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
	/// Retries after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry, in milliseconds.
	pub delay_ms: u64,
	/// Factor applied to the delay for every further retry.
	pub backoff_multiplier: f64,
}
impl RetrySettings {
	/// Builds a [`RetryConfig`] with the default retry condition.
	pub fn to_retry_config(&self) -> RetryConfig {
		RetryConfig::default()
			.with_max_retries(self.max_retries)
			.with_delay(Duration::from_millis(self.delay_ms))
			.with_backoff_multiplier(self.backoff_multiplier)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1. {
			return Err(ConfigError::InvalidRetry {
				reason: "backoff_multiplier must be a finite number of at least 1",
			});
		}

		Ok(())
	}
}
impl Default for RetrySettings {
	fn default() -> Self {
		Self { max_retries: 3, delay_ms: 1_000, backoff_multiplier: 2. }
	}
}

/// Resend policy for `429 Too Many Requests` responses.
///
/// The dispatcher waits for the response's `Retry-After` (or [`default_delay_ms`] when the
/// header is missing), capped at [`max_delay_ms`], and resends up to [`max_retries`] times.
///
/// [`default_delay_ms`]: Self::default_delay_ms
/// [`max_delay_ms`]: Self::max_delay_ms
/// [`max_retries`]: Self::max_retries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
	/// Resends after the first throttled response; `0` surfaces every 429.
	pub max_retries: u32,
	/// Wait used when the response carries no usable `Retry-After`, in milliseconds.
	pub default_delay_ms: u64,
	/// Upper bound on any single wait, in milliseconds.
	pub max_delay_ms: u64,
}
impl RateLimitSettings {
	/// Returns how long to wait before resending, given the server's `Retry-After`.
	pub fn delay_for(&self, retry_after: Option<Duration>) -> Duration {
		retry_after
			.unwrap_or(Duration::from_millis(self.default_delay_ms))
			.min(Duration::from_millis(self.max_delay_ms))
	}
}
impl Default for RateLimitSettings {
	fn default() -> Self {
		Self { max_retries: 1, default_delay_ms: 5_000, max_delay_ms: 60_000 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	api_base_url: String,
	refresh_path: Option<String>,
	login_path: Option<String>,
	logout_path: Option<String>,
	login_redirect: Option<String>,
	auth_paths: Option<Vec<String>>,
	request_timeout_ms: Option<u64>,
	refresh_timeout_ms: Option<u64>,
	clear_on_transient_refresh_failure: Option<bool>,
	client_version: Option<String>,
	device_label: Option<String>,
	#[serde(default)]
	retry: RetrySettings,
	#[serde(default)]
	rate_limit: RateLimitSettings,
}
impl RawConfig {
	fn into_config(self) -> Result<SessionConfig, ConfigError> {
		let url = Url::parse(&self.api_base_url)
			.map_err(|_| ConfigError::InvalidBaseUrl { url: self.api_base_url.clone() })?;
		let mut config =
			SessionConfig::new(url).with_retry(self.retry).with_rate_limit(self.rate_limit);

		if let Some(path) = self.refresh_path {
			config.refresh_path = path;
		}
		if let Some(path) = self.login_path {
			config.login_path = path;
		}
		if let Some(path) = self.logout_path {
			config.logout_path = path;
		}
		if let Some(path) = self.login_redirect {
			config.login_redirect = path;
		}
		if let Some(paths) = self.auth_paths {
			config.auth_paths = paths;
		}
		if let Some(ms) = self.request_timeout_ms {
			config.request_timeout = Duration::from_millis(ms);
		}
		if let Some(clear) = self.clear_on_transient_refresh_failure {
			config.clear_on_transient_refresh_failure = clear;
		}
		if let Some(version) = self.client_version {
			config.client_version = version;
		}

		config.refresh_timeout = self.refresh_timeout_ms.map(Duration::from_millis);
		config.device_label = self.device_label;

		Ok(config)
	}
}

fn trim_base(mut url: Url) -> Url {
	let trimmed = url.path().trim_end_matches('/').to_owned();

	url.set_path(&trimmed);

	url
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn endpoints_join_onto_the_trimmed_base() {
		let config =
			SessionConfig::parse("https://api.example.com/api///").expect("Base URL should parse.");

		assert_eq!(config.api_base_url.as_str(), "https://api.example.com/api");
		assert_eq!(
			config.endpoint("/causes/?page=2").expect("Path should join.").as_str(),
			"https://api.example.com/api/causes/?page=2"
		);
		assert!(matches!(
			config.endpoint("causes/"),
			Err(ConfigError::RelativePath { .. })
		));
	}

	#[test]
	fn non_http_bases_are_rejected() {
		assert!(matches!(
			SessionConfig::parse("ftp://files.example.com"),
			Err(ConfigError::InvalidBaseUrl { .. })
		));
		assert!(matches!(
			SessionConfig::parse("not a url"),
			Err(ConfigError::InvalidBaseUrl { .. })
		));
	}

	#[test]
	fn auth_paths_match_whole_segments() {
		let config = SessionConfig::parse("http://api.test").expect("Base URL should parse.");

		assert!(config.is_auth_path("/login"));
		assert!(config.is_auth_path("/login?next=/donate"));
		assert!(config.is_auth_path("/verify-email/abc123"));
		assert!(config.is_auth_path("/signup/"));
		assert!(!config.is_auth_path("/login-help"));
		assert!(!config.is_auth_path("/causes/login"));
		assert!(!config.is_auth_path("/"));
	}

	#[test]
	fn json_documents_override_defaults() {
		let config = SessionConfig::from_json(
			r#"{
				"api_base_url": "https://api.example.com/api/",
				"refresh_timeout_ms": 5000,
				"clear_on_transient_refresh_failure": false,
				"device_label": "kiosk-7",
				"retry": { "max_retries": 5 }
			}"#,
		)
		.expect("Configuration document should load.");

		assert_eq!(config.api_base_url.as_str(), "https://api.example.com/api");
		assert_eq!(config.refresh_timeout, Some(Duration::from_secs(5)));
		assert!(!config.clear_on_transient_refresh_failure);
		assert_eq!(config.device_label.as_deref(), Some("kiosk-7"));
		assert_eq!(config.retry.max_retries, 5);
		assert_eq!(config.retry.delay_ms, 1_000);
		assert_eq!(config.request_timeout, Duration::from_secs(30));
		assert_eq!(config.login_path, "/user/auth/login/");
	}

	#[test]
	fn malformed_documents_report_the_failing_path() {
		let err = SessionConfig::from_json(
			r#"{ "api_base_url": "https://api.example.com", "retry": { "delay_ms": "slow" } }"#,
		)
		.expect_err("String delays should be rejected.");
		let ConfigError::Parse { source } = err else {
			panic!("Expected a parse failure.");
		};

		assert_eq!(source.path().to_string(), "retry.delay_ms");
	}

	#[test]
	fn invalid_settings_are_rejected() {
		let config = SessionConfig::parse("http://api.test").expect("Base URL should parse.");

		assert!(matches!(
			config.clone().with_login_redirect("login").validate(),
			Err(ConfigError::RelativePath { .. })
		));
		assert!(matches!(
			config
				.with_retry(RetrySettings { backoff_multiplier: 0.5, ..Default::default() })
				.validate(),
			Err(ConfigError::InvalidRetry { .. })
		));
	}

	#[test]
	fn rate_limit_waits_follow_retry_after_within_the_cap() {
		let settings = RateLimitSettings::default();

		assert_eq!(settings.delay_for(None), Duration::from_secs(5));
		assert_eq!(settings.delay_for(Some(Duration::from_secs(2))), Duration::from_secs(2));
		assert_eq!(settings.delay_for(Some(Duration::from_secs(3_600))), Duration::from_secs(60));

		let config = SessionConfig::from_json(
			r#"{ "api_base_url": "http://api.test", "rate_limit": { "max_retries": 0 } }"#,
		)
		.expect("Configuration document should load.");

		assert_eq!(config.rate_limit.max_retries, 0);
		assert_eq!(config.rate_limit.default_delay_ms, 5_000);
	}

	#[test]
	fn retry_settings_build_a_retry_config() {
		let retry = RetrySettings::default().to_retry_config();

		assert_eq!(retry.max_retries, 3);
		assert_eq!(retry.delay, Duration::from_millis(1_000));
		assert_eq!(retry.backoff_multiplier, 2.);
	}
}
