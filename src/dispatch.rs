//! Authenticated request dispatch with one refresh-and-replay on 401.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	classify::{ApiError, DefaultErrorClassifier, ErrorClassifier, ErrorKind, FailureContext},
	config::SessionConfig,
	http::{ApiRequest, ApiResponse, HttpTransport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::RefreshCoordinator,
	store::CredentialStore,
};

/// Application navigation hooks used when the session is lost.
pub trait Navigator
where
	Self: Send + Sync,
{
	/// Returns the path the user is currently on, when known.
	fn current_path(&self) -> Option<String>;

	/// Sends the user to `login_path`.
	fn redirect_to_login(&self, login_path: &str);
}

/// Navigator for headless callers; redirects are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;
impl Navigator for NoopNavigator {
	fn current_path(&self) -> Option<String> {
		None
	}

	fn redirect_to_login(&self, login_path: &str) {
		tracing::debug!(login_path, "Login redirect requested without a navigator.");
	}
}

/// Per-client identity headers stamped onto every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestIdentity {
	client_version: String,
	device_id: Option<String>,
}
impl RequestIdentity {
	const DEVICE_ID_LEN: usize = 16;

	/// Derives the identity from the configured version and device label.
	pub fn from_config(config: &SessionConfig) -> Self {
		Self {
			client_version: config.client_version.clone(),
			device_id: config.device_label.as_deref().map(Self::device_id),
		}
	}

	/// Returns the `X-Device-ID` value, when a device label is configured.
	pub fn device_id_header(&self) -> Option<&str> {
		self.device_id.as_deref()
	}

	/// Stamps `X-Request-ID`, `X-Client-Version`, and `X-Device-ID` onto `request`.
	pub fn apply(&self, request: &mut ApiRequest) {
		request.set_header("x-request-id", format!("{:032x}", rand::random::<u128>()));
		request.set_header("x-client-version", self.client_version.clone());

		if let Some(device_id) = &self.device_id {
			request.set_header("x-device-id", device_id.clone());
		}
	}

	fn device_id(label: &str) -> String {
		let digest = Sha256::digest(label.as_bytes());

		digest.iter().map(|byte| format!("{byte:02x}")).collect::<String>()[..Self::DEVICE_ID_LEN]
			.to_owned()
	}
}

/// Sends requests with the session token and recovers from one expired token per request.
///
/// A 401 on a request that has not been replayed yet marks it as replayed, asks the
/// [`RefreshCoordinator`] for a token, and resends it once. When the refresh fails, or the
/// replay is rejected again, the 401 surfaces as [`ErrorKind::AuthExpired`] and the user is
/// redirected to the login path unless they are already inside an auth flow.
///
/// [`ErrorKind::AuthExpired`]: crate::classify::ErrorKind::AuthExpired
pub struct Dispatcher {
	config: SessionConfig,
	transport: Arc<dyn HttpTransport>,
	store: Arc<CredentialStore>,
	coordinator: Arc<RefreshCoordinator>,
	classifier: Arc<dyn ErrorClassifier>,
	navigator: Arc<dyn Navigator>,
	identity: RequestIdentity,
}
impl Dispatcher {
	/// Creates a dispatcher sharing the coordinator's store.
	pub fn new(
		config: SessionConfig,
		transport: Arc<dyn HttpTransport>,
		coordinator: Arc<RefreshCoordinator>,
	) -> Self {
		Self {
			identity: RequestIdentity::from_config(&config),
			store: coordinator.store().clone(),
			config,
			transport,
			coordinator,
			classifier: Arc::new(DefaultErrorClassifier),
			navigator: Arc::new(NoopNavigator),
		}
	}

	/// Installs the navigation hooks.
	pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
		self.navigator = navigator;

		self
	}

	/// Overrides the failure classifier.
	pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Returns the configuration.
	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Returns the credential store.
	pub fn store(&self) -> &Arc<CredentialStore> {
		&self.store
	}

	/// Returns the refresh coordinator.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Sends `request` with the session token.
	pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		self.run(request, true, "dispatch").await
	}

	/// Sends `request` without a token and without 401 recovery (login, signup, password reset).
	pub async fn dispatch_public(&self, request: ApiRequest) -> Result<ApiResponse> {
		self.run(request, false, "dispatch_public").await
	}

	async fn run(
		&self,
		request: ApiRequest,
		authenticated: bool,
		stage: &'static str,
	) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Dispatch;

		let span = FlowSpan::new(KIND, stage);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.deliver(request, authenticated)).await;

		obs::record_flow_result(KIND, &result);

		result
	}

	async fn deliver(&self, mut request: ApiRequest, authenticated: bool) -> Result<ApiResponse> {
		self.identity.apply(&mut request);

		if authenticated && let Some(token) = self.store.access_token().await {
			request.set_bearer(&token);
		}

		let mut throttled = 0;

		loop {
			let response = match self.transport.send(&request).await {
				Ok(response) => response,
				Err(e) => {
					tracing::warn!(
						method = %request.method,
						url = %request.url,
						error = %e.detail(),
						"Request failed without a response."
					);

					let context = FailureContext::from_transport(&e);

					return Err(self.classifier.classify(&context).into());
				},
			};

			if response.is_success() {
				tracing::debug!(
					method = %request.method,
					url = %request.url,
					status = response.status,
					body = %response.preview(),
					"Request succeeded."
				);

				return Ok(response);
			}

			tracing::warn!(
				method = %request.method,
				url = %request.url,
				status = response.status,
				body = %response.preview(),
				"Request failed."
			);

			let error = self.classify(&response);

			if error.kind == ErrorKind::RateLimited
				&& throttled < self.config.rate_limit.max_retries
			{
				let delay = self.config.rate_limit.delay_for(error.retry_after);

				throttled += 1;

				tracing::info!(
					method = %request.method,
					url = %request.url,
					delay_ms = delay.as_millis() as u64,
					"Rate limited; waiting before resending."
				);
				tokio::time::sleep(delay).await;

				continue;
			}
			if !authenticated || response.status != 401 {
				return Err(error.into());
			}
			if request.is_retried() {
				tracing::warn!("Request was rejected again after a refresh; clearing the session.");
				self.store.clear().await;
				self.redirect_to_login();

				return Err(error.into());
			}

			request.mark_retried();

			match self.refreshed_token(request.bearer()).await {
				Some(token) => {
					tracing::info!(
						method = %request.method,
						url = %request.url,
						"Replaying request with a refreshed token."
					);
					request.set_bearer(&token);
				},
				None => {
					self.redirect_to_login();

					return Err(error.into());
				},
			}
		}
	}

	async fn refreshed_token(&self, stale: Option<TokenSecret>) -> Option<TokenSecret> {
		match self.coordinator.refresh_stale(stale.as_ref()).await {
			Ok(token) => Some(token),
			Err(e) => {
				tracing::warn!(error = %e, "Session expired; token refresh failed.");

				None
			},
		}
	}

	fn classify(&self, response: &ApiResponse) -> ApiError {
		self.classifier.classify(&FailureContext::from_response(response))
	}

	fn redirect_to_login(&self) {
		if let Some(path) = self.navigator.current_path()
			&& self.config.is_auth_path(&path)
		{
			tracing::debug!(path = %path, "Inside an auth flow; skipping the login redirect.");

			return;
		}

		self.navigator.redirect_to_login(&self.config.login_redirect);
	}
}
impl Debug for Dispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Dispatcher")
			.field("api_base_url", &self.config.api_base_url.as_str())
			.field("coordinator", &self.coordinator)
			.finish_non_exhaustive()
	}
}
