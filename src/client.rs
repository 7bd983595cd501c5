//! Service-layer facade: JSON calls relative to the API base with retries, plus login/logout.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserProfile},
	config::SessionConfig,
	dispatch::{Dispatcher, Navigator},
	http::{ApiRequest, HttpTransport, Method},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	refresh::{HttpRefreshEndpoint, RefreshCoordinator},
	retry::{RetryCondition, RetryConfig, with_retry},
	store::CredentialStore,
};

/// Email/password credentials posted to the login endpoint.
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
	/// Account email.
	pub email: String,
	/// Account password.
	pub password: String,
}
impl LoginCredentials {
	/// Creates a credential pair.
	pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
		Self { email: email.into(), password: password.into() }
	}
}
impl Debug for LoginCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LoginCredentials")
			.field("email", &self.email)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// Successful login payload.
#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
	/// Issued access token.
	pub access: TokenSecret,
	/// Issued refresh token.
	pub refresh: TokenSecret,
	/// Signed-in user, when the API includes it.
	#[serde(default)]
	pub user: Option<UserProfile>,
}

/// JSON API client bound to one session.
///
/// `GET` calls retry with the configured [`RetryConfig`]; mutating calls keep the same backoff
/// but only retry on 5xx responses, since a lost response may hide an applied change.
#[derive(Debug)]
pub struct SessionClient {
	dispatcher: Dispatcher,
	retry: RetryConfig,
}
impl SessionClient {
	/// Builds a client over reqwest with a process-local credential store.
	#[cfg(feature = "reqwest")]
	pub fn new(config: SessionConfig) -> Result<Self> {
		let transport = crate::http::ReqwestTransport::new(config.request_timeout)?;

		Self::with_transport(config, Arc::new(transport), Arc::new(CredentialStore::in_memory()))
	}

	/// Assembles a client from a transport and a credential store.
	pub fn with_transport(
		config: SessionConfig,
		transport: Arc<dyn HttpTransport>,
		store: Arc<CredentialStore>,
	) -> Result<Self> {
		config.validate()?;

		let endpoint = HttpRefreshEndpoint::from_config(&config, transport.clone())?;
		let coordinator = RefreshCoordinator::new(store, Arc::new(endpoint))
			.with_timeout(config.refresh_timeout)
			.with_transient_clear(config.clear_on_transient_refresh_failure);
		let retry = config.retry.to_retry_config();
		let dispatcher = Dispatcher::new(config, transport, Arc::new(coordinator));

		Ok(Self { dispatcher, retry })
	}

	/// Wraps an existing dispatcher.
	pub fn from_dispatcher(dispatcher: Dispatcher) -> Self {
		Self { retry: dispatcher.config().retry.to_retry_config(), dispatcher }
	}

	/// Installs the navigation hooks used on session loss.
	pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
		self.dispatcher = self.dispatcher.with_navigator(navigator);

		self
	}

	/// Overrides the default retry parameters.
	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;

		self
	}

	/// Returns the dispatcher.
	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Returns the credential store.
	pub fn store(&self) -> &Arc<CredentialStore> {
		self.dispatcher.store()
	}

	/// Returns `true` while the store holds a usable session.
	pub async fn is_authenticated(&self) -> bool {
		self.store().is_authenticated().await
	}

	/// Returns the retry parameters applied to `method`.
	pub fn retry_for(&self, method: Method) -> RetryConfig {
		if method.is_idempotent() {
			self.retry.clone()
		} else {
			self.retry.clone().with_condition(RetryCondition::server_only())
		}
	}

	/// `GET`s `path` and decodes the JSON response.
	pub async fn get<T>(&self, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.send(self.build(Method::Get, path)?).await
	}

	/// `POST`s `body` to `path` and decodes the JSON response.
	pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(self.build(Method::Post, path)?.with_json(body)?).await
	}

	/// `PUT`s `body` to `path` and decodes the JSON response.
	pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(self.build(Method::Put, path)?.with_json(body)?).await
	}

	/// `PATCH`es `path` with `body` and decodes the JSON response.
	pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(self.build(Method::Patch, path)?.with_json(body)?).await
	}

	/// `DELETE`s `path` and decodes the JSON response (`null` for empty bodies).
	pub async fn delete<T>(&self, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.send(self.build(Method::Delete, path)?).await
	}

	/// Sends one call with explicit retry parameters.
	pub async fn request<T>(
		&self,
		method: Method,
		path: &str,
		body: Option<Value>,
		retry: &RetryConfig,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut request = self.build(method, path)?;

		request.body = body;

		self.send_with(request, retry).await
	}

	/// Logs in with `credentials` and stores the issued session.
	pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse> {
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let config = self.dispatcher.config();
				let request = ApiRequest::post(config.endpoint(&config.login_path)?)
					.with_json(credentials)?;
				let response = self.dispatcher.dispatch_public(request).await?;
				let login = response.json::<LoginResponse>()?;
				let store = self.store();

				store.clear().await;
				store.set_tokens(login.access.clone(), Some(login.refresh.clone())).await;

				if let Some(user) = &login.user {
					store.set_user(user.clone()).await;
				}

				tracing::info!(
					user_id = ?login.user.as_ref().and_then(UserProfile::id),
					"Logged in."
				);

				Ok::<_, Error>(login)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	/// Revokes the refresh token server-side, best effort, and always clears the session.
	pub async fn logout(&self) {
		const KIND: FlowKind = FlowKind::Logout;

		let span = FlowSpan::new(KIND, "logout");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let outcome = self.revoke().await;

				if let Err(e) = &outcome {
					tracing::warn!(error = %e, "Logout request failed; clearing the session.");
				}

				self.store().clear().await;

				outcome
			})
			.await;

		obs::record_flow_result(KIND, &result);
	}

	async fn revoke(&self) -> Result<()> {
		let Some(refresh) = self.store().refresh_token().await else {
			return Ok(());
		};
		let config = self.dispatcher.config();
		let request = ApiRequest::post(config.endpoint(&config.logout_path)?)
			.with_body(serde_json::json!({ "refresh": refresh.expose() }));

		self.dispatcher.dispatch(request).await?;

		Ok(())
	}

	fn build(&self, method: Method, path: &str) -> Result<ApiRequest> {
		Ok(ApiRequest::new(method, self.dispatcher.config().endpoint(path)?))
	}

	async fn send<T>(&self, request: ApiRequest) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let retry = self.retry_for(request.method);

		self.send_with(request, &retry).await
	}

	async fn send_with<T>(&self, request: ApiRequest, retry: &RetryConfig) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = with_retry(|| self.dispatcher.dispatch(request.clone()), retry).await?;

		Ok(response.json()?)
	}
}
