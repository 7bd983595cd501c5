//! The network collaborator that exchanges a refresh token for a new access token.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	classify::{DefaultErrorClassifier, ErrorClassifier, FailureContext},
	config::SessionConfig,
	http::{ApiRequest, HttpTransport},
};

/// Boxed future returned by [`RefreshEndpoint::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<RefreshGrant>> + 'a + Send>>;

/// Exchanges a refresh token for a new token pair.
pub trait RefreshEndpoint
where
	Self: Send + Sync,
{
	/// Performs one refresh round-trip.
	///
	/// A response without an access token must be reported as [`Error::RefreshFailed`], never as
	/// a grant.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a>;
}

/// Tokens issued by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshGrant {
	/// New access token.
	pub access: TokenSecret,
	/// Rotated refresh token; `None` keeps the current one.
	pub refresh: Option<TokenSecret>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
	#[serde(default)]
	access: Option<String>,
	#[serde(default)]
	refresh: Option<String>,
}

/// [`RefreshEndpoint`] posting `{"refresh": ...}` as JSON over an [`HttpTransport`].
pub struct HttpRefreshEndpoint {
	transport: Arc<dyn HttpTransport>,
	url: Url,
	classifier: Arc<dyn ErrorClassifier>,
}
impl HttpRefreshEndpoint {
	/// Creates an endpoint targeting `url`.
	pub fn new(transport: Arc<dyn HttpTransport>, url: Url) -> Self {
		Self { transport, url, classifier: Arc::new(DefaultErrorClassifier) }
	}

	/// Creates an endpoint targeting the configured refresh path.
	pub fn from_config(config: &SessionConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
		Ok(Self::new(transport, config.endpoint(&config.refresh_path)?))
	}

	/// Overrides the classifier applied to failed exchanges.
	pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
		self.classifier = classifier;

		self
	}

	/// Returns the target URL.
	pub fn url(&self) -> &Url {
		&self.url
	}
}
impl Debug for HttpRefreshEndpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRefreshEndpoint")
			.field("url", &self.url.as_str())
			.finish_non_exhaustive()
	}
}
impl RefreshEndpoint for HttpRefreshEndpoint {
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
		Box::pin(async move {
			let request = ApiRequest::post(self.url.clone())
				.with_header("content-type", "application/json")
				.with_body(serde_json::json!({ "refresh": refresh_token }));
			let response = match self.transport.send(&request).await {
				Ok(response) => response,
				Err(e) => {
					let context = FailureContext::from_transport(&e);

					return Err(self.classifier.classify(&context).into());
				},
			};

			if !response.is_success() {
				let context = FailureContext::from_response(&response);

				return Err(self.classifier.classify(&context).into());
			}

			let body = response.json::<RefreshResponse>()?;
			let access = body.access.filter(|access| !access.is_empty()).ok_or_else(|| {
				Error::RefreshFailed {
					reason: "refresh response did not include an access token".into(),
				}
			})?;

			Ok(RefreshGrant {
				access: TokenSecret::new(access),
				refresh: body.refresh.filter(|refresh| !refresh.is_empty()).map(TokenSecret::new),
			})
		})
	}
}
