//! Transport primitives for session-aware API calls.
//!
//! The module exposes [`HttpTransport`] over crate-owned [`ApiRequest`]/[`ApiResponse`] values so
//! the dispatcher never depends on a particular HTTP stack. [`ReqwestTransport`] is the default
//! implementation behind the `reqwest` feature.

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	classify::truncate_preview,
	error::{DecodeError, TransportError},
};

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of delivering one request.
///
/// Implementations must not retry or follow authentication challenges on their own; the
/// dispatcher owns the 401 and retry semantics. Any received response, including 4xx and 5xx,
/// is a successful send.
pub trait HttpTransport
where
	Self: Send + Sync,
{
	/// Sends `request` and returns the raw response.
	fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a>;
}
impl<T> HttpTransport for Arc<T>
where
	T: ?Sized + HttpTransport,
{
	fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
		(**self).send(request)
	}
}

/// HTTP methods used by the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the upper-case wire name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
		}
	}

	/// Returns `true` for methods that are safe to repeat after a lost response.
	pub const fn is_idempotent(self) -> bool {
		matches!(self, Self::Get)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
#[cfg(feature = "reqwest")]
impl From<Method> for reqwest::Method {
	fn from(method: Method) -> Self {
		match method {
			Method::Get => Self::GET,
			Method::Post => Self::POST,
			Method::Put => Self::PUT,
			Method::Patch => Self::PATCH,
			Method::Delete => Self::DELETE,
		}
	}
}

/// Outbound request owned by the dispatcher for the duration of one logical call.
///
/// Header names are stored lower-cased. The `retried` flag records that the request has already
/// been replayed after a token refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Request headers keyed by lower-cased name.
	pub headers: BTreeMap<String, String>,
	/// Optional JSON body.
	pub body: Option<Value>,
	retried: bool,
}
impl ApiRequest {
	/// Creates a request without headers or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: BTreeMap::new(), body: None, retried: false }
	}

	/// Shorthand for a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::Get, url)
	}

	/// Shorthand for a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(Method::Post, url)
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.set_header(name, value);

		self
	}

	/// Sets a JSON body.
	pub fn with_body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Serializes `body` into the JSON payload.
	pub fn with_json<T>(self, body: &T) -> Result<Self, DecodeError>
	where
		T: ?Sized + Serialize,
	{
		let body =
			serde_json::to_value(body).map_err(|source| DecodeError::RequestBody { source })?;

		Ok(self.with_body(body))
	}

	/// Adds or replaces a header in place.
	pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
		self.headers.insert(name.to_ascii_lowercase(), value.into());
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Replaces the `Authorization` header with `Bearer <token>`.
	pub fn set_bearer(&mut self, token: &TokenSecret) {
		self.set_header("authorization", token.bearer_header());
	}

	/// Returns the bearer token carried by the request, if any.
	pub fn bearer(&self) -> Option<TokenSecret> {
		self.header("authorization")?.strip_prefix("Bearer ").map(TokenSecret::from)
	}

	/// Marks the request as replayed after a refresh.
	pub fn mark_retried(&mut self) {
		self.retried = true;
	}

	/// Returns `true` once the request has been replayed after a refresh.
	pub fn is_retried(&self) -> bool {
		self.retried
	}
}

/// Raw response returned by a transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers keyed by lower-cased name.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates an empty response with `status`.
	pub fn new(status: u16) -> Self {
		Self { status, ..Default::default() }
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Decodes the body as JSON, treating an empty body as `null`.
	pub fn json<T>(&self) -> Result<T, DecodeError>
	where
		T: DeserializeOwned,
	{
		let blank = self.body.iter().all(u8::is_ascii_whitespace);
		let body: &[u8] = if blank { b"null" } else { &self.body };
		let mut deserializer = serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| DecodeError::ResponseBody { status: self.status, source })
	}

	/// Decodes the body as a JSON value, returning `None` for empty or non-JSON bodies.
	pub fn json_value(&self) -> Option<Value> {
		if self.body.is_empty() {
			return None;
		}

		serde_json::from_slice(&self.body).ok()
	}

	/// Returns the body as text truncated for logs.
	pub fn preview(&self) -> String {
		truncate_preview(&String::from_utf8_lossy(&self.body))
	}

	/// Parses the `Retry-After` header.
	pub fn retry_after(&self) -> Option<Duration> {
		parse_retry_after(self.header("retry-after")?, OffsetDateTime::now_utc())
	}
}

/// Thin wrapper around [`ReqwestClient`] implementing [`HttpTransport`].
///
/// Redirects are not followed, so a login redirect from the API surfaces as its own status
/// instead of being silently chased.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a client with the given per-request timeout.
	pub fn new(timeout: Duration) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(timeout)
			.redirect(reqwest::redirect::Policy::none())
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
		Box::pin(async move {
			let mut builder = self.0.request(request.method.into(), request.url.clone());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = &request.body {
				builder = builder.json(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned()))
				})
				.collect();
			let body = response.bytes().await?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

/// Parses a `Retry-After` value given either as delta seconds or as an RFC 2822 date.
pub fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return delta.try_into().ok();
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let now = datetime!(2024-05-01 12:00:00 UTC);

		assert_eq!(parse_retry_after(" 7 ", now), Some(Duration::from_secs(7)));
		assert_eq!(
			parse_retry_after("Wed, 01 May 2024 12:00:30 +0000", now),
			Some(Duration::from_secs(30))
		);
		assert_eq!(parse_retry_after("Wed, 01 May 2024 11:59:00 +0000", now), None);
		assert_eq!(parse_retry_after("soon", now), None);
	}

	#[test]
	fn empty_bodies_decode_as_null() {
		let empty = ApiResponse::new(204);
		let decoded: Option<Value> =
			empty.json().expect("Empty bodies should decode into an optional value.");

		assert_eq!(decoded, None);
		assert_eq!(empty.json_value(), None);
	}

	#[test]
	fn decode_failures_report_the_failing_path() {
		#[derive(Debug, Deserialize)]
		struct Payload {
			#[allow(dead_code)]
			access: String,
		}

		let response = ApiResponse::new(200).with_body(json!({ "access": 5 }).to_string());
		let err = response.json::<Payload>().expect_err("Numeric access should fail to decode.");
		let DecodeError::ResponseBody { status, source } = err else {
			panic!("Expected a response body decode failure.");
		};

		assert_eq!(status, 200);
		assert_eq!(source.path().to_string(), "access");
	}

	#[test]
	fn request_headers_are_case_insensitive_and_bearer_round_trips() {
		let url = Url::parse("http://api.test/api/causes/").expect("Static URL should parse.");
		let mut request = ApiRequest::get(url).with_header("X-Request-ID", "abc");

		request.set_bearer(&TokenSecret::new("A1"));

		assert_eq!(request.header("x-request-id"), Some("abc"));
		assert_eq!(request.header("Authorization"), Some("Bearer A1"));
		assert_eq!(request.bearer(), Some(TokenSecret::new("A1")));
		assert!(!request.is_retried());

		request.mark_retried();

		assert!(request.is_retried());
	}

	#[test]
	fn response_retry_after_reads_the_header() {
		let response = ApiResponse::new(429).with_header("Retry-After", "3");

		assert_eq!(response.retry_after(), Some(Duration::from_secs(3)));
		assert!(!response.is_success());
	}
}
