//! Failure classification that turns transport and HTTP failures into a typed taxonomy.
//!
//! The classifier works on [`FailureContext`], which keeps only primitive data (status code,
//! decoded body, body preview, transport flag) so custom [`ErrorClassifier`] implementations stay
//! decoupled from any HTTP client.

// crates.io
use serde_json::Map;
// self
use crate::{_prelude::*, error::TransportError, http::ApiResponse};

const BODY_PREVIEW_LIMIT: usize = 256;
const VALIDATION_FALLBACK: &str = "Invalid request. Please check your input.";
const UNEXPECTED_FALLBACK: &str = "An unexpected error occurred.";
const UNKNOWN_FALLBACK: &str = "An unknown error occurred.";

/// Maps a failure context into the crate taxonomy.
pub trait ErrorClassifier: Send + Sync {
	/// Classifies a single failure.
	fn classify(&self, ctx: &FailureContext) -> ApiError;
}

/// Canonical failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// No response arrived (connection, DNS, TLS, or timeout failure).
	NetworkError,
	/// HTTP 400 with a validation payload.
	ValidationError,
	/// HTTP 401; the session is no longer accepted.
	AuthExpired,
	/// HTTP 403.
	Forbidden,
	/// HTTP 404.
	NotFound,
	/// HTTP 429.
	RateLimited,
	/// HTTP 500, 502, 503, or 504.
	ServerError,
	/// Any other HTTP error status.
	UnexpectedError,
	/// Failure that is not HTTP-shaped at all.
	UnknownError,
}
impl ErrorKind {
	/// Returns a stable label suitable for logs and metrics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::NetworkError => "network_error",
			Self::ValidationError => "validation_error",
			Self::AuthExpired => "auth_expired",
			Self::Forbidden => "forbidden",
			Self::NotFound => "not_found",
			Self::RateLimited => "rate_limited",
			Self::ServerError => "server_error",
			Self::UnexpectedError => "unexpected_error",
			Self::UnknownError => "unknown_error",
		}
	}

	/// Returns the presentation text for kinds with a fixed message.
	///
	/// Validation, unexpected, and unknown failures derive their text from the failure itself, so
	/// this returns their generic fallback instead.
	pub const fn user_message(self) -> &'static str {
		match self {
			Self::NetworkError => "Network error. Please check your connection and try again.",
			Self::ValidationError => VALIDATION_FALLBACK,
			Self::AuthExpired => "Your session has expired. Please log in again.",
			Self::Forbidden => "You do not have permission to perform this action.",
			Self::NotFound => "The requested resource was not found.",
			Self::RateLimited => "Too many requests. Please wait a moment and try again.",
			Self::ServerError => "Server error. Please try again in a moment.",
			Self::UnexpectedError => UNEXPECTED_FALLBACK,
			Self::UnknownError => UNKNOWN_FALLBACK,
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Classified failure surfaced through [`Error::Api`](crate::error::Error::Api).
#[derive(Clone, Debug, PartialEq, ThisError)]
#[error("{message}")]
pub struct ApiError {
	/// Failure category.
	pub kind: ErrorKind,
	/// HTTP status, absent for transport and unknown failures.
	pub status: Option<u16>,
	/// User-facing message.
	pub message: String,
	/// Whether repeating the operation may succeed.
	pub retryable: bool,
	/// Server-provided `Retry-After` hint.
	pub retry_after: Option<Duration>,
	/// Diagnostic detail (transport source chain or truncated body), never shown to users.
	pub detail: Option<String>,
	/// Decoded JSON error body, when the server sent one.
	pub body: Option<Value>,
}
impl ApiError {
	/// Creates an error of `kind` with the kind's default message and retry flag.
	pub fn new(kind: ErrorKind, status: Option<u16>) -> Self {
		let retryable = match kind {
			ErrorKind::NetworkError | ErrorKind::RateLimited | ErrorKind::ServerError => true,
			ErrorKind::UnexpectedError => status.is_some_and(|code| code >= 500),
			_ => false,
		};

		Self {
			kind,
			status,
			message: kind.user_message().to_owned(),
			retryable,
			retry_after: None,
			detail: None,
			body: None,
		}
	}

	/// Overrides the user-facing message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = message.into();

		self
	}

	/// Overrides the retry flag.
	pub fn with_retryable(mut self, retryable: bool) -> Self {
		self.retryable = retryable;

		self
	}

	/// Attaches diagnostic detail.
	pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
		self.detail = Some(detail.into());

		self
	}

	/// Returns `true` for [`ErrorKind::AuthExpired`].
	pub fn is_auth_expired(&self) -> bool {
		self.kind == ErrorKind::AuthExpired
	}
}

/// Primitive description of a failure handed to an [`ErrorClassifier`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailureContext {
	/// HTTP status code, when a response arrived.
	pub status: Option<u16>,
	/// Response body decoded as JSON, when it was JSON.
	pub body: Option<Value>,
	/// Truncated raw body for diagnostics.
	pub body_preview: Option<String>,
	/// `Retry-After` hint parsed from the response.
	pub retry_after: Option<Duration>,
	/// Set when the failure happened below HTTP (no response at all).
	pub network_error: bool,
	/// Free-form description for failures that are not HTTP-shaped.
	pub description: Option<String>,
}
impl FailureContext {
	/// Builds the context for a received response.
	pub fn from_response(response: &ApiResponse) -> Self {
		Self {
			status: Some(response.status),
			body: response.json_value(),
			body_preview: (!response.body.is_empty()).then(|| response.preview()),
			retry_after: response.retry_after(),
			..Default::default()
		}
	}

	/// Builds the context for a transport failure.
	pub fn from_transport(error: &TransportError) -> Self {
		Self { network_error: true, description: Some(error.detail()), ..Default::default() }
	}

	/// Builds the context for a failure that is not HTTP-shaped.
	pub fn unknown(description: impl Into<String>) -> Self {
		Self { description: Some(description.into()), ..Default::default() }
	}

	/// Adds an HTTP status code.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	/// Adds a decoded JSON body.
	pub fn with_body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Adds a raw body preview, truncated to the preview limit.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(&body.into()));

		self
	}
}

/// Status-table classifier mirroring the API's error contract.
///
/// Transport failures are always [`ErrorKind::NetworkError`]. Responses map by status. A 400
/// derives its message from the validation payload; other unlisted statuses use the body's
/// `message`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorClassifier;
impl Display for DefaultErrorClassifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-error-classifier")
	}
}
impl ErrorClassifier for DefaultErrorClassifier {
	fn classify(&self, ctx: &FailureContext) -> ApiError {
		if ctx.network_error {
			let error = ApiError::new(ErrorKind::NetworkError, None);

			return match &ctx.description {
				Some(description) => error.with_detail(description.clone()),
				None => error,
			};
		}

		let Some(status) = ctx.status else {
			let message = ctx.description.clone().unwrap_or_else(|| UNKNOWN_FALLBACK.to_owned());

			return ApiError::new(ErrorKind::UnknownError, None).with_message(message);
		};
		let mut error = match status {
			400 => ApiError::new(ErrorKind::ValidationError, Some(status)).with_message(
				ctx.body
					.as_ref()
					.and_then(extract_validation_message)
					.unwrap_or_else(|| VALIDATION_FALLBACK.to_owned()),
			),
			401 => ApiError::new(ErrorKind::AuthExpired, Some(status)),
			403 => ApiError::new(ErrorKind::Forbidden, Some(status)),
			404 => ApiError::new(ErrorKind::NotFound, Some(status)),
			429 => ApiError::new(ErrorKind::RateLimited, Some(status)),
			500 | 502 | 503 | 504 => ApiError::new(ErrorKind::ServerError, Some(status)),
			_ => {
				let message = ctx
					.body
					.as_ref()
					.and_then(|body| body.get("message"))
					.and_then(Value::as_str)
					.filter(|message| !message.is_empty())
					.unwrap_or(UNEXPECTED_FALLBACK);

				ApiError::new(ErrorKind::UnexpectedError, Some(status)).with_message(message)
			},
		};

		error.retry_after = ctx.retry_after;
		error.detail = ctx.body_preview.clone();
		error.body = ctx.body.clone();

		error
	}
}

/// Lifts any crate error into the taxonomy.
///
/// [`Error::Api`] keeps its own classification; every other variant is an unknown,
/// non-retryable failure described by its display text.
pub fn classify_error(error: &Error) -> ApiError {
	match error {
		Error::Api(api) => api.clone(),
		other => DefaultErrorClassifier.classify(&FailureContext::unknown(other.to_string())),
	}
}

/// Extracts the most relevant message from a validation payload.
///
/// Precedence: the first `non_field_errors` entry, then the first field error in document order
/// rendered as `"<field>: <message>"`, then a top-level `error` or `message` string. Every key
/// except `non_field_errors` counts as a field, `error` and `message` included.
pub fn extract_validation_message(body: &Value) -> Option<String> {
	let fields = body.as_object()?;

	if let Some(message) = fields
		.get("non_field_errors")
		.and_then(Value::as_array)
		.and_then(|errors| errors.first())
		.map(render_message)
	{
		return Some(message);
	}
	if let Some(message) = first_field_error(fields) {
		return Some(message);
	}

	["error", "message"]
		.into_iter()
		.find_map(|key| fields.get(key).and_then(Value::as_str).map(str::to_owned))
}

/// Truncates a body to the preview limit, marking elided content with `…`.
pub fn truncate_preview(body: &str) -> String {
	if body.chars().count() <= BODY_PREVIEW_LIMIT {
		return body.to_owned();
	}

	let mut buf = body.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn first_field_error(fields: &Map<String, Value>) -> Option<String> {
	fields
		.iter()
		.filter(|(key, _)| key.as_str() != "non_field_errors")
		.find_map(|(field, errors)| {
			let first = match errors {
				Value::Array(errors) => errors.first()?,
				Value::Null => return None,
				other => other,
			};

			Some(format!("{field}: {}", render_message(first)))
		})
}

fn render_message(value: &Value) -> String {
	match value {
		Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}
