//! Crate-level error types shared by the store, refresh coordinator, dispatcher, and client.

// self
use crate::{_prelude::*, classify::ApiError, store::StoreError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure that could not be recovered locally.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Classified transport or HTTP failure.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// Response body could not be decoded into the requested type.
	#[error(transparent)]
	Decode(#[from] DecodeError),

	/// The access token could not be refreshed; the session may have been cleared.
	#[error("Token refresh failed: {reason}.")]
	RefreshFailed {
		/// Coordinator- or endpoint-supplied reason string.
		reason: String,
	},
	/// An operation ran past its configured deadline.
	#[error("The {operation} exceeded its deadline of {limit:?}.")]
	DeadlineExceeded {
		/// Label of the bounded operation.
		operation: &'static str,
		/// Deadline that was exceeded.
		limit: Duration,
	},
}
impl Error {
	/// Returns the attached classification for [`Error::Api`] values.
	pub fn api(&self) -> Option<&ApiError> {
		match self {
			Self::Api(api) => Some(api),
			_ => None,
		}
	}

	/// Returns the HTTP status carried by a classified failure, when available.
	pub fn status(&self) -> Option<u16> {
		self.api().and_then(|api| api.status)
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// API base URL is missing, malformed, or not HTTP(S).
	#[error("API base URL `{url}` is invalid.")]
	InvalidBaseUrl {
		/// Offending URL string.
		url: String,
	},
	/// An endpoint path could not be joined onto the base URL.
	#[error("Endpoint path `{path}` is invalid.")]
	InvalidEndpoint {
		/// Offending path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A path setting does not start with `/`.
	#[error("Path `{path}` must start with `/`.")]
	RelativePath {
		/// Offending path.
		path: String,
	},
	/// Retry settings are out of range.
	#[error("Retry settings are invalid: {reason}.")]
	InvalidRetry {
		/// Human-readable explanation.
		reason: &'static str,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration document is malformed.")]
	Parse {
		/// Structured parsing failure, including the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures raised while decoding request or response payloads.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// Response body was not valid JSON for the requested type.
	#[error("Response body (HTTP {status}) could not be decoded.")]
	ResponseBody {
		/// HTTP status code of the response.
		status: u16,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Request payload could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestBody {
		/// Underlying serialization failure.
		#[source]
		source: serde_json::Error,
	},
}

/// Transport-level failures where no HTTP response was received.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request did not complete within the transport timeout.
	#[error("Request timed out before a response arrived.")]
	Timeout {
		/// Transport-specific timeout error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Wraps a transport-specific timeout error.
	pub fn timeout(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Timeout { source: Box::new(src) }
	}

	/// Renders the error together with its source chain for diagnostics.
	pub fn detail(&self) -> String {
		let mut detail = self.to_string();
		let mut source = StdError::source(self);

		while let Some(cause) = source {
			detail.push_str(": ");
			detail.push_str(&cause.to_string());
			source = cause.source();
		}

		detail
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::timeout(e) } else { Self::network(e) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::classify::ErrorKind;

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "disk unavailable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn api_accessors_expose_classification() {
		let error = Error::from(ApiError::new(ErrorKind::NotFound, Some(404)));

		assert_eq!(error.status(), Some(404));
		assert_eq!(error.api().map(|api| api.kind), Some(ErrorKind::NotFound));
		assert!(Error::RefreshFailed { reason: "gone".into() }.api().is_none());
	}

	#[test]
	fn transport_detail_walks_the_source_chain() {
		let error = TransportError::network(std::io::Error::other("connection reset"));

		assert_eq!(
			error.detail(),
			"Network error occurred while sending the request.: connection reset"
		);
	}
}
