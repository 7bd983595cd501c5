//! Bounded exponential backoff around one logical operation.
//!
//! [`with_retry`] runs an operation up to `max_retries + 1` times. Before retry `n` (zero-based)
//! it sleeps `delay * backoff_multiplier^n`, and it stops early as soon as the
//! [`RetryCondition`] rejects the error. The last error is returned unchanged.

// self
use crate::{_prelude::*, classify::ErrorKind};

type Predicate = dyn Fn(&Error) -> bool + Send + Sync;

/// Decides whether a failed attempt may be repeated.
#[derive(Clone)]
pub struct RetryCondition(Arc<Predicate>);
impl RetryCondition {
	/// Wraps a custom predicate.
	pub fn new(predicate: impl Fn(&Error) -> bool + 'static + Send + Sync) -> Self {
		Self(Arc::new(predicate))
	}

	/// Retries when no response arrived or the server answered 5xx. This is the default.
	pub fn network_or_server() -> Self {
		Self::new(|error| match error.api() {
			Some(api) => api.kind == ErrorKind::NetworkError || is_server_status(api.status),
			None => false,
		})
	}

	/// Retries only when the server answered 5xx.
	///
	/// Suited to non-idempotent requests, where a lost response may hide an applied mutation.
	pub fn server_only() -> Self {
		Self::new(|error| is_server_status(error.status()))
	}

	/// Never retries.
	pub fn never() -> Self {
		Self::new(|_| false)
	}

	/// Evaluates the predicate.
	pub fn should_retry(&self, error: &Error) -> bool {
		(self.0)(error)
	}
}
impl Default for RetryCondition {
	fn default() -> Self {
		Self::network_or_server()
	}
}
impl Debug for RetryCondition {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("RetryCondition(..)")
	}
}

/// Backoff parameters for [`with_retry`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
	/// Retries after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	pub delay: Duration,
	/// Factor applied to the delay for every further retry.
	pub backoff_multiplier: f64,
	/// Predicate deciding whether an error is retried.
	pub condition: RetryCondition,
	/// Optional bound on the whole sequence, sleeps included.
	pub deadline: Option<Duration>,
}
impl RetryConfig {
	/// Configuration that performs exactly one attempt.
	pub fn disabled() -> Self {
		Self::default().with_max_retries(0)
	}

	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the initial delay.
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;

		self
	}

	/// Overrides the backoff multiplier.
	pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
		self.backoff_multiplier = multiplier;

		self
	}

	/// Overrides the retry predicate.
	pub fn with_condition(mut self, condition: RetryCondition) -> Self {
		self.condition = condition;

		self
	}

	/// Bounds the whole sequence.
	pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
		self.deadline = deadline;

		self
	}

	/// Returns the sleep preceding retry `attempt_index` (zero-based).
	pub fn delay_for(&self, attempt_index: u32) -> Duration {
		let factor = self.backoff_multiplier.powi(attempt_index.min(i32::MAX as u32) as i32);

		Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			delay: Duration::from_millis(1_000),
			backoff_multiplier: 2.,
			condition: RetryCondition::default(),
			deadline: None,
		}
	}
}

/// Runs `operation` under `config`, sleeping between attempts with `tokio::time::sleep`.
pub async fn with_retry<T, F, Fut>(operation: F, config: &RetryConfig) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let sequence = run_attempts(operation, config);

	match config.deadline {
		Some(limit) => tokio::time::timeout(limit, sequence)
			.await
			.unwrap_or(Err(Error::DeadlineExceeded { operation: "retry sequence", limit })),
		None => sequence.await,
	}
}

async fn run_attempts<T, F, Fut>(mut operation: F, config: &RetryConfig) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0;

	loop {
		let error = match operation().await {
			Ok(value) => return Ok(value),
			Err(e) => e,
		};

		if attempt >= config.max_retries || !config.condition.should_retry(&error) {
			return Err(error);
		}

		let delay = config.delay_for(attempt);

		tracing::debug!(
			attempt = attempt + 1,
			max_retries = config.max_retries,
			delay_ms = delay.as_millis() as u64,
			error = %error,
			"Retrying failed operation."
		);
		tokio::time::sleep(delay).await;

		attempt += 1;
	}
}

fn is_server_status(status: Option<u16>) -> bool {
	status.is_some_and(|status| (500..600).contains(&status))
}
