//! Single-flight token refresh.
//!
//! [`RefreshCoordinator`] guarantees at most one refresh round-trip in flight. The first caller
//! to find the coordinator idle becomes the leader and performs the exchange; everyone arriving
//! while it runs parks a one-shot receiver in a FIFO queue and is resolved, in arrival order, with
//! the leader's result. A failed refresh clears the session (see
//! [`RefreshCoordinator::with_transient_clear`] for network-class failures).

pub mod endpoint;
mod metrics;

pub use endpoint::*;
pub use metrics::RefreshMetrics;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::CredentialStore,
};

type Waiter = oneshot::Sender<Option<TokenSecret>>;

/// Refresh state machine. Only [`RefreshState::Idle`] can start a new flight.
#[derive(Debug, Default)]
pub enum RefreshState {
	/// No refresh is running.
	#[default]
	Idle,
	/// A leader is refreshing; queued waiters resolve when it settles.
	Refreshing {
		/// Followers in arrival order.
		waiters: VecDeque<Waiter>,
	},
}

enum Role {
	Leader,
	Follower(oneshot::Receiver<Option<TokenSecret>>),
}

/// Owns the refresh state and the waiter queue for one session.
pub struct RefreshCoordinator {
	store: Arc<CredentialStore>,
	endpoint: Arc<dyn RefreshEndpoint>,
	state: Mutex<RefreshState>,
	timeout: Option<Duration>,
	clear_on_transient_failure: bool,
	metrics: Arc<RefreshMetrics>,
}
impl RefreshCoordinator {
	/// Creates an idle coordinator.
	pub fn new(store: Arc<CredentialStore>, endpoint: Arc<dyn RefreshEndpoint>) -> Self {
		Self {
			store,
			endpoint,
			state: Mutex::new(RefreshState::Idle),
			timeout: None,
			clear_on_transient_failure: true,
			metrics: Default::default(),
		}
	}

	/// Bounds each refresh round-trip; `None` waits indefinitely.
	pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.timeout = timeout;

		self
	}

	/// Controls whether network-class refresh failures clear the session.
	///
	/// Rejections by the refresh endpoint always clear it.
	pub fn with_transient_clear(mut self, clear: bool) -> Self {
		self.clear_on_transient_failure = clear;

		self
	}

	/// Shares an external metrics sink.
	pub fn with_metrics(mut self, metrics: Arc<RefreshMetrics>) -> Self {
		self.metrics = metrics;

		self
	}

	/// Returns the refresh counters.
	pub fn metrics(&self) -> &Arc<RefreshMetrics> {
		&self.metrics
	}

	/// Returns the store this coordinator writes to.
	pub fn store(&self) -> &Arc<CredentialStore> {
		&self.store
	}

	/// Returns `true` while a flight is running.
	pub fn is_refreshing(&self) -> bool {
		matches!(*self.state.lock(), RefreshState::Refreshing { .. })
	}

	/// Returns the number of callers parked behind the running flight.
	pub fn pending_waiters(&self) -> usize {
		match &*self.state.lock() {
			RefreshState::Idle => 0,
			RefreshState::Refreshing { waiters } => waiters.len(),
		}
	}

	/// Obtains a fresh access token, joining the running flight when there is one.
	pub async fn refresh(&self) -> Result<TokenSecret> {
		let role = {
			let mut state = self.state.lock();

			match &mut *state {
				RefreshState::Idle => {
					*state = RefreshState::Refreshing { waiters: VecDeque::new() };

					Role::Leader
				},
				RefreshState::Refreshing { waiters } => {
					let (tx, rx) = oneshot::channel();

					waiters.push_back(tx);

					Role::Follower(rx)
				},
			}
		};

		match role {
			Role::Leader => {
				let mut flight = Flight { coordinator: self, settled: false };
				let result = self.lead().await;

				flight.settle(result.as_ref().ok().cloned());

				result
			},
			Role::Follower(rx) => {
				self.metrics.record_coalesced();

				match rx.await {
					Ok(Some(token)) => Ok(token),
					_ => Err(Error::RefreshFailed {
						reason: "the shared token refresh did not produce a token".into(),
					}),
				}
			},
		}
	}

	/// Refreshes on behalf of a request that failed while carrying `stale`.
	///
	/// When the stored token already differs from `stale`, another refresh finished in the
	/// meantime and the stored token is returned without a network call.
	pub async fn refresh_stale(&self, stale: Option<&TokenSecret>) -> Result<TokenSecret> {
		if !self.is_refreshing()
			&& let Some(current) = self.store.access_token().await
			&& Some(&current) != stale
		{
			tracing::debug!("Stored access token is newer than the rejected one; reusing it.");
			self.metrics.record_stale_reuse();

			return Ok(current);
		}

		self.refresh().await
	}

	async fn lead(&self) -> Result<TokenSecret> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.exchange()).await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_) => self.metrics.record_failure(),
		}

		obs::record_flow_result(KIND, &result);

		result
	}

	async fn exchange(&self) -> Result<TokenSecret> {
		let Some(refresh_token) = self.store.refresh_token().await else {
			tracing::warn!("No refresh token available; clearing the session.");
			self.store.clear().await;

			return Err(Error::RefreshFailed { reason: "no refresh token is available".into() });
		};
		let call = self.endpoint.refresh(refresh_token.expose());
		let outcome = match self.timeout {
			Some(limit) => tokio::time::timeout(limit, call)
				.await
				.unwrap_or(Err(Error::DeadlineExceeded { operation: "token refresh", limit })),
			None => call.await,
		};

		match outcome {
			Ok(grant) => {
				tracing::info!(rotated = grant.refresh.is_some(), "Access token refreshed.");

				self.store.set_tokens(grant.access.clone(), grant.refresh).await;

				Ok(grant.access)
			},
			Err(e) => {
				if is_rejection(&e) || self.clear_on_transient_failure {
					tracing::warn!(error = %e, "Token refresh failed; clearing the session.");
					self.store.clear().await;
				} else {
					tracing::warn!(
						error = %e,
						"Token refresh failed transiently; keeping the session."
					);
				}

				Err(match e {
					Error::RefreshFailed { reason } => Error::RefreshFailed { reason },
					other => Error::RefreshFailed { reason: other.to_string() },
				})
			},
		}
	}

	fn settle(&self, token: Option<TokenSecret>) {
		let waiters = match std::mem::take(&mut *self.state.lock()) {
			RefreshState::Refreshing { waiters } => waiters,
			RefreshState::Idle => VecDeque::new(),
		};

		tracing::debug!(
			waiters = waiters.len(),
			success = token.is_some(),
			"Settling refresh waiters."
		);

		for waiter in waiters {
			// A dropped receiver means the caller gave up; nothing to deliver.
			let _ = waiter.send(token.clone());
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("refreshing", &self.is_refreshing())
			.field("timeout", &self.timeout)
			.field("clear_on_transient_failure", &self.clear_on_transient_failure)
			.finish_non_exhaustive()
	}
}

/// Leader-side guard that settles the flight even if the leading future is dropped.
struct Flight<'a> {
	coordinator: &'a RefreshCoordinator,
	settled: bool,
}
impl Flight<'_> {
	fn settle(&mut self, token: Option<TokenSecret>) {
		self.settled = true;
		self.coordinator.settle(token);
	}
}
impl Drop for Flight<'_> {
	fn drop(&mut self) {
		if !self.settled {
			tracing::warn!("Refresh leader was cancelled; failing queued waiters.");
			self.coordinator.settle(None);
		}
	}
}

fn is_rejection(error: &Error) -> bool {
	match error {
		Error::Api(api) => matches!(api.status, Some(400 | 401 | 403)),
		Error::RefreshFailed { .. } | Error::Decode(_) => true,
		_ => false,
	}
}
