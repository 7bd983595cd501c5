//! Recovery counters for the credential store.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for credential-store recoveries.
#[derive(Debug, Default)]
pub struct StoreMetrics {
	promotions: AtomicU64,
	abandoned_promotions: AtomicU64,
	degraded_writes: AtomicU64,
	corrupt_reads: AtomicU64,
}
impl StoreMetrics {
	/// Returns the number of legacy sessions promoted into the primary tier.
	pub fn promotions(&self) -> u64 {
		self.promotions.load(Ordering::Relaxed)
	}

	/// Returns the number of promotions that failed and discarded the legacy session.
	pub fn abandoned_promotions(&self) -> u64 {
		self.abandoned_promotions.load(Ordering::Relaxed)
	}

	/// Returns the number of writes that fell back to the legacy tier.
	pub fn degraded_writes(&self) -> u64 {
		self.degraded_writes.load(Ordering::Relaxed)
	}

	/// Returns the number of reads that found corrupt data and wiped the session.
	pub fn corrupt_reads(&self) -> u64 {
		self.corrupt_reads.load(Ordering::Relaxed)
	}

	pub(crate) fn record_promotion(&self) {
		self.promotions.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_abandoned_promotion(&self) {
		self.abandoned_promotions.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_degraded_write(&self) {
		self.degraded_writes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_corrupt_read(&self) {
		self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
	}
}
