//! Failure telemetry sink.
//!
//! Sync job failures are reported here with their chain/address tags. The
//! default sink logs through `tracing`; the transport behind it is not this
//! crate's concern. Ignore-list suppression happens in the orchestrator, so
//! a sink always receives only the failures that should be surfaced.

use crate::chain::Chain;

/// Tags attached to a captured failure.
#[derive(Debug, Clone)]
pub struct FailureTags {
	pub chain: Chain,
	pub address: String,
}

pub trait FailureSink: Send + Sync {
	fn capture(&self, error: &dyn std::error::Error, tags: &FailureTags);
}

/// Sink that surfaces failures as error-level log events.
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
	fn capture(&self, error: &dyn std::error::Error, tags: &FailureTags) {
		tracing::error!(
			chain = %tags.chain,
			address = %tags.address,
			"sync failure captured: {}",
			error
		);
	}
}
