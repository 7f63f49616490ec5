//! Per-call cache policy.

use std::time::Duration;

/// The four time windows steering one proxy call.
///
/// All decisions in the coordinator are made against these windows and a
/// single store snapshot taken at the start of the call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    /// Storage-side TTL applied to the value when it is written back.
    /// Zero persists without a TTL.
    pub expire: Duration,
    /// Age beyond which a served value also triggers a background refresh.
    pub staleness: Duration,
    /// Minimum interval between fetch attempts for the same key.
    pub throttle: Duration,
    /// Maximum time a caller may block waiting for a value. Also used as
    /// the lease on the fetch lock.
    pub timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            expire: Duration::from_secs(600),   // 10 minutes
            staleness: Duration::from_secs(60), // 1 minute
            throttle: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}
