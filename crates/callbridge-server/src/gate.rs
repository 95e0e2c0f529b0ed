//! Caller gate: decides which callers reach the voice pipeline.

use crate::config::CallersConfig;
use callbridge_types::{CallerIdentity, UNKNOWN_CALLER};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long an issued stream token stays redeemable.
pub const ADMISSION_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow(CallerIdentity),
    Deny,
}

/// Static allow-list and name table, read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct CallerGate {
    allowlist: HashSet<String>,
    names: HashMap<String, String>,
}

impl CallerGate {
    pub fn new(
        allowlist: impl IntoIterator<Item = String>,
        names: HashMap<String, String>,
    ) -> Self {
        Self {
            allowlist: allowlist.into_iter().collect(),
            names,
        }
    }

    pub fn from_config(config: &CallersConfig) -> Self {
        Self::new(config.allowlist.iter().cloned(), config.names.clone())
    }

    /// Whether the allow-list restricts anyone.
    pub fn is_open(&self) -> bool {
        self.allowlist.is_empty()
    }

    /// Exact-match check of an inbound caller number.
    pub fn check(&self, number: &str) -> GateDecision {
        if !self.is_open() && !self.allowlist.contains(number) {
            return GateDecision::Deny;
        }
        GateDecision::Allow(self.identify(number))
    }

    /// Identity for a number, without consulting the allow-list.
    ///
    /// Used for the remote party of calls this service placed itself.
    pub fn identify(&self, number: &str) -> CallerIdentity {
        let name = self
            .names
            .get(number)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CALLER);
        CallerIdentity::new(number, name)
    }
}

/// One-time tokens for media sockets of calls this service placed.
///
/// The remote party of an outbound call need not be on the allow-list, so
/// the call-setup webhook issues a token that the socket upgrade redeems in
/// place of the caller check.
///
/// Uses `std::sync::Mutex`: every acquisition is a brief map operation that
/// never spans an `.await`.
#[derive(Debug, Clone, Default)]
pub struct Admissions {
    pending: Arc<Mutex<HashMap<String, (CallerIdentity, Instant)>>>,
}

impl Admissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, identity: CallerIdentity) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|_, (_, issued)| now.duration_since(*issued) < ADMISSION_TTL);
        pending.insert(token.clone(), (identity, now));
        token
    }

    /// Consumes a token. Expired and unknown tokens yield `None`.
    pub fn redeem(&self, token: &str) -> Option<CallerIdentity> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (identity, issued) = pending.remove(token)?;
        (issued.elapsed() < ADMISSION_TTL).then_some(identity)
    }
}
