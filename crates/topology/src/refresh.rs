//! Refresh on call failure.
//!
//! A [`RefreshTrigger`] wraps outbound calls. When a call fails with a status
//! matching its [`RefreshPolicy`], it asks the resolver to resubscribe so a
//! topology change is noticed before the next poll. The failure itself is
//! always returned to the caller untouched.

use std::{fmt, future::Future, sync::Arc};

use tonic::{Code, Status};
use tracing::debug;

use crate::{
    metrics::{TopologyMetrics, default_metrics},
    resolver::Resolver,
};

/// Something that can be asked to re-resolve topology.
pub trait Refresh: Send + Sync {
    /// Requests a refresh. Must not block.
    fn refresh(&self);
}

impl Refresh for Resolver {
    fn refresh(&self) {
        Resolver::refresh(self);
    }
}

type Predicate = dyn Fn(&Status) -> bool + Send + Sync;

/// Decides which failed calls should trigger a refresh.
///
/// Policies compose with [`and`](Self::and), [`or`](Self::or) and [`not`](Self::not).
///
/// # Example
///
/// ```no_run
/// use inferadb_ledger_topology::RefreshPolicy;
/// use tonic::Code;
///
/// // Refresh when the node is unreachable, or when it says it is no longer leader.
/// let policy = RefreshPolicy::unavailable()
///     .or(RefreshPolicy::codes([Code::FailedPrecondition])
///         .and(RefreshPolicy::message_contains("not leader")));
/// ```
#[derive(Clone)]
pub struct RefreshPolicy {
    predicate: Arc<Predicate>,
    label: Arc<str>,
}

impl RefreshPolicy {
    fn from_fn(
        label: impl Into<Arc<str>>,
        predicate: impl Fn(&Status) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { predicate: Arc::new(predicate), label: label.into() }
    }

    /// Matches `UNAVAILABLE` statuses.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::from_fn("unavailable", |status| status.code() == Code::Unavailable)
    }

    /// Matches any of the given codes.
    pub fn codes(codes: impl IntoIterator<Item = Code>) -> Self {
        let codes: Vec<Code> = codes.into_iter().collect();
        let label = format!("codes{codes:?}");
        Self::from_fn(label, move |status| codes.contains(&status.code()))
    }

    /// Matches statuses whose message contains `needle`.
    pub fn message_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        let label = format!("message_contains({needle:?})");
        Self::from_fn(label, move |status| status.message().contains(needle.as_str()))
    }

    /// Matches with a caller-supplied predicate.
    pub fn custom(predicate: impl Fn(&Status) -> bool + Send + Sync + 'static) -> Self {
        Self::from_fn("custom", predicate)
    }

    /// Matches every failure.
    #[must_use]
    pub fn always() -> Self {
        Self::from_fn("always", |_| true)
    }

    /// Matches nothing.
    #[must_use]
    pub fn never() -> Self {
        Self::from_fn("never", |_| false)
    }

    /// Matches when both policies match.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let label = format!("({} AND {})", self.label, other.label);
        Self::from_fn(label, move |status| self.matches(status) && other.matches(status))
    }

    /// Matches when either policy matches.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let label = format!("({} OR {})", self.label, other.label);
        Self::from_fn(label, move |status| self.matches(status) || other.matches(status))
    }

    /// Matches when this policy does not.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        let label = format!("NOT {}", self.label);
        Self::from_fn(label, move |status| !self.matches(status))
    }

    /// Evaluates the policy against a failed call.
    #[must_use]
    pub fn matches(&self, status: &Status) -> bool {
        (self.predicate)(status)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl fmt::Debug for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefreshPolicy").field(&self.label).finish()
    }
}

/// Wraps outbound calls and requests a refresh on matching failures.
#[derive(Clone)]
pub struct RefreshTrigger {
    policy: RefreshPolicy,
    target: Arc<dyn Refresh>,
    metrics: Arc<dyn TopologyMetrics>,
}

impl RefreshTrigger {
    /// Creates a trigger that refreshes `target` when `policy` matches.
    pub fn new(policy: RefreshPolicy, target: Arc<dyn Refresh>) -> Self {
        Self::with_metrics(policy, target, default_metrics())
    }

    /// Creates a trigger that also records refreshes to `metrics`.
    pub fn with_metrics(
        policy: RefreshPolicy,
        target: Arc<dyn Refresh>,
        metrics: Arc<dyn TopologyMetrics>,
    ) -> Self {
        Self { policy, target, metrics }
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Inspects a failed call and refreshes if the policy matches.
    ///
    /// Returns true if a refresh was requested.
    pub fn observe(&self, status: &Status) -> bool {
        if !self.policy.matches(status) {
            return false;
        }
        debug!(
            code = ?status.code(),
            message = status.message(),
            "Call failure triggered topology refresh"
        );
        self.metrics.record_refresh();
        self.target.refresh();
        true
    }

    /// Awaits `call`, refreshing at most once if it fails with a matching status.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, unchanged.
    pub async fn intercept<T, Fut>(&self, call: Fut) -> Result<T, Status>
    where
        Fut: Future<Output = Result<T, Status>>,
    {
        let result = call.await;
        if let Err(status) = &result {
            self.observe(status);
        }
        result
    }
}

impl fmt::Debug for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTrigger").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingRefresh(AtomicUsize);

    impl Refresh for CountingRefresh {
        fn refresh(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn trigger(policy: RefreshPolicy) -> (RefreshTrigger, Arc<CountingRefresh>) {
        let target = Arc::new(CountingRefresh::default());
        (RefreshTrigger::new(policy, target.clone()), target)
    }

    #[test]
    fn test_default_matches_unavailable_only() {
        let policy = RefreshPolicy::default();
        assert!(policy.matches(&Status::unavailable("node down")));
        assert!(!policy.matches(&Status::internal("boom")));
        assert!(!policy.matches(&Status::not_found("key")));
    }

    #[test]
    fn test_codes() {
        let policy = RefreshPolicy::codes([Code::DeadlineExceeded, Code::Aborted]);
        assert!(policy.matches(&Status::deadline_exceeded("slow")));
        assert!(policy.matches(&Status::aborted("retry")));
        assert!(!policy.matches(&Status::unavailable("down")));
    }

    #[test]
    fn test_message_contains() {
        let policy = RefreshPolicy::message_contains("not leader");
        assert!(policy.matches(&Status::failed_precondition("node is not leader")));
        assert!(!policy.matches(&Status::failed_precondition("quota exceeded")));
    }

    #[test]
    fn test_combinators() {
        let not_leader = RefreshPolicy::codes([Code::FailedPrecondition])
            .and(RefreshPolicy::message_contains("not leader"));
        let policy = RefreshPolicy::unavailable().or(not_leader);

        assert!(policy.matches(&Status::unavailable("down")));
        assert!(policy.matches(&Status::failed_precondition("not leader")));
        assert!(!policy.matches(&Status::internal("not leader")));
        assert!(!policy.matches(&Status::failed_precondition("other")));

        let inverted = RefreshPolicy::unavailable().not();
        assert!(!inverted.matches(&Status::unavailable("down")));
        assert!(inverted.matches(&Status::internal("boom")));
    }

    #[test]
    fn test_custom_always_never() {
        let policy = RefreshPolicy::custom(|status| status.message().len() > 3);
        assert!(policy.matches(&Status::ok("long message")));
        assert!(!policy.matches(&Status::ok("ok")));
        assert!(RefreshPolicy::always().matches(&Status::cancelled("x")));
        assert!(!RefreshPolicy::never().matches(&Status::unavailable("x")));
    }

    #[test]
    fn test_debug_label() {
        let policy = RefreshPolicy::unavailable().or(RefreshPolicy::message_contains("x").not());
        assert_eq!(
            format!("{policy:?}"),
            r#"RefreshPolicy("(unavailable OR NOT message_contains(\"x\"))")"#
        );
    }

    #[tokio::test]
    async fn test_intercept_refreshes_once_and_passes_error_through() {
        let (trigger, target) = trigger(RefreshPolicy::unavailable());

        let result: Result<(), Status> =
            trigger.intercept(async { Err(Status::unavailable("node down")) }).await;

        let status = result.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "node down");
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_intercept_ignores_success_and_non_matching() {
        let (trigger, target) = trigger(RefreshPolicy::unavailable());

        let ok = trigger.intercept(async { Ok::<_, Status>(7) }).await.unwrap();
        let err = trigger.intercept(async { Err::<u32, _>(Status::internal("boom")) }).await;

        assert_eq!(ok, 7);
        assert_eq!(err.unwrap_err().code(), Code::Internal);
        assert_eq!(target.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_observe_reports() {
        let (trigger, target) = trigger(RefreshPolicy::always());
        assert!(trigger.observe(&Status::unknown("x")));
        assert!(trigger.observe(&Status::unknown("y")));
        assert_eq!(target.0.load(Ordering::SeqCst), 2);
    }
}
