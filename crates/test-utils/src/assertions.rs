//! Polling assertions for async tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Interval between condition checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Time is measured on the Tokio clock, so the helper works unchanged under
/// `#[tokio::test(start_paused = true)]`: each poll interval auto-advances the
/// paused clock and lets background timers fire.
///
/// Returns `true` if the condition held before the timeout.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use inferadb_ledger_test_utils::assert_eventually;
///
/// # async fn example(handle_count: impl Fn() -> usize) {
/// assert!(
///     assert_eventually(Duration::from_secs(5), || handle_count() == 2).await,
///     "manager should own two handles"
/// );
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }

    condition()
}
