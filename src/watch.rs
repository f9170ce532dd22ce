//! Long-running modes: periodic re-checks and clipboard listening.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use crate::app::{App, AccountReport, AccountStatus};
use crate::discovery::{ClipboardSource, search_usernames};
use crate::domain::Account;
use crate::feed::FeedSource;
use crate::media::MediaSource;
use crate::merge::MergeTool;
use crate::pool::CancelToken;

const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Pause before each account.
    pub account_pause: Duration,
    /// Pause between full update passes.
    pub update_interval: Duration,
    /// Pause between clipboard reads.
    pub poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            account_pause: Duration::from_secs(1),
            update_interval: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Sleeps in short slices so cancellation is noticed promptly. Returns
/// `false` when cancelled.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

/// Runs every account once, pausing before each.
pub fn download_pass<F, M, T>(
    app: &App<F, M, T>,
    accounts: &[Account],
    settings: &WatchSettings,
) -> Vec<AccountReport>
where
    F: FeedSource,
    M: MediaSource + 'static,
    T: MergeTool,
{
    let mut reports = Vec::with_capacity(accounts.len());
    for account in accounts {
        if !sleep_unless_cancelled(settings.account_pause, app.cancel_token()) {
            break;
        }
        let report = app.download_account(account);
        let cancelled = report.status == AccountStatus::Cancelled;
        reports.push(report);
        if cancelled {
            break;
        }
    }
    reports
}

pub fn run_update_loop<F, M, T>(app: &App<F, M, T>, accounts: &[Account], settings: &WatchSettings)
where
    F: FeedSource,
    M: MediaSource + 'static,
    T: MergeTool,
{
    tracing::info!("scheduling updates for {} users", accounts.len());
    let cancel = app.cancel_token();
    while !cancel.is_cancelled() {
        download_pass(app, accounts, settings);
        if cancel.is_cancelled() {
            break;
        }
        tracing::info!(
            "next update in {} seconds",
            settings.update_interval.as_secs()
        );
        if !sleep_unless_cancelled(settings.update_interval, cancel) {
            break;
        }
    }
    tracing::info!("update loop stopped");
}

/// Downloads every account that shows up in a profile link on the clipboard.
/// Accounts already in `seen` are not downloaded again.
pub fn run_clipboard_loop<F, M, T, C>(
    app: &App<F, M, T>,
    clipboard: &C,
    seen: &mut HashSet<Account>,
    settings: &WatchSettings,
) where
    F: FeedSource,
    M: MediaSource + 'static,
    T: MergeTool,
    C: ClipboardSource + ?Sized,
{
    tracing::info!("listening for story links added to the clipboard");
    let cancel = app.cancel_token();
    while !cancel.is_cancelled() {
        if let Some(text) = clipboard.read_text() {
            let fresh: Vec<Account> = search_usernames(&text)
                .into_iter()
                .filter(|account| !seen.contains(account))
                .collect();
            if !fresh.is_empty() {
                seen.extend(fresh.iter().cloned());
                download_pass(app, &fresh, settings);
            }
        }
        if !sleep_unless_cancelled(settings.poll_interval, cancel) {
            break;
        }
    }
    tracing::info!("clipboard listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(30), &cancel));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn zero_sleep_completes() {
        assert!(sleep_unless_cancelled(Duration::ZERO, &CancelToken::new()));
    }
}
