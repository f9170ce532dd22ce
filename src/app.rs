use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{Account, FeedCategory, HighlightGroup, MediaSegment, Profile};
use crate::error::{AttemptError, DownloadError};
use crate::feed::{FeedSource, FetchedFeed, fetch_feed};
use crate::logging::SUMMARY_TARGET;
use crate::media::{AssetDownloader, DownloadOutcome, MediaSource};
use crate::merge::{MergeOutcome, MergeTool, MultipartMerger};
use crate::multipart::{self, MultipartRun};
use crate::parser::{ParsedFeed, parse};
use crate::pool::{CancelToken, WorkerPool};
use crate::store::{self, Store};
use crate::timezone::TimeNormalizer;

pub const MAX_FETCH_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub skip_stories: bool,
    pub skip_curated: bool,
    pub skip_spotlight: bool,
    pub no_multipart: bool,
    pub dump_metadata: bool,
    pub max_workers: usize,
    pub fetch_attempts: usize,
    pub fetch_retry_delay: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            skip_stories: false,
            skip_curated: false,
            skip_spotlight: false,
            no_multipart: false,
            dump_metadata: false,
            max_workers: 4,
            fetch_attempts: MAX_FETCH_ATTEMPTS,
            fetch_retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Completed,
    NotFound,
    FetchFailed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub groups: usize,
    pub segments: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub merged: usize,
    pub merges_skipped: usize,
    pub merges_failed: usize,
}

impl CategoryReport {
    fn record(&mut self, result: &Result<DownloadOutcome, DownloadError>) {
        match result {
            Ok(DownloadOutcome::Downloaded) => self.downloaded += 1,
            Ok(DownloadOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub status: AccountStatus,
    pub attempts: usize,
    pub stories: CategoryReport,
    pub curated: CategoryReport,
    pub spotlight: CategoryReport,
    pub elapsed_ms: u128,
}

impl AccountReport {
    fn new(account: &Account) -> Self {
        Self {
            account: account.as_str().to_string(),
            status: AccountStatus::Completed,
            attempts: 0,
            stories: CategoryReport::default(),
            curated: CategoryReport::default(),
            spotlight: CategoryReport::default(),
            elapsed_ms: 0,
        }
    }

    pub fn category(&self, category: FeedCategory) -> &CategoryReport {
        match category {
            FeedCategory::Stories => &self.stories,
            FeedCategory::Curated => &self.curated,
            FeedCategory::Spotlight => &self.spotlight,
        }
    }

    fn category_mut(&mut self, category: FeedCategory) -> &mut CategoryReport {
        match category {
            FeedCategory::Stories => &mut self.stories,
            FeedCategory::Curated => &mut self.curated,
            FeedCategory::Spotlight => &mut self.spotlight,
        }
    }
}

type PoolResult = (FeedCategory, Result<DownloadOutcome, DownloadError>);

/// Running part counters, so segments that share a name key get distinct numbers.
struct Ordinals<K>(HashMap<K, usize>);

impl<K: Eq + Hash> Ordinals<K> {
    fn new() -> Self {
        Self(HashMap::new())
    }

    /// Claims `count` numbers for `key` and returns how many were taken before.
    fn reserve(&mut self, key: K, count: usize) -> usize {
        let used = self.0.entry(key).or_insert(0);
        let offset = *used;
        *used += count;
        offset
    }
}

/// Per-account download driver.
pub struct App<F: FeedSource, M: MediaSource + 'static, T: MergeTool> {
    store: Store,
    feed: F,
    downloader: AssetDownloader<M>,
    merger: MultipartMerger<T>,
    normalizer: TimeNormalizer,
    options: PipelineOptions,
    cancel: CancelToken,
}

impl<F: FeedSource, M: MediaSource + 'static, T: MergeTool> App<F, M, T> {
    pub fn new(
        store: Store,
        feed: F,
        downloader: AssetDownloader<M>,
        merger: MultipartMerger<T>,
        normalizer: TimeNormalizer,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            feed,
            downloader,
            merger,
            normalizer,
            options,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn merger(&self) -> &MultipartMerger<T> {
        &self.merger
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn download_account(&self, account: &Account) -> AccountReport {
        let started = Instant::now();
        let mut report = AccountReport::new(account);
        tracing::info!("calling feed endpoint for {account}");

        let (fetched, feed) = match self.fetch_with_retries(account, &mut report) {
            Some(fetched) => fetched,
            None => {
                report.elapsed_ms = started.elapsed().as_millis();
                return report;
            }
        };

        let swept = self.store.sweep_partial_downloads(account);
        if swept > 0 {
            tracing::info!("removed {swept} unfinished downloads for {account}");
        }
        self.write_account_dumps(account, &fetched, &feed);
        self.download_avatars(account, &feed.profile);

        let pool = self
            .options
            .no_multipart
            .then(|| WorkerPool::<PoolResult>::new(self.options.max_workers, self.cancel.clone()));

        if feed.stories.is_empty() {
            tracing::info!("{account} has no public stories");
        } else if !self.options.skip_stories {
            tracing::info!("{account} has {} public stories", feed.stories.len());
            self.download_stories(account, &feed, pool.as_ref(), &mut report);
        }

        if feed.curated.is_empty() {
            tracing::info!("{account} has no curated highlights");
        } else if !self.options.skip_curated {
            tracing::info!("{account} has {} curated highlights", feed.curated.len());
            self.download_groups(
                account,
                &feed.profile,
                FeedCategory::Curated,
                &feed.curated,
                pool.as_ref(),
                &mut report,
            );
        }

        if feed.spotlight.is_empty() {
            tracing::info!("{account} has no spotlight highlights");
        } else if !self.options.skip_spotlight {
            tracing::info!("{account} has {} spotlight highlights", feed.spotlight.len());
            self.download_groups(
                account,
                &feed.profile,
                FeedCategory::Spotlight,
                &feed.spotlight,
                pool.as_ref(),
                &mut report,
            );
        }

        if let Some(pool) = pool {
            for (category, result) in pool.finish() {
                report.category_mut(category).record(&result);
            }
        }

        if self.cancel.is_cancelled() {
            report.status = AccountStatus::Cancelled;
        }
        for category in [
            FeedCategory::Stories,
            FeedCategory::Curated,
            FeedCategory::Spotlight,
        ] {
            log_summary(account, category, report.category(category));
        }
        report.elapsed_ms = started.elapsed().as_millis();
        tracing::info!("completed processing for {account}");
        report
    }

    fn fetch_with_retries(
        &self,
        account: &Account,
        report: &mut AccountReport,
    ) -> Option<(FetchedFeed, ParsedFeed)> {
        let attempts = self.options.fetch_attempts.max(1);
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                report.status = AccountStatus::Cancelled;
                return None;
            }
            report.attempts = attempt;
            let result = fetch_feed(&self.feed, account)
                .map_err(AttemptError::from)
                .and_then(|fetched| {
                    let parsed = parse(&fetched.payload)?;
                    Ok((fetched, parsed))
                });
            match result {
                Ok(fetched) => return Some(fetched),
                Err(err) if !err.is_retryable() => {
                    tracing::error!("{account} is not a valid user");
                    report.status = AccountStatus::NotFound;
                    return None;
                }
                Err(err) => {
                    tracing::warn!(attempt, "feed attempt for {account} failed: {err}");
                    if attempt < attempts && !self.options.fetch_retry_delay.is_zero() {
                        thread::sleep(self.options.fetch_retry_delay * attempt as u32);
                    }
                }
            }
        }
        tracing::error!("unable to process feed results for {account}");
        report.status = AccountStatus::FetchFailed;
        None
    }

    fn write_account_dumps(&self, account: &Account, fetched: &FetchedFeed, feed: &ParsedFeed) {
        let page = Value::String(fetched.html.clone());
        let blocks = Value::from(fetched.raw_blocks());
        let mut dumps: Vec<(&str, &Value)> = vec![
            ("_response", &page),
            ("_raw", &blocks),
            ("", &fetched.payload.value),
            ("_user", &feed.profile.raw),
        ];
        if !feed.stories.is_empty() {
            dumps.push(("_stories", &feed.raw_stories));
        }
        if !feed.curated.is_empty() {
            dumps.push(("_curated", &feed.raw_curated));
        }
        if !feed.spotlight.is_empty() {
            dumps.push(("_spotlight", &feed.raw_spotlight));
        }
        for (suffix, value) in dumps {
            let path = self.store.account_dump_path(account, suffix);
            if let Err(err) = Store::write_json(&path, value) {
                tracing::warn!("could not write {path}: {err}");
            }
        }
    }

    fn download_avatars(&self, account: &Account, profile: &Profile) {
        let downloader = self.downloader.without_sleep();
        let avatars = [
            (
                profile.preview_image_url.as_deref(),
                self.store.preview_avatar_path(account, profile),
            ),
            (
                profile.hero_image_url.as_deref(),
                self.store.hero_avatar_path(account, profile),
            ),
        ];
        for (url, path) in avatars {
            let Some(url) = url else {
                continue;
            };
            if let Err(err) = downloader.download(url, path.as_std_path()) {
                tracing::warn!("avatar download failed for {account}: {err}");
            }
        }
    }

    fn download_stories(
        &self,
        account: &Account,
        feed: &ParsedFeed,
        pool: Option<&WorkerPool<PoolResult>>,
        report: &mut AccountReport,
    ) {
        let runs = multipart::group(&feed.stories, &self.normalizer);
        report.stories.groups = runs.len();
        let mut ordinals = Ordinals::new();
        for run in &runs {
            let offset = ordinals.reserve(run.key, run.len());
            let mut parts = Vec::with_capacity(run.len());
            for part in &run.parts {
                if self.cancel.is_cancelled() {
                    return;
                }
                let path = self.store.story_path(
                    account,
                    run.key,
                    offset + part.part,
                    part.segment.kind,
                );
                self.fetch_segment(
                    FeedCategory::Stories,
                    &feed.profile,
                    &part.segment,
                    &path,
                    pool,
                    report,
                );
                parts.push(path.into_std_path_buf());
            }
            if !self.options.no_multipart && run.needs_merge() {
                self.merge_run(account, run, offset + 1, &parts, report);
            }
        }
    }

    fn merge_run(
        &self,
        account: &Account,
        run: &MultipartRun,
        first: usize,
        parts: &[PathBuf],
        report: &mut AccountReport,
    ) {
        let output = self
            .store
            .merged_story_path(account, run.key, first, run.len());
        match self.merger.merge(output.as_std_path(), parts) {
            Ok(MergeOutcome::Merged) => report.stories.merged += 1,
            Ok(MergeOutcome::Skipped) => report.stories.merges_skipped += 1,
            Err(err) => {
                tracing::error!("multipart merge failed for {output}: {err}");
                report.stories.merges_failed += 1;
            }
        }
    }

    fn download_groups(
        &self,
        account: &Account,
        profile: &Profile,
        category: FeedCategory,
        groups: &[HighlightGroup],
        pool: Option<&WorkerPool<PoolResult>>,
        report: &mut AccountReport,
    ) {
        report.category_mut(category).groups = groups.len();
        // Numbering runs across groups: titles repeat and spotlight groups share seconds.
        let mut titles = Ordinals::new();
        let mut stamps = Ordinals::new();
        for group in groups {
            let runs = multipart::group(&group.segments, &self.normalizer);
            for run in &runs {
                let offset = match category {
                    FeedCategory::Curated => {
                        titles.reserve(store::sanitize(&group.title), run.len())
                    }
                    _ => stamps.reserve(run.key, run.len()),
                };
                for part in &run.parts {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    let number = offset + part.part;
                    let path = match category {
                        FeedCategory::Curated => self.store.curated_path(
                            account,
                            &group.title,
                            run.key,
                            number,
                            part.segment.kind,
                        ),
                        _ => self.store.spotlight_path(
                            account,
                            run.key,
                            number,
                            part.segment.kind,
                        ),
                    };
                    self.fetch_segment(category, profile, &part.segment, &path, pool, report);
                }
            }
        }
    }

    fn fetch_segment(
        &self,
        category: FeedCategory,
        profile: &Profile,
        segment: &MediaSegment,
        path: &Utf8Path,
        pool: Option<&WorkerPool<PoolResult>>,
        report: &mut AccountReport,
    ) {
        report.category_mut(category).segments += 1;
        if self.options.dump_metadata {
            self.dump_segment(profile, segment, path);
        }

        match pool {
            Some(pool) => {
                let downloader = self.downloader.clone();
                let url = segment.url.clone();
                let target = path.to_path_buf().into_std_path_buf();
                pool.submit(move || {
                    let result = downloader.download(&url, &target);
                    if let Err(err) = &result {
                        tracing::error!("download failed for {}: {err}", target.display());
                    }
                    (category, result)
                });
            }
            None => {
                let result = self.downloader.download(&segment.url, path.as_std_path());
                if let Err(err) = &result {
                    tracing::error!("download failed for {path}: {err}");
                }
                report.category_mut(category).record(&result);
            }
        }
    }

    fn dump_segment(&self, profile: &Profile, segment: &MediaSegment, media_path: &Utf8Path) {
        let mut record = segment.raw.clone();
        if let Value::Object(map) = &mut record {
            map.insert("snapUser".to_string(), profile.raw.clone());
        }
        let path = media_path.with_extension("json");
        if let Err(err) = Store::write_json(&path, &record) {
            tracing::warn!("could not write {path}: {err}");
        }
    }
}

fn log_summary(account: &Account, category: FeedCategory, report: &CategoryReport) {
    if report.segments == 0 {
        return;
    }
    let mut line = format!(
        "{} {} downloaded ({}) or existing ({}) for {account}",
        report.segments,
        category.label(),
        report.downloaded,
        report.skipped
    );
    if report.failed > 0 {
        line.push_str(&format!(", {} failed", report.failed));
    }
    if report.merged > 0 {
        line.push_str(&format!(", {} multipart merged", report.merged));
    }
    if report.downloaded > 0 {
        tracing::info!(target: SUMMARY_TARGET, "[✔] {line}");
    } else {
        tracing::info!(target: SUMMARY_TARGET, "[-] {line}");
    }
}
