use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use clap::{CommandFactory, Parser};
use miette::IntoDiagnostic;

use snapgrab::app::{App, PipelineOptions};
use snapgrab::config::{ConfigLoader, ResolvedConfig};
use snapgrab::discovery::{self, SystemClipboard};
use snapgrab::domain::Account;
use snapgrab::error::SnapError;
use snapgrab::feed::{FeedHttpClient, FeedSource};
use snapgrab::logging::{self, LogOptions};
use snapgrab::media::{AssetDownloader, DownloadSettings, MediaHttpClient, MediaSource};
use snapgrab::merge::{FfmpegTool, MergeTool, MultipartMerger};
use snapgrab::output::{JsonOutput, OutputMode};
use snapgrab::pool::CancelToken;
use snapgrab::store::Store;
use snapgrab::timezone::TimeNormalizer;
use snapgrab::watch::{self, WatchSettings};

const INTERRUPTED_EXIT_CODE: u8 = 130;

#[derive(Parser)]
#[command(name = "snapgrab")]
#[command(about = "Archive public Snapchat stories, curated highlights and spotlight highlights")]
#[command(version, author)]
struct Cli {
    /// Usernames to download.
    usernames: Vec<String>,

    #[arg(short = 'o', long, help = "Folder the archive is written to (default: working directory)")]
    root_folder: Option<PathBuf>,

    #[arg(long, help = "Add every account folder found under the root folder")]
    scan_root_folder: bool,

    #[arg(short = 'i', long, value_name = "FILE", help = "Read usernames from a file, one per line")]
    scan_batch_file: Option<PathBuf>,

    #[arg(short = 'c', long, conflicts_with = "check_for_update", help = "Listen for story links copied to the clipboard")]
    scan_clipboard: bool,

    #[arg(short = 'u', long, help = "Re-check every account periodically")]
    check_for_update: bool,

    #[arg(long)]
    skip_stories: bool,

    #[arg(long)]
    skip_curated: bool,

    #[arg(long)]
    skip_spotlight: bool,

    #[arg(short = 'd', long, help = "Write a JSON sidecar next to every downloaded snap")]
    dump_json: bool,

    #[arg(long, help = "Write a shell script replaying each multipart merge")]
    generate_scripts: bool,

    #[arg(long, help = "Keep story parts separate and download them in parallel")]
    no_multipart: bool,

    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    #[arg(long, value_name = "SECS")]
    update_interval: Option<u64>,

    #[arg(short = 's', long, value_name = "SECS")]
    sleep_interval: Option<u64>,

    #[arg(short = 'f', long, help = "Skip files that already exist without asking the server")]
    fast: bool,

    #[arg(short = 'q', long)]
    quiet: bool,

    #[arg(short = 'a', long, help = "Plain log output for scheduled runs")]
    automated: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Print the run report as JSON on stdout")]
    json: bool,
}

fn main() -> ExitCode {
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        return ExitCode::from(1);
    }
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            match report.downcast_ref::<SnapError>() {
                Some(err) => ExitCode::from(map_exit_code(err)),
                None => ExitCode::from(1),
            }
        }
    }
}

/// First Ctrl-C stops after the current segment, a second one exits at once.
fn install_interrupt_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(INTERRUPTED_EXIT_CODE.into());
        }
        tracing::warn!("interrupt received, stopping after the current download");
        handler_token.cancel();
    });
    if let Err(err) = installed {
        tracing::warn!("could not install the Ctrl-C handler: {err}");
    }
    cancel
}

fn map_exit_code(error: &SnapError) -> u8 {
    match error {
        SnapError::InvalidAccount(_)
        | SnapError::InvalidTimezone(_)
        | SnapError::ConfigRead(_)
        | SnapError::ConfigParse(_)
        | SnapError::NoAccounts => 2,
        _ => 1,
    }
}

fn run(cli: Cli) -> miette::Result<ExitCode> {
    let log_options = LogOptions {
        quiet: cli.quiet,
        automated: cli.automated,
    };
    if let Err(err) = logging::init_logging(log_options) {
        logging::init_logging_stderr(log_options);
        tracing::warn!("file logging disabled: {err}");
    }

    let cancel = install_interrupt_handler();
    let started = Instant::now();
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let root = match cli.root_folder.clone().or_else(|| resolved.root_folder.clone()) {
        Some(path) => Utf8PathBuf::from_path_buf(path)
            .map_err(|_| SnapError::Filesystem("non-utf8 root folder".to_string()))?,
        None => Store::from_current_dir()?.root().to_path_buf(),
    };
    let accounts = collect_accounts(&cli, &resolved, &root)?;
    if accounts.is_empty() && !cli.scan_clipboard {
        return Err(SnapError::NoAccounts.into());
    }

    let tool = match &resolved.merge_tool {
        Some(path) => FfmpegTool::with_path(path.clone()),
        None => FfmpegTool::new(),
    };
    if !cli.no_multipart && tool.program().is_err() {
        tracing::warn!("ffmpeg not found on PATH, multipart stories will stay in parts");
    }

    let sleep_interval = cli.sleep_interval.unwrap_or(resolved.sleep_interval);
    let downloader = AssetDownloader::new(
        Arc::new(MediaHttpClient::new()?),
        DownloadSettings {
            sleep_interval: Duration::from_secs(sleep_interval),
            skip_size_check: cli.fast,
        },
    );
    let options = PipelineOptions {
        skip_stories: cli.skip_stories,
        skip_curated: cli.skip_curated,
        skip_spotlight: cli.skip_spotlight,
        no_multipart: cli.no_multipart,
        dump_metadata: cli.dump_json,
        max_workers: cli.max_workers.unwrap_or(resolved.max_workers).max(1),
        ..PipelineOptions::default()
    };
    let app = App::new(
        Store::new(root),
        FeedHttpClient::new()?,
        downloader,
        MultipartMerger::new(tool, cli.generate_scripts),
        TimeNormalizer::for_zone(&resolved.reference_timezone)?,
        options,
    )
    .with_cancel_token(cancel);
    let settings = WatchSettings {
        account_pause: Duration::from_secs(sleep_interval),
        update_interval: Duration::from_secs(
            cli.update_interval.unwrap_or(resolved.update_interval),
        ),
        ..WatchSettings::default()
    };

    if cli.check_for_update {
        watch::run_update_loop(&app, &accounts, &settings);
        return Ok(finish(&app));
    }

    let reports = watch::download_pass(&app, &accounts, &settings);

    if cli.scan_clipboard {
        let clipboard = SystemClipboard::detect().ok_or_else(|| {
            miette::Report::msg("no clipboard tool found (install wl-paste, xclip or xsel)")
        })?;
        let mut seen: HashSet<Account> = accounts.iter().cloned().collect();
        watch::run_clipboard_loop(&app, &clipboard, &mut seen, &settings);
        return Ok(finish(&app));
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!("finished {} accounts in {elapsed:.2}s", reports.len());
    if matches!(output_mode, OutputMode::Json) {
        JsonOutput::print_reports(&reports, elapsed).into_diagnostic()?;
    }
    Ok(finish(&app))
}

fn finish<F, M, T>(app: &App<F, M, T>) -> ExitCode
where
    F: FeedSource,
    M: MediaSource + 'static,
    T: MergeTool,
{
    if app.cancel_token().is_cancelled() {
        tracing::warn!("interrupted, unfinished downloads are removed on the next run");
        ExitCode::from(INTERRUPTED_EXIT_CODE)
    } else {
        ExitCode::SUCCESS
    }
}

fn collect_accounts(
    cli: &Cli,
    resolved: &ResolvedConfig,
    root: &Utf8Path,
) -> Result<Vec<Account>, SnapError> {
    let mut accounts: Vec<Account> = Vec::new();
    let mut push = |account: Account| {
        if !accounts.contains(&account) {
            accounts.push(account);
        }
    };

    for name in &cli.usernames {
        push(name.trim().parse()?);
    }
    for account in &resolved.usernames {
        push(account.clone());
    }
    if let Some(path) = &cli.scan_batch_file {
        match discovery::read_batch_file(path) {
            Ok(found) => found.into_iter().for_each(&mut push),
            Err(err) => tracing::error!("invalid batch file: {err}"),
        }
    }
    if cli.scan_root_folder {
        match discovery::scan_root_folder(root.as_std_path()) {
            Ok(found) => found.into_iter().for_each(&mut push),
            Err(err) => tracing::error!("root folder does not exist: {err}"),
        }
    }
    Ok(accounts)
}
