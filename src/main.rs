use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;

use claude_usage_bar::config::{self, ConfigError, Settings, SourceKind};
use claude_usage_bar::display::{DisplayModel, TitleOptions};
use claude_usage_bar::fetcher;
use claude_usage_bar::models::UsageSnapshot;
use claude_usage_bar::poller::Poller;

const ONCE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(author, version, about = "Claude session and weekly usage indicator")]
struct Cli {
    /// Where usage comes from; overrides the settings file.
    #[arg(long, value_enum)]
    source: Option<SourceKind>,
    /// Poll interval in seconds.
    #[arg(long)]
    interval: Option<u64>,
    /// Show percentages next to the icon.
    #[arg(long, conflicts_with = "no_values")]
    values: bool,
    /// Show the icon only.
    #[arg(long)]
    no_values: bool,
    /// Prefix percentages with S:/W:.
    #[arg(long)]
    labels: bool,
    /// Settings file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Fetch once, print and exit.
    #[arg(long)]
    once: bool,
    /// Print detail rows under the title.
    #[arg(long)]
    details: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(source) = self.source {
            settings.source = source;
        }
        if let Some(secs) = self.interval {
            settings.poll_interval_secs = secs;
        }
        if self.values {
            settings.show_values = true;
        }
        if self.no_values {
            settings.show_values = false;
        }
        if self.labels {
            settings.show_labels = true;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let mut settings = match cli.config.clone().or_else(config::default_settings_path) {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    cli.apply(&mut settings);
    Ok(settings)
}

fn print_frame(snapshot: &UsageSnapshot, options: TitleOptions, details: bool) {
    let model = DisplayModel::build(snapshot, options, Utc::now());
    println!("{}", model.title);
    if !details {
        return;
    }
    if let Some(error) = &model.error {
        println!("  Error: {error}");
    }
    println!("  Updated: {}", model.updated);
    for row in &model.rows {
        let advice = row.advice().map(|a| format!("  {a}")).unwrap_or_default();
        println!(
            "  {:<14} {:>5}  resets in {}{advice}",
            row.title,
            row.percentage_text(),
            row.time_remaining
        );
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let settings = match load_settings(&cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let claude_dir = match config::claude_dir() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let options = TitleOptions {
        show_values: settings.show_values,
        show_labels: settings.labels_visible(),
    };
    let details = cli.details;

    let mut poller = Poller::new(fetcher::from_settings(&settings, &claude_dir));

    if cli.once {
        poller.refresh();
        if !poller.wait_for_update(ONCE_TIMEOUT) {
            eprintln!("Timed out waiting for usage");
            return ExitCode::FAILURE;
        }
        print_frame(poller.snapshot(), options, details);
        return if poller.snapshot().last_error.is_some() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    poller.on_update(move |snapshot| print_frame(snapshot, options, details));

    let handle = poller.handle();
    if let Err(e) = ctrlc::set_handler(move || {
        handle.shutdown();
    }) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    // Enter on stdin acts as the manual refresh button.
    let handle = poller.handle();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || !handle.refresh() {
                break;
            }
        }
    });

    poller.start(settings.poll_interval());
    poller.run();
    ExitCode::SUCCESS
}
