//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use courtlink_core::{
    CheckStatus, CourtImportStats, ImportReport, ProgressReporter, VerificationMode,
    VerificationReport, VerifyOptions,
};
use courtlink_geocoding::{CacheGeocoder, GeocodingChain};
use courtlink_shared::{
    AppConfig, CourtLinkError, GeocodingConfig, database_path, init_config, load_config,
    load_config_from, secondary_api_key,
};
use courtlink_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Exit status when verification fails.
pub(crate) const EXIT_VERIFY_FAILED: u8 = 1;
/// Exit status for configuration errors.
pub(crate) const EXIT_CONFIG: u8 = 2;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// courtlink: map detention facilities to federal district courts.
#[derive(Parser)]
#[command(
    name = "courtlink",
    version,
    about = "Geocode detention facilities and link them to the district courts covering their counties.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.courtlink/courtlink.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database location: a path, file:, sqlite:// or libsql:// URL.
    #[arg(long, global = true, env = "COURTLINK_DATABASE_URL")]
    pub db: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Verification strictness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ModeArg {
    SchemaOnly,
    BasicData,
    FullCheck,
}

impl From<ModeArg> for VerificationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SchemaOnly => Self::SchemaOnly,
            ModeArg::BasicData => Self::BasicData,
            ModeArg::FullCheck => Self::FullCheck,
        }
    }
}

/// Where addresses are geocoded from.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct OfflineArgs {
    /// Use a geocoded cache file instead of the network providers.
    #[arg(long, requires = "cache")]
    pub offline: bool,

    /// Cache file written by `courtlink geocode`.
    #[arg(long, requires = "offline")]
    pub cache: Option<PathBuf>,
}

/// Court tables loaded by `run` before the facilities.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct CourtFiles {
    /// Courts CSV (court, abbreviation, url).
    #[arg(long, requires = "counties")]
    pub courts: Option<PathBuf>,

    /// Counties CSV (court_abbreviation, county_name, state).
    #[arg(long, requires = "courts")]
    pub counties: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Pre-flight check, court and facility loading, then verification.
    Run {
        /// Facility file (csv, tsv, txt, xlsx, xls or ods).
        input: PathBuf,

        #[command(flatten)]
        offline: OfflineArgs,

        #[command(flatten)]
        court_files: CourtFiles,
    },

    /// Import facilities without verification.
    Import {
        /// Facility file (csv, tsv, txt, xlsx, xls or ods).
        input: PathBuf,

        #[command(flatten)]
        offline: OfflineArgs,
    },

    /// Geocode a facility file into a cache CSV for offline imports.
    Geocode {
        /// Facility file (csv, tsv, txt, xlsx, xls or ods).
        input: PathBuf,

        /// Output cache file.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Load courts and their counties.
    Courts {
        /// Courts CSV (court, abbreviation, url).
        courts: PathBuf,

        /// Counties CSV (court_abbreviation, county_name, state).
        counties: PathBuf,
    },

    /// Verify the database without modifying it.
    Verify {
        #[arg(long, value_enum, default_value = "full-check")]
        mode: ModeArg,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "courtlink=info",
        1 => "courtlink=debug",
        _ => "courtlink=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Whether `report` was caused by a configuration problem.
pub(crate) fn is_config_error(report: &Report) -> bool {
    report
        .chain()
        .any(|e| e.downcast_ref::<CourtLinkError>().is_some_and(|e| e.is_config()))
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolved configuration for one invocation.
struct Settings {
    config: AppConfig,
    db_path: PathBuf,
}

impl Settings {
    /// Config file, then `--db` / `COURTLINK_DATABASE_URL` on top.
    fn resolve(config_path: Option<&Path>, db: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        if let Some(db) = db {
            config.database.url = db.to_string();
        }
        let db_path = database_path(&config.database.url)?;
        Ok(Self { config, db_path })
    }

    fn geocoding(&self) -> GeocodingConfig {
        GeocodingConfig::from(&self.config).with_api_key(secondary_api_key(&self.config))
    }

    fn chain(&self, offline: &OfflineArgs) -> Result<GeocodingChain> {
        match (offline.offline, offline.cache.as_deref()) {
            (true, Some(cache)) => Ok(GeocodingChain::offline(CacheGeocoder::load(cache)?)),
            (true, None) => Err(CourtLinkError::config("--offline requires --cache <file>").into()),
            (false, _) => Ok(GeocodingChain::from_config(&self.geocoding())?),
        }
    }

    fn verify_options(&self, mode: VerificationMode) -> VerifyOptions {
        VerifyOptions {
            mode,
            secondary_key_configured: self.geocoding().api_key.is_some(),
            coverage_warn_pct: self.config.verification.coverage_warn_pct,
        }
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let Cli {
        config, db, command, ..
    } = cli;

    if let Command::Config {
        action: ConfigAction::Init,
    } = command
    {
        return cmd_config_init();
    }

    let settings = Settings::resolve(config.as_deref(), db.as_deref())?;

    match command {
        Command::Run {
            input,
            offline,
            court_files,
        } => cmd_run(&settings, &input, &offline, &court_files).await,
        Command::Import { input, offline } => cmd_import(&settings, &input, &offline).await,
        Command::Geocode { input, out } => cmd_geocode(&settings, &input, &out).await,
        Command::Courts { courts, counties } => cmd_courts(&settings, &courts, &counties).await,
        Command::Verify { mode } => cmd_verify(&settings, mode.into()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&settings),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    settings: &Settings,
    input: &Path,
    offline: &OfflineArgs,
    court_files: &CourtFiles,
) -> Result<ExitCode> {
    // Everything that can be misconfigured is checked before the first record.
    let batch = courtlink_intake::read_facilities(input)?;
    let storage = Storage::open(&settings.db_path).await?;

    let preflight = courtlink_core::verify(
        &storage,
        &settings.verify_options(VerificationMode::SchemaOnly),
    )
    .await?;
    if !preflight.passed {
        print_verification(&preflight);
        return Ok(ExitCode::from(EXIT_VERIFY_FAILED));
    }

    let reporter = CliProgress::new();

    // An offline run with no cache file yet geocodes once to produce it.
    if let Some(cache) = offline.cache.as_deref().filter(|c| offline.offline && !c.exists()) {
        info!(cache = %cache.display(), "geocode cache missing, building it");
        let live = GeocodingChain::from_config(&settings.geocoding())?;
        courtlink_core::build_geocode_cache(&batch, &live, cache, &reporter).await?;
    }
    let chain = settings.chain(offline)?;

    if let (Some(courts), Some(counties)) = (&court_files.courts, &court_files.counties) {
        let stats = courtlink_core::import_courts(&storage, courts, counties, &reporter).await?;
        print_courts(&stats);
    }

    let report = courtlink_core::import_facilities(&storage, &batch, &chain, &reporter).await?;
    print_import(&report);

    let checkpoint = courtlink_core::verify(
        &storage,
        &settings.verify_options(VerificationMode::BasicData),
    )
    .await?;
    if !checkpoint.passed {
        print_verification(&checkpoint);
        return Ok(ExitCode::from(EXIT_VERIFY_FAILED));
    }

    let verification = courtlink_core::verify(
        &storage,
        &settings.verify_options(VerificationMode::FullCheck),
    )
    .await?;
    print_verification(&verification);
    Ok(exit_for(&verification))
}

async fn cmd_import(settings: &Settings, input: &Path, offline: &OfflineArgs) -> Result<ExitCode> {
    let batch = courtlink_intake::read_facilities(input)?;
    let chain = settings.chain(offline)?;
    let storage = Storage::open(&settings.db_path).await?;

    info!(
        input = %input.display(),
        db = %settings.db_path.display(),
        offline = offline.offline,
        "importing facilities"
    );

    let reporter = CliProgress::new();
    let report = courtlink_core::import_facilities(&storage, &batch, &chain, &reporter).await?;
    print_import(&report);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_geocode(settings: &Settings, input: &Path, out: &Path) -> Result<ExitCode> {
    let batch = courtlink_intake::read_facilities(input)?;
    let chain = GeocodingChain::from_config(&settings.geocoding())?;

    let reporter = CliProgress::new();
    let stats = courtlink_core::build_geocode_cache(&batch, &chain, out, &reporter).await?;

    println!();
    println!("  Geocode cache written: {}", out.display());
    println!("  Rows:        {}", stats.rows_written);
    println!("  Geocoded:    {}", stats.geocoded);
    println!("  Failed:      {}", stats.failed);
    println!("  Incomplete:  {}", stats.incomplete);
    println!();
    Ok(ExitCode::SUCCESS)
}

async fn cmd_courts(settings: &Settings, courts: &Path, counties: &Path) -> Result<ExitCode> {
    let storage = Storage::open(&settings.db_path).await?;
    let reporter = CliProgress::new();
    let stats = courtlink_core::import_courts(&storage, courts, counties, &reporter).await?;
    print_courts(&stats);
    Ok(ExitCode::SUCCESS)
}

fn print_courts(stats: &CourtImportStats) {
    println!();
    println!("  Courts imported");
    println!(
        "  Courts:    {} new, {} updated, {} unchanged, {} rejected",
        stats.courts_inserted, stats.courts_updated, stats.courts_unchanged, stats.courts_rejected
    );
    println!(
        "  Counties:  {} new, {} existing, {} unknown court, {} rejected",
        stats.counties_inserted,
        stats.counties_existing,
        stats.counties_unknown_court,
        stats.counties_rejected
    );
    println!();
}

async fn cmd_verify(settings: &Settings, mode: VerificationMode) -> Result<ExitCode> {
    let storage = Storage::open_readonly(&settings.db_path).await?;
    let report = courtlink_core::verify(&storage, &settings.verify_options(mode)).await?;
    print_verification(&report);
    Ok(exit_for(&report))
}

fn cmd_config_init() -> Result<ExitCode> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(settings: &Settings) -> Result<ExitCode> {
    let toml_str = toml::to_string_pretty(&settings.config)?;
    println!("{toml_str}");
    println!("# database path: {}", settings.db_path.display());
    let key_state = if settings.geocoding().api_key.is_some() {
        "set"
    } else {
        "not set"
    };
    println!(
        "# {}: {key_state}",
        settings.config.geocoding.api_key_env
    );
    Ok(ExitCode::SUCCESS)
}

fn exit_for(report: &VerificationReport) -> ExitCode {
    if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_VERIFY_FAILED)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_import(report: &ImportReport) {
    let s = &report.stats;
    let providers: Vec<&str> = report.providers.iter().map(|p| p.as_str()).collect();

    println!();
    println!("  Facility import complete");
    println!("  Run:        {}", report.run_id);
    println!("  Source:     {}", report.source.display());
    println!("  Geocoders:  {}", providers.join(" -> "));
    println!(
        "  Records:    {} total, {} added, {} updated, {} unchanged, {} skipped, {} failed",
        s.records_total,
        s.records_added,
        s.records_updated,
        s.records_unchanged,
        s.records_skipped,
        s.records_failed
    );
    println!(
        "  Geocoding:  {} geocoded, {} failed",
        s.addresses_geocoded, s.geocode_failures
    );
    println!(
        "  Courts:     {} mapped, {} unmapped",
        s.courts_mapped, s.courts_unmapped
    );
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());

    if !report.unmatched.is_empty() {
        println!();
        println!("  Counties without a court (manual follow-up):");
        for u in &report.unmatched {
            println!("    {} ({}, {})", u.facility, u.county, u.state);
        }
    }
    println!();
}

fn print_verification(report: &VerificationReport) {
    println!();
    println!("  Verification ({})", report.mode);
    for check in &report.checks {
        let tag = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        println!("  [{tag}] {}: {}", check.name, check.detail);
    }
    for orphan in &report.orphans {
        println!(
            "         orphan county #{}: {} ({}) -> court {}",
            orphan.id, orphan.county_name, orphan.state, orphan.court_id
        );
    }
    println!(
        "  Result: {}",
        if report.passed { "passed" } else { "FAILED" }
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {name}"));
    }

    fn done(&self) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_mode_defaults_to_full_check() {
        let cli = Cli::try_parse_from(["courtlink", "verify"]).unwrap();
        match cli.command {
            Command::Verify { mode } => assert_eq!(mode, ModeArg::FullCheck),
            _ => panic!("expected verify"),
        }

        let cli = Cli::try_parse_from(["courtlink", "verify", "--mode", "schema-only"]).unwrap();
        match cli.command {
            Command::Verify { mode } => {
                assert_eq!(VerificationMode::from(mode), VerificationMode::SchemaOnly)
            }
            _ => panic!("expected verify"),
        }
    }

    #[test]
    fn offline_requires_cache() {
        assert!(Cli::try_parse_from(["courtlink", "import", "in.csv", "--offline"]).is_err());
        let cli = Cli::try_parse_from([
            "courtlink",
            "run",
            "in.csv",
            "--offline",
            "--cache",
            "cache.csv",
            "--db",
            "sqlite://var/test.db",
        ])
        .unwrap();
        assert_eq!(cli.db.as_deref(), Some("sqlite://var/test.db"));
        match cli.command {
            Command::Run { offline, .. } => {
                assert!(offline.offline);
                assert_eq!(offline.cache, Some(PathBuf::from("cache.csv")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cache_requires_offline() {
        let parsed = Cli::try_parse_from(["courtlink", "import", "in.csv", "--cache", "c.csv"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn run_takes_court_files_as_a_pair() {
        assert!(Cli::try_parse_from(["courtlink", "run", "in.csv", "--courts", "c.csv"]).is_err());

        let cli = Cli::try_parse_from([
            "courtlink",
            "run",
            "in.csv",
            "--courts",
            "courts.csv",
            "--counties",
            "counties.csv",
        ])
        .unwrap();
        match cli.command {
            Command::Run { court_files, .. } => {
                assert_eq!(court_files.courts, Some(PathBuf::from("courts.csv")));
                assert_eq!(court_files.counties, Some(PathBuf::from("counties.csv")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn config_errors_are_detected_through_reports() {
        let report: Report = CourtLinkError::config("bad url").into();
        assert!(is_config_error(&report));
        let report: Report = CourtLinkError::Storage("locked".into()).into();
        assert!(!is_config_error(&report));
    }

    #[test]
    fn malformed_database_url_is_config_error() {
        let err = Settings::resolve(None, Some("postgres://db/courts"))
            .err()
            .expect("rejected");
        assert!(is_config_error(&err));
    }
}
