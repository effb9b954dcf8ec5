use anyhow::Context as _;
use clap::{Args, CommandFactory, Parser, Subcommand};
use srcset_lens_common::Config;
use srcset_lens_core::{
    analyze, format_demand_table, format_selection_table, format_variations, load_context,
    profile, read_variations, recommend, resolve_range, write_outputs, ContextDataset,
    PipelineConfig, Recommendation, RenderProfile, ViewportRange, WebDriverEngine,
};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMAND_ROWS: usize = 15;
/// extra time past the profiling deadline before the blocking task is abandoned
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

fn parse_count(s: &str) -> Result<usize, String> { // reject 0 at parse time
    let v: usize = s.parse().map_err(|_| format!("not a positive integer: {s}"))?;
    if v >= 1 { Ok(v) } else { Err("count must be at least 1".into()) }
}

fn parse_viewport(s: &str) -> Result<u32, String> {
    let v: u32 = s.parse().map_err(|_| format!("not a viewport width: {s}"))?;
    if v >= 1 { Ok(v) } else { Err("viewport width must be at least 1".into()) }
}

#[derive(Parser)]
#[command(name = "srcset-lens", version, about = "Recommend srcset image widths from measured layout and visitor data")]
struct Cli {
    /// -v for debug logs, -vv for per-viewport tracing
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct ProfilingArgs {
    #[arg(long, value_parser = parse_viewport)] min_viewport: Option<u32>,
    #[arg(long, value_parser = parse_viewport)] max_viewport: Option<u32>,
    /// settle time after each resize
    #[arg(long)] delay_ms: Option<u64>,
    #[arg(long)] viewport_height: Option<u32>,
    /// overall limit for the profiling run
    #[arg(long)] timeout_secs: Option<u64>,
    /// WebDriver endpoint, e.g. http://localhost:9515
    #[arg(long)] webdriver: Option<String>,
    #[arg(long)] browser: Option<String>,
    #[arg(long)] headful: bool,
}

impl ProfilingArgs {
    fn apply(&self, config: &mut Config) {
        if self.min_viewport.is_some() { config.profiling.min_viewport = self.min_viewport; }
        if self.max_viewport.is_some() { config.profiling.max_viewport = self.max_viewport; }
        if let Some(d) = self.delay_ms { config.profiling.delay_ms = d; }
        if let Some(h) = self.viewport_height { config.profiling.viewport_height = h; }
        if self.timeout_secs.is_some() { config.profiling.timeout_secs = self.timeout_secs; }
        if let Some(ref w) = self.webdriver { config.webdriver.endpoint = w.clone(); }
        if let Some(ref b) = self.browser { config.webdriver.browser = b.clone(); }
        if self.headful { config.webdriver.headless = false; }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the element, build the demand histogram and pick widths
    Recommend {
        url: String,
        selector: String,
        #[arg(long)] context: PathBuf,
        #[arg(long, value_parser = parse_count)] count: Option<usize>,
        #[command(flatten)] profiling: ProfilingArgs,
        #[arg(long)] output_dir: Option<String>,
        #[arg(long)] json: Option<PathBuf>,
        /// print only; skip the variations and recommendation files
        #[arg(long)] no_files: bool,
    },
    /// Measure rendered width per viewport and write the variations file
    Profile {
        url: String,
        selector: String,
        /// derive the viewport range from a context file
        #[arg(long)] context: Option<PathBuf>,
        #[command(flatten)] profiling: ProfilingArgs,
        #[arg(long)] output: Option<PathBuf>,
    },
    /// Pick widths from a context file and a previously written variations file
    Select {
        #[arg(long)] context: PathBuf,
        #[arg(long)] variations: PathBuf,
        #[arg(long, value_parser = parse_count)] count: Option<usize>,
        #[arg(long, value_parser = parse_viewport)] min_viewport: Option<u32>,
        #[arg(long, value_parser = parse_viewport)] max_viewport: Option<u32>,
        #[arg(long)] json: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        #[arg(long)] save: bool,
    },
    /// Print shell completions
    Completions { shell: clap_complete::Shell },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,srcset_lens_core=info",
        1 => "info,srcset_lens_core=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_detached(run(cli))
}

/// Drive `fut` to completion, then drop the runtime without joining blocking tasks that
/// a timeout abandoned. The process exits with them still parked in a driver call.
fn run_detached<T>(fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let result = runtime.block_on(fut);
    runtime.shutdown_background();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, path = %Config::config_path().display(), "ignoring unreadable config");
        Config::default()
    });
    match cli.command {
        Commands::Recommend { url, selector, context, count, profiling, output_dir, json, no_files } => {
            profiling.apply(&mut config);
            if let Some(n) = count { config.selection.count = n; }
            if let Some(dir) = output_dir { config.output.dir = dir; }
            if no_files {
                config.output.write_variations = false;
                config.output.write_recommendation = false;
            }
            run_recommend(url, selector, context, json, config).await?
        }
        Commands::Profile { url, selector, context, profiling, output } => {
            profiling.apply(&mut config);
            run_profile(url, selector, context, output, config).await?
        }
        Commands::Select { context, variations, count, min_viewport, max_viewport, json } => {
            if let Some(n) = count { config.selection.count = n; }
            run_select(context, variations, min_viewport, max_viewport, json, &config)?
        }
        Commands::Config { save } => {
            print!("{}", config.to_toml()?);
            if save {
                let path = config.save()?;
                eprintln!("Config saved to {}", path.display());
            }
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "srcset-lens", &mut std::io::stdout());
        }
    }
    Ok(())
}

/// run blocking browser work off the async runtime, bounded by the configured timeout
async fn with_timeout<T, F>(timeout: Option<Duration>, work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> srcset_lens_core::Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    let joined = match timeout {
        // the in-loop and per-request deadlines fire first; this catches a driver that ignores them
        Some(t) => tokio::time::timeout(t + TIMEOUT_GRACE, task)
            .await
            .map_err(|_| anyhow::anyhow!("profiling timed out after {}s", t.as_secs()))?,
        None => task.await,
    };
    Ok(joined.context("profiling task panicked")??)
}

fn print_report(rec: &Recommendation) {
    println!("{:<16} {}", "Page:", rec.url);
    println!("{:<16} {}", "Element:", rec.selector);
    println!("{:<16} {}", "Viewports:", rec.range);
    println!("{:<16} {}", "Breakpoints:", rec.breakpoints.len());
    println!("{:<16} {}", "Ideal widths:", rec.buckets.len());
    println!();
    print!("{}", format_demand_table(&rec.buckets, DEMAND_ROWS));
    println!();
    print!("{}", format_selection_table(&rec.selection, &rec.coverage));
    let widths: Vec<String> = rec.selection.widths().iter().map(|w| w.to_string()).collect();
    println!("{:<16} {}", "srcset widths:", widths.join(","));
}

async fn run_recommend(url: String, selector: String, context: PathBuf, json: Option<PathBuf>, config: Config) -> anyhow::Result<()> {
    let dataset = load_context(&context)?;
    let engine = WebDriverEngine::new(&config.webdriver);
    let pipeline = PipelineConfig::from_config(url, selector, &config);
    let timeout = pipeline.timeout;
    let rec = with_timeout(timeout, move || recommend(&engine, &dataset, &pipeline)).await?;
    print_report(&rec);
    let written = rec.write(&config.output, json.as_deref())?;
    for p in written {
        println!("Wrote {}", p.display());
    }
    Ok(())
}

async fn run_profile(url: String, selector: String, context: Option<PathBuf>, output: Option<PathBuf>, config: Config) -> anyhow::Result<()> {
    let range = match context {
        Some(path) => {
            let dataset = load_context(&path)?;
            resolve_range(&dataset, config.profiling.min_viewport, config.profiling.max_viewport)?
        }
        None => match (config.profiling.min_viewport, config.profiling.max_viewport) {
            (Some(min), Some(max)) => ViewportRange::new(min, max)?,
            _ => anyhow::bail!("profile needs --context or both --min-viewport and --max-viewport"),
        },
    };
    let engine = WebDriverEngine::new(&config.webdriver);
    let pipeline = PipelineConfig::from_config(url, selector, &config);
    let request = pipeline.profile_request(range);
    let measured: RenderProfile = with_timeout(pipeline.timeout, move || profile(&engine, &request)).await?;
    for (vw, w) in measured.breakpoints() {
        println!("{:>6}px -> {w}px", vw);
    }
    let out_path = output.unwrap_or_else(|| config.output.variations_path());
    write_outputs(&[(out_path.clone(), format_variations(&measured))])?;
    println!("Wrote {}", out_path.display());
    Ok(())
}

fn run_select(
    context: PathBuf,
    variations: PathBuf,
    min_viewport: Option<u32>,
    max_viewport: Option<u32>,
    json: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let dataset: ContextDataset = load_context(&context)?;
    let measured = read_variations(&variations)
        .with_context(|| format!("reading variations from {}", variations.display()))?;
    // offline runs default to what was actually measured
    let measured_range = measured.range();
    let range = ViewportRange::new(
        min_viewport.unwrap_or(measured_range.min),
        max_viewport.unwrap_or(measured_range.max),
    )?;
    info!(range = %range, "selecting from saved variations");
    let rec = analyze("-", "-", &dataset, measured, range, config.selection.count)?;
    print_report(&rec);
    if let Some(path) = json {
        write_outputs(&[(path.clone(), rec.to_json()?)])?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn count_parser_rejects_zero() {
        assert!(parse_count("0").is_err());
        assert_eq!(parse_count("4"), Ok(4));
        assert!(parse_viewport("abc").is_err());
    }

    #[test]
    fn timed_out_work_does_not_hold_the_process() {
        let started = std::time::Instant::now();
        let result = run_detached(with_timeout(Some(Duration::ZERO), || {
            std::thread::sleep(Duration::from_secs(10));
            Ok(())
        }));
        assert!(result.unwrap_err().to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(8), "{:?}", started.elapsed());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "srcset-lens", "recommend", "https://example.com", "img", "--context", "ctx.csv",
            "--min-viewport", "320", "--delay-ms", "0", "--headful",
        ])
        .unwrap();
        let Commands::Recommend { profiling, .. } = cli.command else { panic!("wrong subcommand") };
        let mut cfg = Config::default();
        profiling.apply(&mut cfg);
        assert_eq!(cfg.profiling.min_viewport, Some(320));
        assert_eq!(cfg.profiling.delay_ms, 0);
        assert!(!cfg.webdriver.headless);
        assert_eq!(cfg.profiling.viewport_height, 1000);
    }
}
