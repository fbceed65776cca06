use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use visreg::capture::{ChromeLauncher, Orchestrator};
use visreg::compare::Comparator;
use visreg::config::{self, Credentials, RunConfig};
use visreg::matrix::RESOLUTIONS;
use visreg::select::{
    AllJobs, FixedSelection, JobSelector, PromptSelector, SelectError, pages_without_baselines,
};
use visreg::server;
use visreg::store::ArtifactStore;

/// visreg - capture web pages at fixed resolutions and diff them against baselines
#[derive(Parser, Debug)]
#[command(
    name = "visreg",
    about = "Visual regression testing: headless Chrome captures, pixel diffs and a result viewer",
    after_help = "ENVIRONMENT VARIABLES:\n\
        VISREG_ROOT              Directory holding records/, new_records/, compare_records/, config/\n\
        VISREG_PORT              Result viewer port\n\
        VISREG_CHROME_PATH       Chrome/Chromium executable\n\
        VISREG_THRESHOLD         Per-pixel color distance threshold (0-1)\n\
        VISREG_SETTLE_DELAY_MS   Delay after the document is ready\n\
        VISREG_HIDE_DELAY_MS     Delay after hiding UI chrome\n\
        AUTH_USERNAME/PASSWORD   Basic-auth credentials, override config.json\n\
        RUST_LOG                 Log filter (default: info)"
)]
struct Args {
    /// Artifact root directory
    #[arg(long, global = true, env = "VISREG_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture candidates, diff them against baselines and serve the results (default)
    Compare {
        #[command(flatten)]
        select: SelectArgs,

        /// Exit after writing results instead of starting the viewer
        #[arg(long)]
        no_serve: bool,

        #[command(flatten)]
        viewer: ViewerArgs,
    },

    /// Capture baseline screenshots
    Record {
        #[command(flatten)]
        select: SelectArgs,
    },

    /// Serve the results of the last comparison
    Serve {
        #[command(flatten)]
        viewer: ViewerArgs,
    },

    /// Compare two PNG files directly
    Diff {
        /// Baseline image
        baseline: PathBuf,

        /// Candidate image
        candidate: PathBuf,

        /// Where to write the diff image
        #[arg(short, long, default_value = "diff.png")]
        output: PathBuf,

        /// Color distance threshold (0-1)
        #[arg(short, long, env = "VISREG_THRESHOLD", default_value_t = config::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Count anti-aliased pixels as differences
        #[arg(long)]
        include_aa: bool,
    },
}

/// Which jobs to run; prompts on the terminal when nothing is given
#[derive(ClapArgs, Debug, Default)]
struct SelectArgs {
    /// Every configured page at every resolution, no prompts
    #[arg(long, conflicts_with_all = ["urls", "resolutions"])]
    all: bool,

    /// Pages by 1-based number or range, e.g. "1,3" or "2-5"
    #[arg(long)]
    urls: Option<String>,

    /// Resolutions by 1-based number or range, e.g. "1-2"
    #[arg(long)]
    resolutions: Option<String>,
}

#[derive(ClapArgs, Debug, Default)]
struct ViewerArgs {
    /// Viewer port
    #[arg(long, env = "VISREG_PORT")]
    port: Option<u16>,

    /// Address to bind the viewer to
    #[arg(long, default_value = "127.0.0.1")]
    host: Option<IpAddr>,
}

impl SelectArgs {
    fn selector(&self) -> Box<dyn JobSelector> {
        if self.all {
            Box::new(AllJobs)
        } else if self.urls.is_some() || self.resolutions.is_some() {
            Box::new(FixedSelection::new(self.urls.clone(), self.resolutions.clone()))
        } else {
            Box::new(PromptSelector::stdio())
        }
    }
}

impl ViewerArgs {
    fn addr(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::from([127, 0, 0, 1]));
        SocketAddr::new(host, self.port.unwrap_or(config::get().server.port))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = ArtifactStore::new(args.root.unwrap_or_else(|| config::get().root.clone()));

    let command = args.command.unwrap_or(Commands::Compare {
        select: SelectArgs::default(),
        no_serve: false,
        viewer: ViewerArgs::default(),
    });

    match command {
        Commands::Compare {
            select,
            no_serve,
            viewer,
        } => {
            let run_config = load_run_config(&store)?;
            let Some(selection) = finish_selection(
                select
                    .selector()
                    .select_compare(&run_config.urls, &RESOLUTIONS),
            )?
            else {
                return Ok(());
            };

            let manifest = orchestrator(&run_config)
                .run_compare(&selection.jobs(), &store)
                .context("comparison run failed")?;

            println!(
                "Compared {} screenshot(s), {} with differences, {} skipped",
                manifest.results.len(),
                manifest.changed().count(),
                manifest.skipped.len()
            );
            for result in manifest.changed() {
                println!("  {} @ {}: {} pixel(s)", result.url, result.resolution, result.differences);
            }
            for skipped in &manifest.skipped {
                println!("  skipped {}", skipped);
            }
            println!("Results saved to {}", store.manifest_path().display());

            if !no_serve {
                serve(store, viewer.addr())?;
            }
        }

        Commands::Record { select } => {
            let run_config = load_run_config(&store)?;
            let existing = store.baseline_stems()?;
            let missing = pages_without_baselines(&run_config.urls, &existing);
            let Some(selection) = finish_selection(select.selector().select_record(
                &run_config.urls,
                &RESOLUTIONS,
                &missing,
            ))?
            else {
                return Ok(());
            };

            let summary = orchestrator(&run_config)
                .run_record(&selection.jobs(), &store)
                .context("recording run failed")?;

            println!("Recorded {} baseline(s)", summary.recorded.len());
            for name in &summary.recorded {
                println!("  {}", store.baseline_path(name).display());
            }
            for skipped in &summary.skipped {
                println!("  skipped {}", skipped);
            }
        }

        Commands::Serve { viewer } => {
            store.ensure_dirs()?;
            serve(store, viewer.addr())?;
        }

        Commands::Diff {
            baseline,
            candidate,
            output,
            threshold,
            include_aa,
        } => {
            if !(0.0..=1.0).contains(&threshold) {
                bail!("threshold must be between 0 and 1, got {}", threshold);
            }
            let differences = Comparator::new(threshold)
                .include_aa(include_aa)
                .compare_files(&baseline, &candidate, &output)?;
            println!("{} differing pixel(s), diff written to {}", differences, output.display());
        }
    }

    Ok(())
}

fn load_run_config(store: &ArtifactStore) -> anyhow::Result<RunConfig> {
    store.ensure_dirs()?;
    let path = store.config_path();
    let run_config = RunConfig::load(&path)
        .with_context(|| format!("cannot start run from {}", path.display()))?
        .with_credentials_override(Credentials::from_env());
    info!(urls = run_config.urls.len(), "loaded run config");
    Ok(run_config)
}

/// Selection outcome; `None` when the user backed out
fn finish_selection<T>(result: Result<T, SelectError>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(selection) => Ok(Some(selection)),
        Err(err @ (SelectError::Cancelled | SelectError::InvalidChoice(_) | SelectError::Empty(_))) => {
            warn!("{}, nothing to do", err);
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn orchestrator(run_config: &RunConfig) -> Orchestrator {
    let settings = &config::get().capture;
    Orchestrator::new(ChromeLauncher::new())
        .timings(run_config.timings(settings))
        .policy(run_config.policy.clone())
        .credentials(run_config.credentials.clone())
        .comparator(Comparator::new(settings.threshold))
}

fn serve(store: ArtifactStore, addr: SocketAddr) -> anyhow::Result<()> {
    println!("Result viewer at http://{}", addr);
    let runtime = tokio::runtime::Runtime::new().context("cannot start async runtime")?;
    runtime
        .block_on(server::serve(store, addr))
        .with_context(|| format!("viewer on {} failed", addr))
}
