use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::{
    load_engine, BatchItem, BatchRunner, DeviceMap, EngineHandle, FsArtifactStore,
    NormalizeProfile, Orchestrator, OrchestratorConfig, ProgressEvent, SlotPolicy, ValidationError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch image generation from the terminal")]
struct Args {
    /// Prompts to render in one batch; without any, prompts are read interactively
    prompts: Vec<String>,

    /// Output aspect ratio: 16:9, 4:3 or 1:1
    #[arg(long, env = "EASEL_ASPECT_RATIO", default_value = "16:9")]
    aspect_ratio: String,

    /// Sequence number of the first image
    #[arg(long, env = "EASEL_START", default_value_t = 1)]
    start: u32,

    /// Directory artifacts are written to
    #[arg(long, env = "EASEL_OUTPUT_DIR", default_value = "generated_images")]
    output_dir: PathBuf,

    /// Also copy each image here under its numbered, human-readable name
    #[arg(long, env = "EASEL_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// Engine to load
    #[arg(long, env = "EASEL_MODEL", default_value = "sketch")]
    model: String,

    /// Use CPU instead of GPU
    #[arg(long, env = "EASEL_CPU")]
    cpu: bool,

    /// Upper bound on a single engine call
    #[arg(long, env = "EASEL_RUN_TIMEOUT_SECS", default_value_t = 600)]
    run_timeout_secs: u64,
}

/// One line typed at the interactive prompt.
#[derive(Debug, PartialEq)]
enum Input {
    Quit,
    /// Empty line: run everything entered so far.
    Submit,
    Prompt(String),
}

impl Input {
    fn classify(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "quit" | "exit" => Input::Quit,
            "" => Input::Submit,
            _ => Input::Prompt(line.to_string()),
        }
    }
}

struct Session {
    runner: BatchRunner,
    store: Arc<FsArtifactStore>,
    aspect_ratio: String,
    export_dir: Option<PathBuf>,
    /// `None` once a batch has used `u32::MAX`.
    next_sequence: Option<u32>,
}

impl Session {
    /// Runs one batch; numbering continues where the previous batch stopped.
    async fn run(&mut self, prompts: &[String]) -> Result<(), ValidationError> {
        let start = self.next_sequence.ok_or(ValidationError::SequenceOverflow)?;
        let items = self
            .runner
            .run_batch_observed(prompts, &self.aspect_ratio, start, show_progress)
            .await?;
        self.next_sequence = u32::try_from(items.len())
            .ok()
            .and_then(|count| start.checked_add(count));

        println!();
        let done = self.report_all(&items).await;
        println!("{done}/{} images generated", items.len());
        Ok(())
    }

    /// Prints every item and returns how many succeeded.
    async fn report_all(&self, items: &[BatchItem]) -> usize {
        let mut done = 0;
        for item in items {
            if self.report(item).await {
                done += 1;
            }
        }
        done
    }

    async fn report(&self, item: &BatchItem) -> bool {
        let id = match &item.outcome {
            Ok(id) => id,
            Err(err) => {
                println!("[{:04}] failed: {err}", item.sequence);
                return false;
            }
        };
        let stored = self.store.path_of(id);
        println!("[{:04}] {} -> {}", item.sequence, item.display_name, stored.display());

        if let Some(dir) = &self.export_dir {
            let target = dir.join(&item.display_name);
            // The artifact itself is stored; a failed copy only affects this item.
            if let Err(err) = tokio::fs::copy(&stored, &target).await {
                tracing::warn!(
                    sequence = item.sequence,
                    target = %target.display(),
                    error = %err,
                    "Export failed"
                );
                println!("[{:04}] export to {} failed: {err}", item.sequence, target.display());
            }
        }
        true
    }
}

fn show_progress(sequence: u32, event: &ProgressEvent) {
    if let ProgressEvent::Progress { fraction } = event {
        print!("\r[{sequence:04}] {:>3.0}%", fraction * 100.0);
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel=info,easel_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let engine = load_engine(&args.model, DeviceMap::from_cpu_flag(args.cpu))
        .with_context(|| format!("failed to load engine `{}`", args.model))?;
    let store = Arc::new(
        FsArtifactStore::open(&args.output_dir)
            .with_context(|| format!("failed to open {}", args.output_dir.display()))?,
    );
    if let Some(dir) = &args.export_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    // A batch never contends with itself, so queueing is all it needs.
    let config = OrchestratorConfig {
        policy: SlotPolicy::Queue,
        run_timeout: Duration::from_secs(args.run_timeout_secs),
        profile: NormalizeProfile::batch(),
    };
    let orchestrator = Orchestrator::new(EngineHandle::new(engine), store.clone(), config);

    let mut session = Session {
        runner: BatchRunner::new(Arc::new(orchestrator)),
        store,
        aspect_ratio: args.aspect_ratio,
        export_dir: args.export_dir,
        next_sequence: Some(args.start),
    };

    if !args.prompts.is_empty() {
        session.run(&args.prompts).await?;
        return Ok(());
    }

    println!("Enter one prompt per line. An empty line starts the batch; `quit` exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = Vec::new();
    while let Some(line) = lines.next_line().await? {
        match Input::classify(&line) {
            Input::Quit => return Ok(()),
            Input::Prompt(prompt) => pending.push(prompt),
            Input::Submit if pending.is_empty() => println!("No prompts entered."),
            Input::Submit => {
                if let Err(err) = session.run(&pending).await {
                    println!("Batch rejected: {err}");
                }
                pending.clear();
            }
        }
    }
    if !pending.is_empty() {
        session.run(&pending).await?;
    }
    Ok(())
}
