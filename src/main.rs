use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism::api::{ApiServer, ApiServerConfig, AppState};
use prism::config::AppConfig;
use prism::executor::PlanExecutor;
use prism::orchestrator::Orchestrator;
use prism::plan::validate_str;
use prism::planner::{FixedPlanner, HttpPlanner, PlanningService};
use prism::progress::{Frame, JobObserver};
use prism::router::QueueRouter;
use prism::store::{open_store, spawn_retention, JobStore};
use prism::tools::{Dispatcher, LazyTool, RemoteTools, ToolRegistry, Toolbox};
use prism::worker::WorkerPool;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Plan execution engine for visual editing and question answering", long_about = None)]
struct Cli {
    /// Config file (defaults to ./prism.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for job records and uploads
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one job locally and print its frames
    Run {
        /// The request, e.g. "change the cat to a dog"
        prompt: String,

        /// Input image
        #[arg(short, long)]
        image: PathBuf,

        /// Use this plan file instead of calling the planner
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Ask the planner for a plan and print it after validation
    Plan {
        prompt: String,
    },

    /// Validate a plan file against the tool registry
    Validate {
        file: PathBuf,
    },

    /// Show which lane a prompt is routed to
    Route {
        prompt: String,
    },

    /// List registered tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "prism=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    let registry = Arc::new(ToolRegistry::with_defaults());

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let planner = Arc::new(HttpPlanner::new(&config.planner, &registry)?);
            let store = open_store(&config.store)?;
            let _retention = spawn_retention(store.clone(), config.store.retention());
            let orchestrator = build_orchestrator(&config, registry.clone(), store.clone(), planner);
            let pool = WorkerPool::start(orchestrator, &config.workers);

            let state = Arc::new(AppState {
                pool,
                observer: JobObserver::new(store, config.observer.poll_interval()),
                registry,
            });
            let server = ApiServer::new(
                ApiServerConfig {
                    host: config.server.host.clone(),
                    port: config.server.port,
                },
                state,
            );
            server.start().await?;
        }

        Commands::Run {
            prompt,
            image,
            plan,
        } => {
            let planner: Arc<dyn PlanningService> = match plan {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Arc::new(FixedPlanner::new(serde_json::from_str(&content)?))
                }
                None => Arc::new(HttpPlanner::new(&config.planner, &registry)?),
            };
            let bytes = std::fs::read(&image)
                .with_context(|| format!("Failed to read image {}", image.display()))?;

            let store = open_store(&config.store)?;
            let orchestrator = build_orchestrator(&config, registry, store.clone(), planner);
            let observer = JobObserver::new(store, config.observer.poll_interval());

            let job = orchestrator.submit(&prompt, bytes).await?;
            println!("job {} ({} lane)", job.ticket.job_id, job.ticket.lane);
            let mut frames = observer.watch(&job.ticket.job_id);

            let runner = orchestrator.clone();
            let handle = tokio::spawn(async move { runner.run(job).await });

            let mut failed = false;
            while let Some(frame) = frames.recv().await {
                match &frame {
                    Frame::Progress { message } => println!("  {}", message),
                    Frame::Success(payload) if payload.kind() == "image" => {
                        let out = image.with_extension("edited.png");
                        let data = prism::tools::Image::from_base64(payload.data())?;
                        std::fs::write(&out, data.bytes())?;
                        println!("SUCCESS: image written to {}", out.display());
                    }
                    Frame::Success(payload) => println!("SUCCESS: {}", payload.data()),
                    Frame::Failed { error, .. } => {
                        println!("FAILED: {}", error);
                        failed = true;
                    }
                }
            }
            if let Err(e) = handle.await {
                error!("Job task crashed: {}", e);
                failed = true;
            }
            if failed {
                std::process::exit(1);
            }
        }

        Commands::Plan { prompt } => {
            let planner = HttpPlanner::new(&config.planner, &registry)?;
            let raw = planner.plan(&prompt).await?;
            let plan = prism::plan::validate(&raw, &registry)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            println!("lane: {}", QueueRouter::new(&config.router.heavy_keywords).route(&prompt));
        }

        Commands::Validate { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match validate_str(&content, &registry) {
                Ok(plan) => {
                    println!("Plan is valid ({} steps)", plan.len());
                    for (i, step) in plan.steps().iter().enumerate() {
                        println!("  {}. {}", i + 1, step.tool_name);
                    }
                }
                Err(e) => bail!("{}: {}", e.kind(), e),
            }
        }

        Commands::Route { prompt } => {
            let router = QueueRouter::new(&config.router.heavy_keywords);
            println!("{}", router.route(&prompt));
        }

        Commands::Tools => {
            for spec in registry.specs() {
                println!("{} [{}]", spec.name, spec.capability.verb());
                println!("  required: {}", spec.required.join(", "));
                if !spec.optional.is_empty() {
                    println!("  optional: {}", spec.optional.join(", "));
                }
                println!("  {}", spec.description);
            }
        }
    }

    Ok(())
}

/// Wire the inference backend, executor and orchestrator together
fn build_orchestrator(
    config: &AppConfig,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn JobStore>,
    planner: Arc<dyn PlanningService>,
) -> Arc<Orchestrator> {
    let base_url = config.tools.base_url.clone();
    let timeout = Duration::from_secs(config.tools.timeout_secs);
    // connects on the first tool call, once per process
    let backend = LazyTool::new("inference", move || {
        RemoteTools::connect(base_url.clone(), timeout)
    });
    info!("Inference backend at {}", config.tools.base_url);

    let dispatcher = Dispatcher::new(registry, Toolbox::from_backend(Arc::new(backend)));
    let executor = PlanExecutor::new(dispatcher, store.clone(), config.executor.clone());

    Arc::new(Orchestrator::new(
        store,
        QueueRouter::new(&config.router.heavy_keywords),
        planner,
        executor,
        config.store.uploads_dir(),
    ))
}
