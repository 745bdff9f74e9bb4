mod drag;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_core::{EngineConfig, Priority};
use strata_fx::{ShaderBody, ShaderRegistry};
use strata_ir::Document;
use strata_render::{Frame, SurfaceHandle};
use strata_sched::{RenderEvent, RenderRequest, TaskOutcome, WorkerManager};

const DEFAULT_CONFIG: &str = "strata.toml";

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Strata: layered image compositing",
    long_about = "Strata renders layered documents (raster, adjustment and solid layers, masks\nand effects) into a single frame on isolated render workers."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a JSON document to a PNG file
    Render {
        /// Path to the document (.json)
        #[arg()]
        file: PathBuf,

        /// Output PNG path (default: <name>.png next to the document)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Engine configuration (default: ./strata.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Task priority: low, medium, high, critical
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Render at interactive quality
        #[arg(long)]
        interactive: bool,
    },

    /// Simulate dragging a parameter slider and report what the coalescer did
    Drag {
        /// Path to the document (.json)
        #[arg()]
        file: PathBuf,

        /// Layer whose parameter is dragged
        #[arg(long)]
        layer: String,

        /// Parameter name, e.g. brightness
        #[arg(long)]
        param: String,

        #[arg(long)]
        from: f32,

        #[arg(long)]
        to: f32,

        /// Number of slider positions
        #[arg(long, default_value_t = 30)]
        steps: u32,

        /// Milliseconds between slider positions
        #[arg(long, default_value_t = 4)]
        interval_ms: u64,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List the registered shaders
    Shaders,

    /// Display version and engine info
    Info {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render {
            file,
            output,
            config,
            priority,
            interactive,
        } => {
            let config = load_config(config.as_deref())?;
            run_async(cmd_render(file, output, config, priority, interactive))
        }
        Commands::Drag {
            file,
            layer,
            param,
            from,
            to,
            steps,
            interval_ms,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let plan = drag::DragPlan {
                layer,
                param,
                from,
                to,
                steps: steps.max(1),
                interval: Duration::from_millis(interval_ms),
            };
            run_async(cmd_drag(file, plan, config))
        }
        Commands::Shaders => cmd_shaders(),
        Commands::Info { config } => cmd_info(&load_config(config.as_deref())?),
    }
}

fn run_async<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize async runtime")?;
    runtime.block_on(future)
}

/// An explicit path must load; the default location is best-effort.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                EngineConfig::load_from_file(default)
                    .with_context(|| format!("failed to load config: {}", default.display()))
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

fn load_document(file: &Path) -> Result<Document> {
    Document::load_from_file(file)
        .with_context(|| format!("failed to read document: {}", file.display()))
}

async fn cmd_render(
    file: PathBuf,
    output: Option<PathBuf>,
    config: EngineConfig,
    priority: Priority,
    interactive: bool,
) -> Result<()> {
    let start = Instant::now();
    let doc = load_document(&file)?;
    let output = output.unwrap_or_else(|| file.with_extension("png"));

    println!("🖼  Strata Render");
    println!("   Document:  {}", file.display());
    println!("   Canvas:    {}x{}", doc.width, doc.height);
    println!("   Layers:    {}", doc.layers.len());
    println!("   Priority:  {}", priority);

    let manager = WorkerManager::new(config);
    manager.initialize(SurfaceHandle::new(doc.width, doc.height))?;
    let mut events = manager.subscribe();

    let mut request = RenderRequest::new(doc).with_priority(priority).with_version(1);
    if interactive {
        request = request.interactive();
    }
    let id = manager.queue_render_task(request)?;

    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RenderEvent::Progress { task, value } if task == id => {
                    tracing::debug!(value, "render progress");
                }
                RenderEvent::Success { task, .. } | RenderEvent::Error { task, .. } if task == id => {
                    break;
                }
                _ => {}
            }
        }
    });

    let outcome = manager.wait(&id).await;
    manager.cleanup();
    progress.abort();

    match outcome {
        Some(TaskOutcome::Completed(frame)) => {
            save_png(&frame, &output)?;
            println!("   Hash:      {}", frame.hash);
            println!("   Output:    {}", output.display());
            println!("   Time:      {:.1?}", start.elapsed());
            Ok(())
        }
        Some(TaskOutcome::Failed(e)) => anyhow::bail!("render failed: {}", e),
        Some(TaskOutcome::Cancelled) => anyhow::bail!("render was cancelled"),
        None => anyhow::bail!("render task {} disappeared", id),
    }
}

fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.buffer.data.clone())
        .context("frame buffer does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("failed to write image: {}", path.display()))?;
    Ok(())
}

async fn cmd_drag(file: PathBuf, plan: drag::DragPlan, config: EngineConfig) -> Result<()> {
    let start = Instant::now();
    let doc = load_document(&file)?;

    println!("🎚  Strata Drag Simulation");
    println!("   Document:  {}", file.display());
    println!(
        "   Slider:    {}.{} {} → {} in {} steps",
        plan.layer, plan.param, plan.from, plan.to, plan.steps
    );

    let report = drag::run(doc, plan, config).await?;

    println!();
    println!("   Requests:  {}", report.requests);
    println!("   Tasks:     {}", report.tasks);
    println!("   Completed: {}", report.completed);
    println!("   Cancelled: {}", report.cancelled);
    if report.failed > 0 {
        println!("   Failed:    {}", report.failed);
    }
    println!("   Presented: {}", report.presented);
    println!("   Version:   {}", report.final_version);
    println!("   Time:      {:.1?}", start.elapsed());
    Ok(())
}

fn cmd_shaders() -> Result<()> {
    let registry = ShaderRegistry::global();
    let mut descriptors = registry.descriptors();
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));

    println!("🎨 Registered shaders ({})", descriptors.len());
    for desc in descriptors {
        let passes = match &desc.body {
            ShaderBody::Single { .. } => "single pass".to_string(),
            ShaderBody::MultiPass(passes) => passes
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(" → "),
        };
        println!(
            "   {:<20} v{:<3} {:<6} {}",
            desc.name,
            desc.version,
            format!("{:?}", desc.compile).to_lowercase(),
            passes
        );
    }
    Ok(())
}

fn cmd_info(config: &EngineConfig) -> Result<()> {
    println!("🧩 Strata Compositing Engine");
    println!("   Version:   {}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Renderer:  {} (wgpu passes, rayon kernels as fallback)",
        format!("{:?}", config.render.backend).to_lowercase()
    );
    println!("   Shaders:   {}", ShaderRegistry::global().len());
    println!("   Workers:   {}", config.scheduler.workers);
    println!(
        "   Timeout:   {} ms, {} retries ({:?} backoff from {} ms)",
        config.scheduler.task_timeout_ms,
        config.scheduler.max_retries,
        config.scheduler.backoff,
        config.scheduler.backoff_base_ms
    );
    println!("   Coalesce:  {} ms window", config.coalesce.window_ms);
    println!("   Profile:   {:?}", config.render.profile);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from([
            "strata", "render", "doc.json", "-o", "out.png", "--priority", "high",
        ])
        .unwrap();
        match cli.command {
            Commands::Render {
                file,
                output,
                priority,
                interactive,
                ..
            } => {
                assert_eq!(file, PathBuf::from("doc.json"));
                assert_eq!(output, Some(PathBuf::from("out.png")));
                assert_eq!(priority, Priority::High);
                assert!(!interactive);
            }
            _ => panic!("expected render"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_priority() {
        assert!(Cli::try_parse_from(["strata", "render", "doc.json", "--priority", "urgent"]).is_err());
    }

    #[test]
    fn test_cli_parses_drag_defaults() {
        let cli = Cli::try_parse_from([
            "strata", "drag", "doc.json", "--layer", "fx", "--param", "brightness", "--from",
            "100", "--to", "200",
        ])
        .unwrap();
        match cli.command {
            Commands::Drag {
                steps, interval_ms, ..
            } => {
                assert_eq!(steps, 30);
                assert_eq!(interval_ms, 4);
            }
            _ => panic!("expected drag"),
        }
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/strata.toml"))).is_err());
    }

    #[test]
    fn test_save_png_round_trips_dimensions() {
        let buffer = strata_core::FrameBuffer::new(3, 2);
        let frame = Frame {
            width: 3,
            height: 2,
            version: 1,
            hash: buffer.content_hash(),
            buffer,
        };
        let path = std::env::temp_dir().join(format!("strata-cli-{}.png", std::process::id()));
        save_png(&frame, &path).unwrap();
        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        let _ = std::fs::remove_file(&path);
    }
}
