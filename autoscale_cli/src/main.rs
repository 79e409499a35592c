use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{ArgAction, Parser, Subcommand};
use eyre::WrapErr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod device_sim;
mod humanize;

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Build a file sink writer with optional rotation, parking the non-blocking
/// guard in a OnceLock for the process lifetime.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Some(writer)
}

/// Initialize tracing once for the whole app. RUST_LOG wins over --log-level.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let console = fmt::layer().json().with_target(false);
        if let Some(writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    } else {
        let console = fmt::layer().pretty().with_target(false);
        if let Some(writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "autoscale", version, about = "AutoScale CLI")]
struct Cli {
    /// Device config TOML (capture, calibration, transport, logging)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Log level: trace,debug,info,warn,error
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingest/worker HTTP server with the in-memory store
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,
    },
    /// Ask a running server to drain a batch of pending jobs
    Process {
        /// Server base URL, e.g. http://127.0.0.1:8787
        #[arg(long)]
        url: String,
        #[arg(long, default_value_t = 10)]
        batch: usize,
        #[arg(long, env = "FUNCTION_SECRET_PROCESSOR", hide_env_values = true)]
        secret: String,
    },
    /// Simulate a device press-and-release and print (or upload) the event
    Device,
    /// Run the plateau detector over a JSON file of samples
    Detect {
        /// Wire payload ({"scale_id", "samples": ...}) or a bare sample array
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
    /// Quick health check of the processing pipeline
    SelfCheck,
}

fn main() -> eyre::Result<()> {
    if let Err(e) = real_main() {
        eprintln!("{}", humanize::humanize(&e));
        std::process::exit(2);
    }
    Ok(())
}

fn real_main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let cfg: autoscale_device::DeviceConfig = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("read config {path:?}"))?;
            let cfg = autoscale_device::config::load_toml(&text)
                .wrap_err_with(|| format!("parse config {path:?}"))?;
            cfg.validate().wrap_err("invalid configuration")?;
            cfg
        }
        None => autoscale_device::DeviceConfig::default(),
    };

    init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    match cli.cmd {
        Commands::Serve { bind } => serve(&bind),
        Commands::Process { url, batch, secret } => process(&url, batch, &secret),
        Commands::Device => device_sim::run(cfg),
        Commands::Detect { input } => detect(&input),
        Commands::SelfCheck => self_check(),
    }
}

fn serve(bind: &str) -> eyre::Result<()> {
    use autoscale_server::{router, AppState, MemoryStore, ServerConfig};
    use std::sync::Arc;

    let config = ServerConfig::from_env();
    if config.ingest_secret.is_none() {
        tracing::warn!("FUNCTION_SECRET not set; /ingest will answer 500");
    }
    if config.processor_secret.is_none() {
        tracing::warn!("FUNCTION_SECRET_PROCESSOR not set; /process and /devices will answer 500");
    }
    if config.db_url.is_some() {
        tracing::warn!("external store configured but not linked in this build; using in-memory store");
    }

    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::new()),
        config,
    });
    let app = router(state);

    let runtime = tokio::runtime::Runtime::new().wrap_err("start tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .wrap_err_with(|| format!("bind {bind}"))?;
        tracing::info!(%bind, "serving");
        println!("listening on {bind}");
        axum::serve(listener, app).await.wrap_err("serve")
    })
}

fn process(url: &str, batch: usize, secret: &str) -> eyre::Result<()> {
    let endpoint = format!("{}/process?batch={batch}", url.trim_end_matches('/'));
    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(&endpoint)
        .header("x-function-secret", secret)
        .send()
        .wrap_err_with(|| format!("POST {endpoint}"))?;
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    if !status.is_success() {
        eyre::bail!("server answered {status}: {body}");
    }
    println!("{body}");
    Ok(())
}

fn detect(input: &PathBuf) -> eyre::Result<()> {
    let text = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("read samples {input:?}"))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).wrap_err_with(|| format!("parse samples {input:?}"))?;
    // accept both the wire payload and a bare sample array
    let samples_value = value.get("samples").cloned().unwrap_or(value);
    let samples: Vec<autoscale_core::Sample> = serde_json::from_value(samples_value)
        .wrap_err("samples must be an array of {t, kg} objects")?;

    let detection = autoscale_core::detect(&samples).wrap_err("detector")?;
    println!("{}", serde_json::to_string_pretty(&detection)?);
    Ok(())
}

fn self_check() -> eyre::Result<()> {
    use autoscale_traits::LoadCell;

    // probe the (simulated) sensor path
    let mut cell = autoscale_hardware::SimLoadCell::level(1_000);
    let raw = cell
        .read(std::time::Duration::from_millis(100))
        .map_err(|e| eyre::eyre!("sensor probe failed: {e}"))?;
    tracing::info!(raw, "sensor read ok");

    // ramp to 6 kg, hold 6 s: the detector must lock onto the plateau
    let mut samples = Vec::new();
    for i in 0..=80u64 {
        let t_s = i as f64 * 0.1;
        let kg = if t_s < 2.0 { 3.0 * t_s } else { 6.0 };
        samples.push(autoscale_core::Sample::new(i * 100, kg));
    }
    let detection = autoscale_core::detect(&samples).wrap_err("self-check detector")?;
    if detection.mode != autoscale_core::MODE_PLATEAU {
        eyre::bail!("self-check expected a plateau, got mode {}", detection.mode);
    }
    if (detection.weight_kg - 6.0).abs() > 0.05 {
        eyre::bail!("self-check weight off: {}", detection.weight_kg);
    }
    tracing::info!(weight_kg = detection.weight_kg, "self-check ok");
    println!("OK");
    Ok(())
}
