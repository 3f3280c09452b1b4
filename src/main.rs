// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/fallwatch-rs

//! Fallwatch - Real-time fall and activity classification for wearables
//!
//! Subscribes to wearable telemetry over MQTT, classifies each batch with
//! threshold rules backed by a pretrained classifier, and writes one
//! decision per batch to InfluxDB.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fallwatch::{
    core::Engine,
    streaming::{InfluxWriter, MqttIngress},
    Config, KnnDtwClassifier, VERSION,
};

/// Fallwatch - Real-time fall and activity classification
#[derive(Parser, Debug)]
#[command(name = "fallwatch")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Real-time fall and activity classification for wearable telemetry")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Load configuration and model artifacts, report, and exit
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;
    config.apply_env()?;

    // Initialize logging; RUST_LOG wins over the config file
    let filter = if args.trace {
        EnvFilter::new("trace")
    } else if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter())
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Fallwatch v{}", VERSION);
    info!("Configuration loaded from {:?}", config_path);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let classifier = match KnnDtwClassifier::load(&config.model) {
        Ok(classifier) => classifier,
        Err(e) => {
            error!("Cannot load model: {}", e);
            return Err(e.into());
        }
    };

    if args.check {
        info!("Configuration and model {} are valid", classifier.version());
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    run(&rt, config, classifier)
}

fn run(rt: &tokio::runtime::Runtime, config: Config, classifier: KnnDtwClassifier) -> Result<()> {
    let writer = Arc::new(InfluxWriter::new(&config.sink)?);
    if config.sink.verify_on_startup {
        if let Err(e) = rt.block_on(writer.ping()) {
            error!("InfluxDB at {} is not reachable: {}", config.sink.url, e);
            return Err(e.into());
        }
    }

    let engine = Engine::start(&config, Arc::new(classifier), writer, rt.handle().clone())?;

    let ingress = match rt.block_on(MqttIngress::connect(
        &config.transport,
        config.pipeline.routing,
        engine.dispatcher(),
    )) {
        Ok(ingress) => ingress,
        Err(e) => {
            error!("Cannot reach MQTT broker: {}", e);
            engine.shutdown();
            return Err(e.into());
        }
    };

    info!("Fallwatch running, press Ctrl+C to shut down");
    rt.block_on(tokio::signal::ctrl_c())?;
    info!("Shutdown signal received, cleaning up...");

    rt.block_on(ingress.disconnect());
    let summary = engine.shutdown();

    info!("Final stats: {}", summary);
    info!("Fallwatch shutdown complete");
    Ok(())
}
