//! chanflow-demo: runs a sample pipeline and prints its counters.

use anyhow::Context;
use chanflow::cancellation::CancellationToken;
use chanflow::context::{Dependencies, ResourceScope};
use chanflow::events::LoggingEventSink;
use chanflow::observability::{init_logging, LogFormat, Observability};
use chanflow::pipeline::Pipeline;
use chanflow::processor::{
    forward, generate_range, BackgroundProcessor, DeliveryWorker, Payload, ProcessorChannel,
    ProcessorSettings,
};
use chanflow::stages::{FnTransform, StageDescriptor};
use chanflow::testing::delayed_by;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Square a range of integers through one stage.
    Squares,
    /// Run payloads through the two-step processor.
    Processor,
    /// Show an order-preserving stage under uneven delays.
    Ordered,
}

/// Staged pipeline demo.
#[derive(Parser, Debug)]
#[command(name = "chanflow-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which pipeline to run.
    #[arg(value_enum, default_value = "squares")]
    mode: Mode,

    /// Number of items to submit.
    #[arg(short = 'n', long, default_value_t = 20)]
    count: i64,

    /// Processor settings file (JSON).
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let format = if args.json { LogFormat::Json } else { LogFormat::Pretty };
    init_logging(format, &args.log_level);

    match args.mode {
        Mode::Squares => squares(args.count).await,
        Mode::Processor => processor(args.count, args.settings).await,
        Mode::Ordered => ordered(args.count).await,
    }
}

async fn squares(count: i64) -> anyhow::Result<()> {
    let pipeline = Pipeline::builder("squares")
        .entry_capacity(4)
        .stage(StageDescriptor::new(
            "square",
            4,
            4,
            FnTransform::new(|x: i64, _: &ResourceScope| Ok(x * x)),
        )?)
        .build()?;
    let results = pipeline.results()?;

    let source = generate_range(1..=count, 4, pipeline.cancel_token().clone());
    let submitter = pipeline.submitter();
    let producer = tokio::spawn(async move { forward(&source, &submitter).await });

    let mut squares = results.collect().await?;
    producer.await.context("producer task failed")??;
    squares.sort_unstable();
    info!(?squares, "Squares done");
    println!("{}", serde_json::to_string_pretty(&pipeline.snapshot())?);
    Ok(())
}

async fn processor(count: i64, settings: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = match settings {
        Some(path) => ProcessorSettings::from_path(&path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ProcessorSettings::default(),
    };
    let sink = Arc::new(LoggingEventSink::debug());
    let observability = Observability::default().with_sink(sink.clone());
    let processor = ProcessorChannel::with_parts(&settings, Dependencies::default(), &observability)?;

    let worker = DeliveryWorker::new(sink, CancellationToken::shared()).spawn(processor.results()?);
    for i in 0..count {
        processor.queue_work_item(Payload::new(format!("task-{i}"))).await?;
    }
    processor.complete();

    let delivered = worker.await.context("delivery worker failed")?;
    processor.wait().await;
    info!(delivered, "Processor done");
    println!("{}", serde_json::to_string_pretty(&processor.snapshot())?);
    Ok(())
}

async fn ordered(count: i64) -> anyhow::Result<()> {
    let count = count.max(1);
    let pipeline = Pipeline::builder("ordered")
        .order_preservation(true)
        .stage(StageDescriptor::new(
            "uneven",
            8,
            4,
            delayed_by(
                move |x: &i64| Duration::from_millis(u64::try_from(count - x).unwrap_or_default() * 5),
                |x: i64| x,
            ),
        )?)
        .build()?;
    let results = pipeline.results()?;

    let submitter = pipeline.submitter();
    let producer = tokio::spawn(async move {
        let accepted = submitter.submit_all(0..count).await;
        submitter.complete();
        accepted
    });

    let out = results.collect().await?;
    producer.await.context("producer task failed")??;
    info!(in_order = out.windows(2).all(|w| w[0] < w[1]), items = out.len(), "Ordered done");
    println!("{out:?}");
    Ok(())
}
