//! tomoflow - Main Entry Point
//!
//! Runs the demo graph `frame-source → region-of-interest → monitor → sink`
//! with settings from the engine config, overridden by command-line flags.
//! The sink is a named pipe when one is given, an in-memory collector otherwise.

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::thread::JoinHandle;
use tomoflow::config::{EngineConfig, RunSettings};
use tomoflow::pipeline::nodes::CollectSink;
use tomoflow::pipeline::{Buffer, ExecutorEvent, Graph, NodeId, Properties};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "\
Usage: tomoflow [OPTIONS]

Options:
  --config <PATH>      Engine config (TOML); defaults to the user config dir
  --frames <N>         Number of frames to generate
  --size <WxH>         Frame size, e.g. 512x512
  --roi <X,Y,W,H>      Region of interest
  --pipe <PATH>        Named pipe receiving the cropped frames
  --report <PATH>      Write the JSON run report to a file instead of stdout
  --print              Log the graph before running it
  -h, --help           Show this help
";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    frames: Option<u32>,
    size: Option<(u32, u32)>,
    roi: Option<[u32; 4]>,
    pipe: Option<PathBuf>,
    report: Option<PathBuf>,
    print: bool,
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> anyhow::Result<Option<Args>> {
    let mut args = Args::default();
    while let Some(flag) = argv.next() {
        let mut value = || {
            argv.next()
                .ok_or_else(|| anyhow!("missing value for {}", flag))
        };
        match flag.as_str() {
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--frames" => args.frames = Some(value()?.parse().context("--frames")?),
            "--size" => {
                let v = value()?;
                let (w, h) = v
                    .split_once('x')
                    .ok_or_else(|| anyhow!("--size expects WxH, got '{}'", v))?;
                args.size = Some((w.parse().context("--size")?, h.parse().context("--size")?));
            }
            "--roi" => {
                let v = value()?;
                let parts = v
                    .split(',')
                    .map(|p| p.trim().parse::<u32>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("--roi")?;
                let roi: [u32; 4] = parts
                    .try_into()
                    .map_err(|_| anyhow!("--roi expects X,Y,W,H, got '{}'", v))?;
                args.roi = Some(roi);
            }
            "--pipe" => args.pipe = Some(PathBuf::from(value()?)),
            "--report" => args.report = Some(PathBuf::from(value()?)),
            "--print" => args.print = true,
            "-h" | "--help" => return Ok(None),
            other => bail!("unknown argument '{}'\n\n{}", other, USAGE),
        }
    }
    Ok(Some(args))
}

fn apply_overrides(run: &mut RunSettings, args: &Args) {
    if let Some(frames) = args.frames {
        run.frames = frames;
    }
    if let Some((w, h)) = args.size {
        run.width = w;
        run.height = h;
    }
    if let Some([x, y, w, h]) = args.roi {
        run.roi.x = x;
        run.roi.y = y;
        run.roi.width = w;
        run.roi.height = h;
    }
    if args.pipe.is_some() {
        run.pipe = args.pipe.clone();
    }
    if args.report.is_some() {
        run.report = args.report.clone();
    }
}

/// Drop frames as they arrive, keeping only the count.
fn count_frames(frames: Receiver<Buffer>) -> JoinHandle<usize> {
    std::thread::spawn(move || frames.iter().count())
}

fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        print!("{}", USAGE);
        return Ok(());
    };

    let mut config = EngineConfig::load_or_default(args.config.as_deref())?;
    apply_overrides(&mut config.run, &args);

    // Initialize logging
    let file_layer = config.logging.log_dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "tomoflow.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false),
            guard,
        )
    });
    let (file_layer, _log_guard) = match file_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    tracing::info!("Starting tomoflow {}", env!("CARGO_PKG_VERSION"));

    let run = config.run.clone();
    let mut graph = Graph::new(config);
    let events = graph.subscribe();

    let source = graph.add_filter(
        "frame-source",
        &Properties::new()
            .with("count", run.frames)
            .with("width", run.width)
            .with("height", run.height),
    )?;
    let roi = graph.add_filter(
        "region-of-interest",
        &Properties::new()
            .with("x", run.roi.x)
            .with("y", run.roi.y)
            .with("width", run.roi.width)
            .with("height", run.roi.height),
    )?;
    let monitor = graph.add_filter("monitor", &Properties::new().with("every", 10u32))?;

    let (sink, collector): (NodeId, _) = match &run.pipe {
        Some(pipe) => {
            let props = Properties::new().with("pipe-name", pipe.to_string_lossy().into_owned());
            (graph.add_filter("pipe-output", &props)?, None)
        }
        None => {
            let (sink, frames) = CollectSink::new();
            (graph.add_leaf(sink), Some(count_frames(frames)))
        }
    };

    graph.link(source, roi)?;
    graph.link(roi, monitor)?;
    graph.link(monitor, sink)?;

    if args.print {
        graph.print();
    }

    let running = graph.start().context("Failed to start graph")?;
    let watcher = std::thread::spawn(move || {
        for event in events {
            if let ExecutorEvent::NodeError { label, message, .. } = event {
                eprintln!("[{}] {}", label, message);
            }
        }
    });
    let report = running.wait();
    let _ = watcher.join();

    if let Some(counter) = collector {
        match counter.join() {
            Ok(count) => tracing::info!("Collected {} frames", count),
            Err(_) => tracing::warn!("Frame counter thread panicked"),
        }
    }

    tomoflow::report::publish(&report, run.report.as_deref())?;
    report.into_result()?;
    Ok(())
}
