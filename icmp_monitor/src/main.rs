use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_icmp_listener::{EventReceiver, IcmpEventKind, IcmpListener, ListenerConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Watch the ICMP notifications reaching this host (requires raw socket privileges).
#[derive(Debug, Parser)]
#[command(name = "icmp_monitor", version)]
struct Args {
    /// JSON listener configuration, overridden by the flags below
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    /// Bound the event channel to this many pending events
    #[arg(long)]
    backlog: Option<usize>,
    /// Also report ICMP messages that are not hop notifications
    #[arg(long)]
    report_ignored: bool,
    /// Hex dump every received datagram to stderr
    #[arg(long)]
    hexdump: bool,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn listener_config(&self) -> anyhow::Result<ListenerConfig> {
        let mut conf = match &self.config {
            Some(path) => ListenerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ListenerConfig::default(),
        };
        if let Some(ms) = self.poll_interval_ms {
            conf.poll_interval = Duration::from_millis(ms);
        }
        if self.backlog.is_some() {
            conf.backlog = self.backlog;
        }
        if self.report_ignored {
            conf.report_ignored = true;
        }
        conf.validate()?;
        Ok(conf)
    }
}

#[derive(Default)]
struct ResponderSummary {
    responders: BTreeMap<Ipv4Addr, BTreeMap<String, u64>>,
}

impl ResponderSummary {
    fn record(&mut self, addr: Ipv4Addr, kind: IcmpEventKind) {
        *self
            .responders
            .entry(addr)
            .or_default()
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }
}

impl std::fmt::Display for ResponderSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (addr, kinds) in self.responders.iter() {
            writeln!(f, "{}", addr)?;
            for (kind, count) in kinds.iter() {
                writeln!(f, "  - {}: {}", kind, count)?;
            }
        }
        Ok(())
    }
}

async fn print_events(mut rx: EventReceiver) -> ResponderSummary {
    let mut summary = ResponderSummary::default();
    while let Some(event) = rx.recv().await {
        println!("{}", event);
        if event.is_terminal() {
            break;
        }
        if let Some(addr) = event.remote_addr {
            summary.record(addr, event.kind);
        }
    }
    summary
}

async fn wait_for_stop(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to wait for Ctrl-C: {}", e);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&args.log_level))
                .context("Invalid log level")?,
        )
        .with_writer(std::io::stderr)
        .init();

    let conf = args.listener_config()?;
    info!(?conf, "starting ICMP monitor");
    let mut listener = IcmpListener::new(conf)?;
    if args.hexdump {
        listener = listener.with_dump_sink(std::io::stderr());
    }
    let (handle, rx) = listener
        .spawn()
        .context("Failed to start the listener thread")?;

    let printer = tokio::spawn(print_events(rx));
    let stop = wait_for_stop(args.duration_secs.map(Duration::from_secs));
    tokio::pin!(stop);
    tokio::select! {
        _ = &mut stop => {}
        _ = async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        } => {}
    }

    let stats = tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    let summary = printer.await?;

    println!("========================================================");
    println!("Responders");
    println!("========================================================");
    print!("{}", summary);
    println!(
        "received: {}, emitted: {}, malformed: {}, ignored: {}, dropped: {}",
        stats.received, stats.emitted, stats.malformed, stats.ignored, stats.dropped
    );
    Ok(())
}
