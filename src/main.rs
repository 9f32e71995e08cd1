#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use sweepscan::engine::ScanEngine;
use sweepscan::input::{Config, Opts};
use sweepscan::report::TerminalReporter;
use sweepscan::scanner::ScanConfig;
use sweepscan::{detail, output, warning};

use log::{debug, info};
use std::time::Instant;

/// Descriptors kept free for stdio, the resolver and the runtime itself.
#[cfg(unix)]
const RESERVED_DESCRIPTORS: u64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let scan_config = fit_to_file_limit(&opts, opts.scan_config());

    let mut engine = ScanEngine::new(scan_config);
    if let Some(resolver) = &opts.resolver {
        engine = engine.with_resolver(resolver.clone());
    }

    let source = opts.port_source();
    let reporter = TerminalReporter::new(opts.greppable, opts.accessible);

    detail!(
        format!(
            "Scanning {} with {} sockets and a {:?} timeout",
            opts.host,
            scan_config.max_sockets(),
            scan_config.timeout()
        ),
        opts.greppable,
        opts.accessible
    );

    let start = Instant::now();
    let report = match engine.scan(&opts.host, &source, &reporter).await {
        Ok(report) => report,
        Err(e) => {
            // Fatal, so shown even in greppable mode; it goes to stderr.
            warning!(e.to_string(), false, opts.accessible);
            std::process::exit(1);
        }
    };

    info!(
        "{} probes in {} windows: {} closed, {} timed out, {} errored",
        report.probed(),
        report.windows,
        report.closed,
        report.timed_out,
        report.errored
    );
    output!(
        format!(
            "Found {} open ports in {:.2?}",
            report.open.len(),
            start.elapsed()
        ),
        opts.greppable,
        opts.accessible
    );

    Ok(())
}

#[cfg(unix)]
fn fit_to_file_limit(opts: &Opts, scan_config: ScanConfig) -> ScanConfig {
    let ulimit = adjust_ulimit_size(opts);
    let max_sockets = infer_max_sockets(opts, scan_config.max_sockets(), ulimit);
    ScanConfig::new(max_sockets, scan_config.timeout())
}

#[cfg(not(unix))]
const fn fit_to_file_limit(_opts: &Opts, scan_config: ScanConfig) -> ScanConfig {
    scan_config
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    Resource::NOFILE.get().map_or(u64::MAX, |(soft, _)| soft)
}

/// Lowers the socket cap when the open file limit can't hold a full window.
#[cfg(unix)]
fn infer_max_sockets(opts: &Opts, max_sockets: usize, ulimit: u64) -> usize {
    let fitted = fit_max_sockets(max_sockets, ulimit);

    if fitted < max_sockets {
        warning!(
            format!(
                "File limit {ulimit} is too low for {max_sockets} sockets, using {fitted}. Consider upping it with --ulimit."
            ),
            opts.greppable,
            opts.accessible
        );
    }

    fitted
}

#[cfg(unix)]
fn fit_max_sockets(max_sockets: usize, ulimit: u64) -> usize {
    let wanted = u64::try_from(max_sockets).unwrap_or(u64::MAX);
    if ulimit >= wanted.saturating_add(RESERVED_DESCRIPTORS) {
        return max_sockets;
    }

    let available = if ulimit > 2 * RESERVED_DESCRIPTORS {
        ulimit - RESERVED_DESCRIPTORS
    } else {
        info!("Halving max sockets because the file limit is very small");
        ulimit / 2
    };

    usize::try_from(available).unwrap_or(max_sockets).clamp(1, max_sockets.max(1))
}
