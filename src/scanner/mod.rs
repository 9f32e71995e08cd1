//! Core functionality for actual scanning behaviour.
use crate::report::{ReportSink, ScanEvent};
use futures::future::join_all;
use log::{debug, warn};

mod batch_iterator;
use batch_iterator::BatchIterator;

use std::{
    future::Future,
    io::{self, ErrorKind},
    net::{IpAddr, SocketAddr},
    num::NonZeroUsize,
    time::{Duration, Instant},
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time};

/// How many connections may be in flight when nothing else is configured.
pub const DEFAULT_MAX_SOCKETS: usize = 100;
/// How long a connection attempt may take when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Immutable tunables of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    max_sockets: NonZeroUsize,
    timeout: Duration,
}

impl ScanConfig {
    /// A zero socket count or a zero timeout falls back to the default.
    pub fn new(max_sockets: usize, timeout: Duration) -> Self {
        let max_sockets = NonZeroUsize::new(max_sockets).unwrap_or_else(|| {
            NonZeroUsize::new(DEFAULT_MAX_SOCKETS).unwrap_or(NonZeroUsize::MIN)
        });
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };

        Self {
            max_sockets,
            timeout,
        }
    }

    /// Upper bound on simultaneously open sockets.
    pub const fn max_sockets(&self) -> usize {
        self.max_sockets.get()
    }

    /// Deadline of each connection attempt.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SOCKETS, DEFAULT_TIMEOUT)
    }
}

/// What a single connection attempt found out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The handshake completed in time.
    Open,
    /// The host refused the connection.
    Closed,
    /// No answer before the deadline.
    TimedOut,
    /// Any other failure, with the error text.
    Errored(String),
}

impl ProbeOutcome {
    /// Whether the port accepted the connection.
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A single attempt to reach one target.
///
/// The scanner drives many probes at once, but a probe never sees its
/// siblings; everything it learns is returned in the outcome.
pub trait Probe {
    /// Attempts `target` once and classifies the result.
    fn probe(&self, target: SocketAddr) -> impl Future<Output = ProbeOutcome>;
}

/// Probes with a plain TCP connect bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// A probe that gives up after `timeout`.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Bounds `connect` by the timeout and classifies what it returns.
    /// The stream, if any, is shut down before returning.
    async fn classify<F>(&self, target: SocketAddr, connect: F) -> ProbeOutcome
    where
        F: Future<Output = io::Result<TcpStream>>,
    {
        match time::timeout(self.timeout, connect).await {
            Ok(Ok(mut tcp_stream)) => {
                debug!("Connection was successful, shutting down stream {target}");
                if let Err(e) = tcp_stream.shutdown().await {
                    debug!("Shutdown stream error {e}");
                }
                ProbeOutcome::Open
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => ProbeOutcome::Closed,
            Ok(Err(e)) => {
                let error_string = e.to_string();
                if error_string.to_lowercase().contains("too many open files") {
                    warn!("Too many open files while probing {target}. Please reduce the socket count or raise the ulimit.");
                }
                ProbeOutcome::Errored(error_string)
            }
            Err(_) => ProbeOutcome::TimedOut,
        }
    }
}

impl Probe for TcpProbe {
    async fn probe(&self, target: SocketAddr) -> ProbeOutcome {
        self.classify(target, TcpStream::connect(target)).await
    }
}

/// Tally of a finished scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Targets that accepted a connection, in scan order.
    pub open: Vec<SocketAddr>,
    /// Number of refused probes.
    pub closed: usize,
    /// Number of probes that hit the deadline.
    pub timed_out: usize,
    /// Number of probes that failed otherwise.
    pub errored: usize,
    /// Number of windows that were run.
    pub windows: usize,
}

impl ScanReport {
    /// Total number of probes that resolved.
    pub fn probed(&self) -> usize {
        self.open.len() + self.closed + self.timed_out + self.errored
    }

    fn record(&mut self, target: SocketAddr, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Open => self.open.push(target),
            ProbeOutcome::Closed => self.closed += 1,
            ProbeOutcome::TimedOut => self.timed_out += 1,
            ProbeOutcome::Errored(_) => self.errored += 1,
        }
    }
}

/// The class for the scanner.
///
/// Ports are scanned in windows of `max_sockets` targets. A window is fully
/// drained before the next one is formed, which caps the number of open
/// sockets regardless of how many ports are scanned.
#[derive(Debug)]
pub struct Scanner<P = TcpProbe> {
    ip: IpAddr,
    config: ScanConfig,
    probe: P,
}

impl Scanner<TcpProbe> {
    /// A scanner for `ip` using TCP connect probes.
    pub fn new(ip: IpAddr, config: ScanConfig) -> Self {
        Self::with_probe(ip, config, TcpProbe::new(config.timeout()))
    }
}

impl<P: Probe> Scanner<P> {
    /// A scanner for `ip` using a custom probe.
    pub fn with_probe(ip: IpAddr, config: ScanConfig, probe: P) -> Self {
        Self { ip, config, probe }
    }

    /// Probes every port of `ports` exactly once.
    ///
    /// Open and errored targets are handed to `sink` as soon as their probe
    /// resolves. Returns once the last window has drained.
    pub async fn run<I, S>(&self, ports: I, sink: &S) -> ScanReport
    where
        I: IntoIterator<Item = u16>,
        S: ReportSink + ?Sized,
    {
        let mut report = ScanReport::default();
        let windows = BatchIterator::new(self.ip, ports.into_iter(), self.config.max_sockets());

        debug!(
            "Start scanning {}.\nMax sockets {}\nTimeout {:?}",
            self.ip,
            self.config.max_sockets(),
            self.config.timeout()
        );

        for window in windows {
            let start = Instant::now();
            let outcomes = join_all(
                window
                    .iter()
                    .map(|&target| self.probe_and_report(target, sink)),
            )
            .await;

            for (target, outcome) in window.iter().zip(&outcomes) {
                report.record(*target, outcome);
            }
            report.windows += 1;

            debug!(
                "Window {} of {} targets drained in {:?}",
                report.windows,
                window.len(),
                start.elapsed()
            );
        }

        debug!("Open Sockets found: {:?}", &report.open);
        report
    }

    async fn probe_and_report<S>(&self, target: SocketAddr, sink: &S) -> ProbeOutcome
    where
        S: ReportSink + ?Sized,
    {
        let outcome = self.probe.probe(target).await;
        match &outcome {
            ProbeOutcome::Open => sink.report(ScanEvent::Open(target)),
            ProbeOutcome::Errored(detail) => {
                sink.report(ScanEvent::Error(target, detail.clone()));
            }
            ProbeOutcome::Closed | ProbeOutcome::TimedOut => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Counts how many probes are running at the same time.
    #[derive(Default)]
    struct CountingProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<HashMap<u16, usize>>,
    }

    impl Probe for CountingProbe {
        async fn probe(&self, target: SocketAddr) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            *self.seen.lock().unwrap().entry(target.port()).or_default() += 1;

            time::sleep(Duration::from_millis(20 + u64::from(target.port() % 7))).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match target.port() % 4 {
                0 => ProbeOutcome::Open,
                1 => ProbeOutcome::Closed,
                2 => ProbeOutcome::TimedOut,
                _ => ProbeOutcome::Errored("network unreachable".to_owned()),
            }
        }
    }

    fn ignore(_: ScanEvent) {}

    #[tokio::test]
    async fn never_exceeds_max_sockets() {
        let config = ScanConfig::new(100, Duration::from_millis(50));
        let scanner = Scanner::with_probe(LOCALHOST, config, CountingProbe::default());

        let report = scanner.run(1..=250, &ignore).await;

        assert_eq!(3, report.windows);
        assert_eq!(250, report.probed());
        assert_eq!(100, scanner.probe.peak.load(Ordering::SeqCst));
        assert_eq!(0, scanner.probe.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn every_port_probed_exactly_once() {
        let config = ScanConfig::new(33, Duration::from_millis(50));
        let scanner = Scanner::with_probe(LOCALHOST, config, CountingProbe::default());

        scanner.run(1..=500, &ignore).await;

        let seen = scanner.probe.seen.lock().unwrap();
        assert_eq!(500, seen.len());
        assert!(seen.values().all(|&count| count == 1));
    }

    #[tokio::test]
    async fn errored_probes_do_not_stop_siblings() {
        let config = ScanConfig::new(10, Duration::from_millis(50));
        let scanner = Scanner::with_probe(LOCALHOST, config, CountingProbe::default());
        let events = RefCell::new(Vec::new());
        let sink = |event: ScanEvent| events.borrow_mut().push(event);

        let report = scanner.run(1..=40, &sink).await;

        assert_eq!(10, report.open.len());
        assert_eq!(10, report.closed);
        assert_eq!(10, report.timed_out);
        assert_eq!(10, report.errored);

        let events = events.into_inner();
        let opens = events
            .iter()
            .filter(|event| matches!(event, ScanEvent::Open(_)))
            .count();
        assert_eq!(10, opens);
        assert!(events.contains(&ScanEvent::Error(
            SocketAddr::new(LOCALHOST, 3),
            "network unreachable".to_owned()
        )));
    }

    #[tokio::test]
    async fn empty_port_sequence_is_a_no_op() {
        let scanner = Scanner::with_probe(LOCALHOST, ScanConfig::default(), CountingProbe::default());

        let report = scanner.run(std::iter::empty(), &ignore).await;

        assert_eq!(ScanReport::default(), report);
        assert_eq!(0, scanner.probe.peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_port_is_reported_before_the_window_drains() {
        struct SlowTail;

        impl Probe for SlowTail {
            async fn probe(&self, target: SocketAddr) -> ProbeOutcome {
                if target.port() == 2 {
                    time::sleep(Duration::from_millis(200)).await;
                    ProbeOutcome::TimedOut
                } else {
                    ProbeOutcome::Open
                }
            }
        }

        let scanner = Scanner::with_probe(LOCALHOST, ScanConfig::default(), SlowTail);
        let started = Instant::now();
        let reported_after = RefCell::new(None);
        let sink = |_: ScanEvent| {
            reported_after.borrow_mut().get_or_insert(started.elapsed());
        };

        scanner.run([1, 2], &sink).await;

        let reported_after = reported_after.into_inner().unwrap();
        assert!(reported_after < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn tcp_probe_finds_listener() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let target = listener.local_addr().unwrap();

        let outcome = TcpProbe::new(Duration::from_secs(1)).probe(target).await;

        assert_eq!(ProbeOutcome::Open, outcome);
    }

    #[tokio::test]
    async fn tcp_probe_refused_is_closed_and_prompt() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let target = listener.local_addr().unwrap();
        drop(listener);

        let timeout = Duration::from_secs(3);
        let start = Instant::now();
        let outcome = TcpProbe::new(timeout).probe(target).await;

        assert_eq!(ProbeOutcome::Closed, outcome);
        assert!(start.elapsed() < timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connect_times_out_at_the_deadline() {
        let target = SocketAddr::new(LOCALHOST, 81);
        let timeout = Duration::from_millis(300);
        let start = time::Instant::now();

        let outcome = TcpProbe::new(timeout)
            .classify(target, std::future::pending())
            .await;

        assert_eq!(ProbeOutcome::TimedOut, outcome);
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_errors_are_classified() {
        let target = SocketAddr::new(LOCALHOST, 81);
        let connector = TcpProbe::new(Duration::from_millis(300));

        let refused = connector
            .classify(target, async {
                Err(io::Error::from(ErrorKind::ConnectionRefused))
            })
            .await;
        let unreachable = connector
            .classify(target, async {
                Err(io::Error::other("network unreachable"))
            })
            .await;

        assert_eq!(ProbeOutcome::Closed, refused);
        assert_eq!(ProbeOutcome::Errored("network unreachable".to_owned()), unreachable);
    }

    #[tokio::test]
    #[ignore = "needs a network that drops packets to 10.255.255.1"]
    async fn tcp_connect_times_out_on_unroutable_address() {
        let target = SocketAddr::from(([10, 255, 255, 1], 81));
        let timeout = Duration::from_millis(300);
        let start = Instant::now();

        let outcome = TcpProbe::new(timeout).probe(target).await;

        assert_eq!(ProbeOutcome::TimedOut, outcome);
        assert!(start.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn scanner_runs_against_localhost() {
        // Makes sure the program still runs and doesn't panic
        let scanner = Scanner::new(LOCALHOST, ScanConfig::new(10, Duration::from_millis(100)));
        let report = scanner.run(1..=1_000, &ignore).await;

        assert_eq!(1_000, report.probed());
        assert_eq!(100, report.windows);
    }

    #[test]
    fn config_falls_back_to_defaults() {
        let config = ScanConfig::new(0, Duration::ZERO);
        assert_eq!(DEFAULT_MAX_SOCKETS, config.max_sockets());
        assert_eq!(DEFAULT_TIMEOUT, config.timeout());

        let config = ScanConfig::new(7, Duration::from_secs(2));
        assert_eq!(7, config.max_sockets());
        assert_eq!(Duration::from_secs(2), config.timeout());
    }
}
