//! Entry point tying resolution, port filtering and the scanner together.
use crate::address::{resolve, ResolutionError};
use crate::port_source::PortSource;
use crate::report::ReportSink;
use crate::scanner::{ScanConfig, ScanReport, Scanner};
use log::info;
use std::net::IpAddr;

/// Runs whole scans against one host at a time.
#[derive(Debug, Clone, Default)]
pub struct ScanEngine {
    config: ScanConfig,
    resolver: Option<String>,
}

impl ScanEngine {
    /// An engine using the system resolver with a public DNS fallback.
    pub const fn new(config: ScanConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Use these DNS servers (comma-separated IPs, or a file of IPs) when
    /// the system resolver fails.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl Into<String>) -> Self {
        self.resolver = Some(resolver.into());
        self
    }

    /// Configuration every scan of this engine runs with.
    pub const fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolves `host` once and scans the ports of `source`.
    ///
    /// Events go to `sink` while the scan runs. Only a resolution failure
    /// ends the scan early, before any socket has been opened.
    ///
    /// ```rust
    /// # use sweepscan::{engine::ScanEngine, port_source::PortSource, report::ScanEvent};
    /// # use sweepscan::scanner::ScanConfig;
    /// # use std::time::Duration;
    /// # let runtime = tokio::runtime::Runtime::new().unwrap();
    /// # runtime.block_on(async {
    /// let engine = ScanEngine::new(ScanConfig::new(100, Duration::from_millis(200)));
    /// let source = PortSource::Range { start: 1, end: 1_000 };
    /// let report = engine
    ///     .scan("127.0.0.1", &source, &|event: ScanEvent| println!("{event:?}"))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(report.windows, 10);
    /// # });
    /// ```
    pub async fn scan<S>(
        &self,
        host: &str,
        source: &PortSource,
        sink: &S,
    ) -> Result<ScanReport, ResolutionError>
    where
        S: ReportSink + ?Sized,
    {
        let ip = resolve(host, self.resolver.as_deref()).await?;
        Ok(self.scan_ip(ip, source, sink).await)
    }

    /// Scans an already resolved address.
    pub async fn scan_ip<S>(&self, ip: IpAddr, source: &PortSource, sink: &S) -> ScanReport
    where
        S: ReportSink + ?Sized,
    {
        info!(
            "Scanning {ip} with at most {} sockets and a {:?} timeout",
            self.config.max_sockets(),
            self.config.timeout()
        );

        let report = Scanner::new(ip, self.config)
            .run(source.ports(), sink)
            .await;

        info!(
            "Finished {ip}: {} open, {} closed, {} timed out, {} errored",
            report.open.len(),
            report.closed,
            report.timed_out,
            report.errored
        );
        report
    }
}
