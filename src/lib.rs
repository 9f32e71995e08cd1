//! This crate exposes the internal functionality of the `sweepscan` TCP
//! port scanner.
//!
//! ## Architecture Overview
//!
//! The core scanning behaviour is managed by
//! [`Scanner`](crate::scanner::Scanner), fed by a
//! [`PortSource`](crate::port_source::PortSource) and driven end to end by
//! [`ScanEngine`](crate::engine::ScanEngine):
//!
//! 1. **Resolution**: the host is resolved once; failure aborts the scan
//! 2. **Port filtering**: the source lazily yields ports in 1-65535
//! 3. **Windows**: ports are grouped into windows of at most `max_sockets`
//! 4. **Probing**: a window's connects run concurrently and are all awaited
//!    before the next window starts
//! 5. **Reporting**: open and errored targets reach a
//!    [`ReportSink`](crate::report::ReportSink) as soon as they resolve
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use std::{net::IpAddr, time::Duration};
//!
//! use sweepscan::port_source::PortSource;
//! use sweepscan::report::ScanEvent;
//! use sweepscan::scanner::{ScanConfig, Scanner};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ip = "127.0.0.1".parse::<IpAddr>()?;
//!     let source = PortSource::Range { start: 1, end: 1_000 };
//!
//!     let scanner = Scanner::new(ip, ScanConfig::new(100, Duration::from_millis(100)));
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let report = runtime.block_on(scanner.run(source.ports(), &|event: ScanEvent| {
//!         println!("{event:?}");
//!     }));
//!
//!     println!("Discovered {} open ports", report.open.len());
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod scanner;

pub mod port_source;

pub mod address;

pub mod report;

pub mod engine;
