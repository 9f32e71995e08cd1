//! Reporting sinks receive scan events the moment a probe resolves.
use colored::Colorize;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;

/// Something worth telling the user about while a scan runs.
///
/// Closed and timed-out ports produce no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// The target completed the TCP handshake.
    Open(SocketAddr),
    /// The probe failed for a reason other than refusal or timeout.
    Error(SocketAddr, String),
}

/// Receives scan events as they happen.
///
/// Events are delivered from within the running window, so implementations
/// should return quickly.
pub trait ReportSink {
    /// Handles a single event.
    fn report(&self, event: ScanEvent);
}

impl<F> ReportSink for F
where
    F: Fn(ScanEvent),
{
    fn report(&self, event: ScanEvent) {
        self(event);
    }
}

/// Prints events to the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalReporter {
    greppable: bool,
    accessible: bool,
}

impl TerminalReporter {
    /// Greppable mode prints bare `ip:port` lines and uncolored errors.
    /// Accessible mode drops colors.
    pub const fn new(greppable: bool, accessible: bool) -> Self {
        Self {
            greppable,
            accessible,
        }
    }
}

impl ReportSink for TerminalReporter {
    fn report(&self, event: ScanEvent) {
        match event {
            ScanEvent::Open(socket) if self.greppable => println!("{socket}"),
            ScanEvent::Open(socket) if self.accessible => {
                println!("{} is listening on port {}", socket.ip(), socket.port());
            }
            ScanEvent::Open(socket) => println!(
                "{} is listening on port {}",
                socket.ip(),
                socket.port().to_string().green()
            ),
            ScanEvent::Error(socket, detail) => eprintln!("{}", self.error_line(socket, &detail)),
        }
    }
}

impl TerminalReporter {
    /// Errors go to stderr, so greppable stdout stays clean either way.
    fn error_line(&self, socket: SocketAddr, detail: &str) -> String {
        let message = format!("Connection to {socket} failed: {detail}");
        if self.greppable || self.accessible {
            message
        } else {
            format!("{} {message}", ansi_term::Colour::Red.bold().paint("[!]"))
        }
    }
}

/// Forwards events into an unbounded tokio channel so a caller can consume
/// them as a stream while the scan is still running.
///
/// A dropped receiver is not an error; events are then discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<ScanEvent>,
}

impl ChannelSink {
    /// Wraps the sending half of a channel.
    pub const fn new(sender: UnboundedSender<ScanEvent>) -> Self {
        Self { sender }
    }
}

impl ReportSink for ChannelSink {
    fn report(&self, event: ScanEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("Event receiver dropped, discarding event");
        }
    }
}
