//! Provides the port sources a scan can draw from and the filter that keeps
//! them inside the legal TCP range.
use either::Either;

/// Lowest port number a TCP scan will ever probe.
pub const LOWEST_PORT_NUMBER: u16 = 1;
/// Highest port number a TCP scan will ever probe.
pub const TOP_PORT_NUMBER: u16 = 65535;

/// Where the ports of a scan come from.
///
/// Values are kept as wide integers so that out-of-range input survives
/// parsing and is dropped by [`filter_ports`] instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSource {
    /// An explicit list, scanned in the given order.
    List(Vec<i64>),
    /// Every port from 1 to 65535.
    All,
    /// An inclusive range. `start > end` yields nothing.
    Range {
        /// First port of the range.
        start: i64,
        /// Last port of the range, inclusive.
        end: i64,
    },
}

impl PortSource {
    /// Lazily yields the ports of this source, already filtered.
    ///
    /// ```rust
    /// # use sweepscan::port_source::PortSource;
    /// let source = PortSource::Range { start: 65530, end: 70000 };
    /// assert_eq!(source.ports().count(), 6);
    /// ```
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        match self {
            Self::List(ports) => Either::Left(filter_ports(ports.iter().copied())),
            Self::All => Either::Right(Either::Left(LOWEST_PORT_NUMBER..=TOP_PORT_NUMBER)),
            Self::Range { start, end } => {
                // Clamping first keeps huge ranges cheap; the filter still has the final say.
                let start = (*start).max(i64::from(LOWEST_PORT_NUMBER));
                let end = (*end).min(i64::from(TOP_PORT_NUMBER));
                Either::Right(Either::Right(filter_ports(start..=end)))
            }
        }
    }
}

/// Keeps only the values that are valid TCP ports, preserving order.
///
/// Out-of-range values are skipped silently. The filter is lazy, so
/// unbounded inputs are fine as long as the consumer stops pulling.
///
/// ```rust
/// # use sweepscan::port_source::filter_ports;
/// let ports: Vec<u16> = filter_ports([0, 22, 80, 70000, 443]).collect();
/// assert_eq!(ports, [22, 80, 443]);
/// ```
pub fn filter_ports<I>(ports: I) -> impl Iterator<Item = u16>
where
    I: IntoIterator<Item = i64>,
{
    ports
        .into_iter()
        .filter_map(|port| u16::try_from(port).ok())
        .filter(|&port| port >= LOWEST_PORT_NUMBER)
}
