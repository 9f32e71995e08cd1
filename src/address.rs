//! Resolves the scan target to a single IP address.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::debug;
use thiserror::Error;
use tokio::fs;

const DNS_PORT: u16 = 53;

/// Why a host could not be turned into an address. Fatal to the scan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing was given to resolve.
    #[error("no host given, expected an IP address or a domain name")]
    Empty,
    /// Neither the system nor the backup resolver knew the host.
    #[error("failed to get address info for {0:?}, make sure that it is a correct IP address or a domain name")]
    NotFound(String),
}

/// Resolves `host` to the address the scan will target.
///
/// IP literals are returned as is. Anything else goes to the system
/// resolver first and then to a DNS resolver derived from `resolver`
/// (see [`fallback_resolver`]). The first address found wins.
///
/// ```rust
/// # use sweepscan::address::resolve;
/// # use std::net::Ipv4Addr;
/// # let runtime = tokio::runtime::Runtime::new().unwrap();
/// # runtime.block_on(async {
/// let ip = resolve("127.0.0.1", None).await.unwrap();
/// assert_eq!(ip, Ipv4Addr::LOCALHOST);
/// # });
/// ```
pub async fn resolve(host: &str, resolver: Option<&str>) -> Result<IpAddr, ResolutionError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ResolutionError::Empty);
    }

    if let Ok(ip) = IpAddr::from_str(host) {
        return Ok(ip);
    }

    if let Ok(mut addrs) = tokio::net::lookup_host((host, 0)).await {
        if let Some(addr) = addrs.next() {
            debug!("System resolver mapped {host} to {}", addr.ip());
            return Ok(addr.ip());
        }
    }

    let backup_resolver = fallback_resolver(resolver).await;
    match backup_resolver.lookup_ip(host).await {
        Ok(lookup) => lookup.iter().next().map_or_else(
            || Err(ResolutionError::NotFound(host.to_owned())),
            |ip| {
                debug!("Backup resolver mapped {host} to {ip}");
                Ok(ip)
            },
        ),
        Err(e) => {
            debug!("Backup resolver failed for {host}: {e}");
            Err(ResolutionError::NotFound(host.to_owned()))
        }
    }
}

/// Builds the resolver consulted when the system lookup finds nothing.
///
/// `servers` may name a file holding one IP per line, or be a comma-separated
/// list of IPs; each one is queried over UDP. Without `servers` the system
/// configuration is used, or Cloudflare over TLS when it can't be read.
async fn fallback_resolver(servers: Option<&str>) -> TokioAsyncResolver {
    let Some(servers) = servers else {
        return TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        });
    };

    let name_servers = match fs::read_to_string(servers).await {
        Ok(content) => parse_servers(content.lines()),
        Err(_) => parse_servers(servers.split(',')),
    };
    debug!("Backup resolver uses name servers {name_servers:?}");

    let mut config = ResolverConfig::new();
    for ip in name_servers {
        config.add_name_server(NameServerConfig::new(
            SocketAddr::new(ip, DNS_PORT),
            Protocol::Udp,
        ));
    }
    TokioAsyncResolver::tokio(config, ResolverOpts::default())
}

fn parse_servers<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<IpAddr> {
    entries
        .filter_map(|entry| IpAddr::from_str(entry.trim()).ok())
        .collect()
}
