//! DNS validation before a certificate request: the domain must publish an
//! A record, and that record should point at this host.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use dialoguer::{Confirm, console::Term};
use hickory_resolver::{
    Resolver,
    config::{NameServerConfig, ResolveHosts, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::xfer::Protocol,
};
use tracing::debug;

use crate::error::DeployError;

#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// IPv4 addresses published for `domain`; empty when there is no record.
    async fn resolve_ipv4(&self, domain: &str) -> Vec<Ipv4Addr>;
}

#[async_trait]
pub trait PublicIpSource: Send + Sync {
    async fn public_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Asks the operator to accept a questionable state.
pub trait Operator: Send + Sync {
    fn is_interactive(&self) -> bool;
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Asks the configured nameservers directly. The hosts file and any local
/// split-horizon resolver are skipped, so the answer matches what the ACME
/// server sees.
pub struct PublicDnsResolver {
    resolver: Resolver<TokioConnectionProvider>,
    servers: Vec<SocketAddr>,
}

impl fmt::Debug for PublicDnsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicDnsResolver")
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

impl PublicDnsResolver {
    pub fn new(servers: &[SocketAddr]) -> Self {
        let name_servers: Vec<NameServerConfig> = servers
            .iter()
            .map(|addr| NameServerConfig::new(*addr, Protocol::Udp))
            .collect();
        let config = ResolverConfig::from_parts(None, vec![], name_servers);
        let mut opts = ResolverOpts::default();
        opts.use_hosts_file = ResolveHosts::Never;
        opts.timeout = Duration::from_secs(3);
        let resolver = Resolver::builder_with_config(
            config,
            TokioConnectionProvider::default(),
        )
        .with_options(opts)
        .build();
        debug!(servers = ?servers, "Created public DNS resolver");
        Self {
            resolver,
            servers: servers.to_vec(),
        }
    }
}

#[async_trait]
impl DnsResolver for PublicDnsResolver {
    async fn resolve_ipv4(&self, domain: &str) -> Vec<Ipv4Addr> {
        // Fully qualified, so no search domain is appended.
        let fqdn = format!("{}.", domain.trim_end_matches('.'));
        match self.resolver.ipv4_lookup(fqdn).await {
            Ok(lookup) => {
                let mut ips: Vec<Ipv4Addr> = lookup.iter().map(|a| a.0).collect();
                ips.sort();
                ips.dedup();
                ips
            }
            Err(err) => {
                debug!(domain, error = %err, "DNS lookup failed");
                Vec::new()
            }
        }
    }
}

/// Asks public "what is my IP" services in order until one answers with an
/// IPv4 address.
#[derive(Debug, Clone)]
pub struct HttpPublicIp {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl HttpPublicIp {
    pub fn new(endpoints: Vec<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { endpoints, client })
    }
}

#[async_trait]
impl PublicIpSource for HttpPublicIp {
    async fn public_ipv4(&self) -> Option<Ipv4Addr> {
        for endpoint in &self.endpoints {
            let body = match self.client.get(endpoint).send().await {
                Ok(resp) if resp.status().is_success() => resp.text().await,
                Ok(resp) => {
                    debug!(endpoint, status = %resp.status(), "Public IP lookup rejected");
                    continue;
                }
                Err(err) => {
                    debug!(endpoint, error = %err, "Public IP lookup failed");
                    continue;
                }
            };
            if let Some(ip) = body.ok().and_then(|b| b.trim().parse().ok()) {
                return Some(ip);
            }
        }
        None
    }
}

/// Operator at the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn is_interactive(&self) -> bool {
        Term::stderr().is_term()
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact_on(&Term::stderr())?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCheck {
    Matched { ip: Ipv4Addr },
    Mismatch {
        resolved: Vec<Ipv4Addr>,
        public_ip: Ipv4Addr,
    },
    /// The domain resolves but this host's public IP is unknown.
    Unverified { resolved: Vec<Ipv4Addr> },
}

/// Compare the domain's A records with the host's public address. A missing
/// record is fatal; everything else is for the caller to judge.
pub async fn check_dns(
    domain: &str,
    resolver: &dyn DnsResolver,
    public_ip: &dyn PublicIpSource,
) -> Result<DnsCheck, DeployError> {
    let (resolved, public) =
        tokio::join!(resolver.resolve_ipv4(domain), public_ip.public_ipv4());
    if resolved.is_empty() {
        return Err(DeployError::DnsNoRecord {
            domain: domain.to_string(),
            expected: public,
        });
    }
    Ok(match public {
        Some(ip) if resolved.contains(&ip) => DnsCheck::Matched { ip },
        Some(ip) => DnsCheck::Mismatch {
            resolved,
            public_ip: ip,
        },
        None => DnsCheck::Unverified { resolved },
    })
}

pub fn join_ips(ips: &[Ipv4Addr]) -> String {
    ips.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
