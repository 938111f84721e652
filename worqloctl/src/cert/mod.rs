//! TLS certificate lifecycle: DNS validation, webroot issuance through the
//! running proxy, installation, proxy configuration, and renewal.

pub mod acme;
pub mod dns;
pub mod manager;
pub mod record;
pub mod renewal;

pub use dns::{
    DnsCheck, DnsResolver, HttpPublicIp, Operator, PublicDnsResolver,
    PublicIpSource, TerminalOperator,
};
pub use manager::{CertPorts, CertificateManager, SetupReport, SetupRequest};
pub use record::{CertPaths, CertStatus, CertificateRecord};
pub use renewal::RenewalSchedule;
