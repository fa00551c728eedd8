//! Connection string parsing and resolution.
//!
//! A connection string names one or more cluster nodes using the grammar
//! `[scheme://]host[:port](,host[:port])*[?key=value(&key=value)*]` where
//! `host` is a DNS name, an IPv4 literal, or a bracketed IPv6 literal.
//! Resolution substitutes default ports, decides whether TLS is in play, and
//! expands single-host `couchbase[s]://` strings through DNS SRV records.

use crate::error::{RestError, Result};
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// Default management port when the connection string does not use TLS.
pub const DEFAULT_HTTP_PORT: u16 = 8091;

/// Default management port when the connection string uses TLS.
pub const DEFAULT_HTTPS_PORT: u16 = 18091;

/// Scheme prefix of a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// No scheme given; equivalent to [`Scheme::Http`] for resolution.
    #[default]
    Unset,
    Http,
    Https,
    /// SRV-eligible non-TLS scheme.
    Couchbase,
    /// SRV-eligible TLS scheme.
    Couchbases,
}

impl Scheme {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "couchbase" => Ok(Scheme::Couchbase),
            "couchbases" => Ok(Scheme::Couchbases),
            other => Err(RestError::BadScheme(other.to_string())),
        }
    }

    /// Whether resolution of this scheme enables TLS.
    pub fn use_tls(self) -> bool {
        matches!(self, Scheme::Https | Scheme::Couchbases)
    }

    /// Whether this scheme may be expanded through a DNS SRV lookup.
    pub fn is_srv_eligible(self) -> bool {
        matches!(self, Scheme::Couchbase | Scheme::Couchbases)
    }

    fn default_port(self) -> u16 {
        if self.use_tls() {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        }
    }

    fn srv_name(self, host: &str) -> String {
        if self.use_tls() {
            format!("_couchbases._tcp.{host}")
        } else {
            format!("_couchbase._tcp.{host}")
        }
    }

    fn as_str(self) -> Option<&'static str> {
        match self {
            Scheme::Unset => None,
            Scheme::Http => Some("http"),
            Scheme::Https => Some("https"),
            Scheme::Couchbase => Some("couchbase"),
            Scheme::Couchbases => Some("couchbases"),
        }
    }
}

/// A `(host, port)` pair. Port zero means "unspecified".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == 0 {
            f.write_str(&self.host)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Address {
    /// Whether the host is a numeric IP literal (IPv4, or bracketed IPv6).
    fn is_ip_literal(&self) -> bool {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(&self.host);

        host.parse::<IpAddr>().is_ok()
    }
}

/// A parsed, unresolved connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    pub scheme: Scheme,
    pub addresses: Vec<Address>,
    /// Query parameters in declaration order per key.
    pub params: BTreeMap<String, Vec<String>>,
}

impl ConnectionString {
    /// Parse a user-supplied connection string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(RestError::NoAddressesParsed);
        }

        let (scheme, rest) = match input.split_once("://") {
            Some((raw, rest)) => (Scheme::parse(raw)?, rest),
            None => (Scheme::Unset, input),
        };

        let (hosts, query) = match rest.split_once('?') {
            Some((hosts, query)) => (hosts, Some(query)),
            None => (rest, None),
        };

        if hosts.is_empty() {
            return Err(RestError::NoAddressesParsed);
        }

        let addresses = hosts
            .split(',')
            .map(parse_address)
            .collect::<Result<Vec<_>>>()?;

        if addresses.is_empty() {
            return Err(RestError::NoAddressesParsed);
        }

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Ok(ConnectionString {
            scheme,
            addresses,
            params,
        })
    }

    /// The address an SRV lookup would be performed for, if the string is
    /// SRV-eligible: a single non-numeric host with no explicit port.
    fn srv_candidate(&self) -> Option<&Address> {
        if !self.scheme.is_srv_eligible() || self.addresses.len() != 1 {
            return None;
        }

        let address = &self.addresses[0];
        if address.port != 0 || address.is_ip_literal() {
            return None;
        }

        Some(address)
    }

    /// Resolve the connection string: decide TLS, substitute default ports,
    /// and expand SRV-eligible strings through DNS.
    pub async fn resolve(&self) -> Result<ResolvedConnectionString> {
        let use_tls = self.scheme.use_tls();
        let default_port = self.scheme.default_port();

        let addresses = match self.srv_candidate() {
            Some(candidate) => match lookup_srv(self.scheme, &candidate.host).await {
                Some(hosts) => hosts
                    .into_iter()
                    .map(|host| Address {
                        host,
                        port: default_port,
                    })
                    .collect(),
                None => self.defaulted_addresses(default_port),
            },
            None => self.defaulted_addresses(default_port),
        };

        if addresses.is_empty() {
            return Err(RestError::NoAddressesResolved);
        }

        Ok(ResolvedConnectionString {
            use_tls,
            addresses,
            params: self.params.clone(),
        })
    }

    fn defaulted_addresses(&self, default_port: u16) -> Vec<Address> {
        self.addresses
            .iter()
            .map(|address| Address {
                host: address.host.clone(),
                port: if address.port == 0 {
                    default_port
                } else {
                    address.port
                },
            })
            .collect()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = self.scheme.as_str() {
            write!(f, "{scheme}://")?;
        }

        for (index, address) in self.addresses.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{address}")?;
        }

        let mut separator = '?';
        for (key, values) in &self.params {
            for value in values {
                write!(f, "{separator}{key}={value}")?;
                separator = '&';
            }
        }

        Ok(())
    }
}

/// The product of [`ConnectionString::resolve`]: every address carries a
/// non-zero port, and the TLS decision has been made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnectionString {
    pub use_tls: bool,
    pub addresses: Vec<Address>,
    pub params: BTreeMap<String, Vec<String>>,
}

fn parse_address(item: &str) -> Result<Address> {
    if item.is_empty() {
        return Err(RestError::InvalidConnectionString(
            "empty address in host list".to_string(),
        ));
    }

    let (host, port) = if let Some(rest) = item.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally followed by a port.
        let Some((literal, tail)) = rest.split_once(']') else {
            return Err(RestError::InvalidConnectionString(format!(
                "unterminated IPv6 literal in '{item}'"
            )));
        };

        let port = match tail.strip_prefix(':') {
            Some(token) => parse_port(token)?,
            None if tail.is_empty() => 0,
            None => {
                return Err(RestError::InvalidConnectionString(format!(
                    "unexpected trailing characters in '{item}'"
                )));
            }
        };

        (format!("[{literal}]"), port)
    } else {
        match item.split_once(':') {
            Some((host, token)) if token.contains(':') => {
                return Err(RestError::InvalidConnectionString(format!(
                    "IPv6 literal '{host}:{token}' must be bracketed"
                )));
            }
            Some((host, token)) => (host.to_string(), parse_port(token)?),
            None => (item.to_string(), 0),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err(RestError::InvalidConnectionString(format!(
            "missing host in '{item}'"
        )));
    }

    Ok(Address { host, port })
}

fn parse_port(token: &str) -> Result<u16> {
    token
        .parse::<u32>()
        .ok()
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| RestError::BadPort(token.to_string()))
}

/// Perform the SRV lookup for an eligible scheme/host pair, returning the
/// target hostnames. Any failure falls back to treating the host as a plain
/// address.
async fn lookup_srv(scheme: Scheme, host: &str) -> Option<Vec<String>> {
    let name = scheme.srv_name(host);

    let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => resolver,
        Err(err) => {
            debug!(error = %err, "failed to create DNS resolver, skipping SRV lookup");
            return None;
        }
    };

    match resolver.srv_lookup(name.clone()).await {
        Ok(records) => {
            let hosts: Vec<String> = records
                .iter()
                .map(|record| record.target().to_string().trim_end_matches('.').to_string())
                .collect();

            if hosts.is_empty() {
                return None;
            }

            debug!(%name, targets = hosts.len(), "expanded connection string via SRV");
            Some(hosts)
        }
        Err(err) => {
            debug!(%name, error = %err, "SRV lookup failed, using host as-is");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srv_candidate_requires_single_unported_dns_name() {
        let eligible = ConnectionString::parse("couchbase://cluster.example.com").unwrap();
        assert!(eligible.srv_candidate().is_some());

        let ported = ConnectionString::parse("couchbase://cluster.example.com:12000").unwrap();
        assert!(ported.srv_candidate().is_none());

        let multiple = ConnectionString::parse("couchbase://host1,host2").unwrap();
        assert!(multiple.srv_candidate().is_none());

        let numeric = ConnectionString::parse("couchbase://10.0.0.1").unwrap();
        assert!(numeric.srv_candidate().is_none());

        let ipv6 = ConnectionString::parse("couchbase://[2001:db8::1]").unwrap();
        assert!(ipv6.srv_candidate().is_none());

        let plain = ConnectionString::parse("http://cluster.example.com").unwrap();
        assert!(plain.srv_candidate().is_none());
    }

    #[test]
    fn srv_names_follow_the_scheme() {
        assert_eq!(
            Scheme::Couchbase.srv_name("example.com"),
            "_couchbase._tcp.example.com"
        );
        assert_eq!(
            Scheme::Couchbases.srv_name("example.com"),
            "_couchbases._tcp.example.com"
        );
    }
}
