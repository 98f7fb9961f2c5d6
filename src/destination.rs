use std::fmt;
use std::net::IpAddr;
use anyhow::{anyhow, bail, Result};

/// Pool bucket key. Two requests share idle connections only when host and port match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    host: String,
    port: u16,
}

impl DestinationKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DestinationKey { host: host.into().to_ascii_lowercase(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// IP literals skip DNS entirely.
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host.trim_start_matches('[').trim_end_matches(']').parse().ok()
    }

    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Splits `http://host[:port][/path]` into a destination and a request path.
pub fn parse_url(url: &str) -> Result<(DestinationKey, String)> {
    let rest = match url.strip_prefix("http://") {
        Some(rest) => rest,
        None if url.starts_with("https://") => bail!("TLS is not supported: {}", url),
        None => bail!("expected an http:// url, got {}", url),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        bail!("missing host in {}", url);
    }

    // Bracketed IPv6 literals carry colons of their own.
    let (host, port) = match authority.rfind(':') {
        Some(idx) if !authority[idx..].contains(']') => {
            let port = authority[idx + 1..]
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid port in {}", url))?;
            (&authority[..idx], port)
        }
        _ => (authority, 80),
    };

    Ok((DestinationKey::new(host, port), path.to_string()))
}
