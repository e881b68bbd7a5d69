//! Address parser (spec §4.1): map a URL string to a transport family and
//! address, nothing more. Unrecognised shapes and unparseable numeric
//! literals are reported, never guessed at.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6},
    path::PathBuf,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("not a recognised rpc URL: {0}")]
    Invalid(String),
}

/// A parsed, family-tagged address. Two endpoints are equal exactly when
/// `rpc_unbind_url`'s match-by-value semantics consider them the same bound
/// socket (spec §3 "Uniqueness").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Ipv4(SocketAddrV4),
    Ipv6(SocketAddrV6),
}

/// Parses `unix://<path>[:<ignored-suffix>]`, `tcp://<ipv4>:<port>[:<ignored-suffix>]`,
/// or `tcp://[<ipv6>]:<port>[:<ignored-suffix>]`.
///
/// The trailing `[:<ignored-suffix>]` is not validated at all — it may
/// itself contain colons, mirroring the original `sscanf` parser which stops
/// at the first `:` following the port (see SPEC_FULL.md's address-parser
/// supplement).
pub fn parse_url(url: &str) -> Result<Endpoint, UrlError> {
    if let Some(rest) = url.strip_prefix("unix://") {
        return parse_unix(url, rest);
    }
    if let Some(rest) = url.strip_prefix("tcp://") {
        return parse_tcp(url, rest);
    }
    Err(UrlError::Invalid(url.to_string()))
}

fn parse_unix(url: &str, rest: &str) -> Result<Endpoint, UrlError> {
    let path = match rest.find(':') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    if path.is_empty() {
        return Err(UrlError::Invalid(url.to_string()));
    }
    Ok(Endpoint::Unix(PathBuf::from(path)))
}

fn parse_tcp(url: &str, rest: &str) -> Result<Endpoint, UrlError> {
    if let Some(after_bracket) = rest.strip_prefix('[') {
        let close = after_bracket.find(']').ok_or_else(|| UrlError::Invalid(url.to_string()))?;
        let addr_str = &after_bracket[..close];
        let tail = after_bracket[close + 1..]
            .strip_prefix(':')
            .ok_or_else(|| UrlError::Invalid(url.to_string()))?;
        let port_str = match tail.find(':') {
            Some(idx) => &tail[..idx],
            None => tail,
        };
        let addr: Ipv6Addr = addr_str.parse().map_err(|_| UrlError::Invalid(url.to_string()))?;
        let port: u16 = port_str.parse().map_err(|_| UrlError::Invalid(url.to_string()))?;
        return Ok(Endpoint::Ipv6(SocketAddrV6::new(addr, port, 0, 0)));
    }

    let mut parts = rest.splitn(3, ':');
    let host = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| UrlError::Invalid(url.to_string()))?;
    let port_str = parts.next().ok_or_else(|| UrlError::Invalid(url.to_string()))?;
    let addr: Ipv4Addr = host.parse().map_err(|_| UrlError::Invalid(url.to_string()))?;
    let port: u16 = port_str.parse().map_err(|_| UrlError::Invalid(url.to_string()))?;
    Ok(Endpoint::Ipv4(SocketAddrV4::new(addr, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        assert_eq!(
            parse_url("unix:///tmp/rpc-test.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/rpc-test.sock"))
        );
    }

    #[test]
    fn parses_unix_path_with_ignored_suffix() {
        assert_eq!(
            parse_url("unix:///tmp/rpc-test.sock:whatever:else").unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/rpc-test.sock"))
        );
    }

    #[test]
    fn parses_ipv4() {
        assert_eq!(
            parse_url("tcp://127.0.0.1:9090").unwrap(),
            Endpoint::Ipv4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9090))
        );
    }

    #[test]
    fn parses_ipv4_with_ignored_suffix_containing_colons() {
        assert_eq!(
            parse_url("tcp://127.0.0.1:9090:ignored:tail:here").unwrap(),
            Endpoint::Ipv4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9090))
        );
    }

    #[test]
    fn parses_ipv6() {
        assert_eq!(
            parse_url("tcp://[::1]:9090").unwrap(),
            Endpoint::Ipv6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 9090, 0, 0))
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_url("http://127.0.0.1:80").is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(parse_url("tcp://127.0.0.1:notaport").is_err());
    }

    #[test]
    fn rejects_garbage_address() {
        assert!(parse_url("tcp://not-an-ip:9090").is_err());
    }

    #[test]
    fn distinct_endpoints_are_not_equal() {
        let a = parse_url("tcp://127.0.0.1:1").unwrap();
        let b = parse_url("tcp://127.0.0.1:2").unwrap();
        assert_ne!(a, b);
    }
}
