//! Endpoint address grammar: pure syntax parsing (no stack construction, no factory lookup).
//!
//! ```text
//! endpoint  := filter-chain "," transport
//! filter    := name [ "(" opts ")" ]
//! opts      := opt ("," opt)*        opt := key "=" value | flag
//! transport := "tcp" "," host "," port
//!            | "sctp" "," host "," port
//!            | "unix" "," path
//!            | "stdio" [ "(" opts ")" ]
//!            | "serialdev" "," devpath
//! ```
//!
//! Construction is right-to-left: the transport is the rightmost segment,
//! and each filter to its left wraps the endpoint built so far. This module
//! only produces the parsed AST ([`ParsedEndpoint`]); [`crate::registry`]
//! walks `filters` back-to-front to actually build the stack.
use spark_core::FilterOpts;

use crate::error::ParseError;

/// A single `name(k=v,k=v)` segment, left of the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedFilter {
    pub name: String,
    pub opts: FilterOpts,
}

/// The rightmost, terminating segment of an endpoint string.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportSpec {
    Tcp { host: String, port: u16 },
    Sctp { host: String, port: u16 },
    Unix { path: String },
    Stdio { opts: FilterOpts },
    SerialDev { devpath: String },
}

impl TransportSpec {
    /// The grammar keyword this spec was parsed from; doubles as the
    /// registry lookup key in [`crate::registry::Registry`].
    pub fn keyword(&self) -> &'static str {
        match self {
            TransportSpec::Tcp { .. } => "tcp",
            TransportSpec::Sctp { .. } => "sctp",
            TransportSpec::Unix { .. } => "unix",
            TransportSpec::Stdio { .. } => "stdio",
            TransportSpec::SerialDev { .. } => "serialdev",
        }
    }
}

/// The full parsed endpoint string: a left-to-right filter chain plus the
/// terminating transport.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEndpoint {
    pub filters: Vec<ParsedFilter>,
    pub transport: TransportSpec,
}

/// Splits `input` on top-level commas, i.e. commas outside `(...)` nesting.
/// `opts` strings (`k=v,k=v`) keep their internal commas intact as a single
/// token this way.
fn split_top_level(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    tokens.push(current);
    tokens
}

/// Splits `name` or `name(opts)` into its parts.
fn parse_name_opts(token: &str) -> Result<(String, FilterOpts), ParseError> {
    match token.find('(') {
        None => Ok((token.to_string(), FilterOpts::default())),
        Some(open) => {
            if !token.ends_with(')') {
                return Err(ParseError::MalformedOption(format!(
                    "unterminated option group in `{token}`"
                )));
            }
            let name = token[..open].to_string();
            let inner = &token[open + 1..token.len() - 1];
            Ok((name, parse_opts(inner)?))
        }
    }
}

fn parse_opts(inner: &str) -> Result<FilterOpts, ParseError> {
    let mut opts = FilterOpts::default();
    if inner.is_empty() {
        return Ok(opts);
    }
    for piece in inner.split(',') {
        if piece.is_empty() {
            return Err(ParseError::MalformedOption(format!(
                "empty option in `({inner})`"
            )));
        }
        match piece.split_once('=') {
            Some((key, value)) => {
                opts.values.insert(key.to_string(), value.to_string());
            }
            None => opts.flags.push(piece.to_string()),
        }
    }
    Ok(opts)
}

/// Parses a full endpoint string per the grammar above.
pub fn parse_endpoint_string(input: &str) -> Result<ParsedEndpoint, ParseError> {
    let tokens = split_top_level(input.trim());
    let mut filters = Vec::new();
    let mut idx = 0usize;

    loop {
        let Some(token) = tokens.get(idx) else {
            return Err(ParseError::MissingTransport);
        };
        let (name, opts) = parse_name_opts(token)?;

        match name.as_str() {
            "tcp" | "sctp" => {
                let host = tokens.get(idx + 1).ok_or_else(|| {
                    ParseError::MalformedOption(format!("`{name}` requires a host and port"))
                })?;
                let port_str = tokens.get(idx + 2).ok_or_else(|| {
                    ParseError::MalformedOption(format!("`{name}` requires a port"))
                })?;
                if idx + 3 != tokens.len() {
                    return Err(ParseError::MalformedOption(
                        "trailing tokens after transport".into(),
                    ));
                }
                let port: u16 = port_str.parse().map_err(|_| {
                    ParseError::MalformedOption(format!("invalid port `{port_str}`"))
                })?;
                let transport = if name == "tcp" {
                    TransportSpec::Tcp {
                        host: host.clone(),
                        port,
                    }
                } else {
                    TransportSpec::Sctp {
                        host: host.clone(),
                        port,
                    }
                };
                return Ok(ParsedEndpoint { filters, transport });
            }
            "unix" => {
                let path = tokens.get(idx + 1).ok_or_else(|| {
                    ParseError::MalformedOption("`unix` requires a path".into())
                })?;
                if idx + 2 != tokens.len() {
                    return Err(ParseError::MalformedOption(
                        "trailing tokens after transport".into(),
                    ));
                }
                return Ok(ParsedEndpoint {
                    filters,
                    transport: TransportSpec::Unix { path: path.clone() },
                });
            }
            "stdio" => {
                if idx + 1 != tokens.len() {
                    return Err(ParseError::MalformedOption(
                        "trailing tokens after transport".into(),
                    ));
                }
                return Ok(ParsedEndpoint {
                    filters,
                    transport: TransportSpec::Stdio { opts },
                });
            }
            "serialdev" => {
                let devpath = tokens.get(idx + 1).ok_or_else(|| {
                    ParseError::MalformedOption("`serialdev` requires a device path".into())
                })?;
                if idx + 2 != tokens.len() {
                    return Err(ParseError::MalformedOption(
                        "trailing tokens after transport".into(),
                    ));
                }
                return Ok(ParsedEndpoint {
                    filters,
                    transport: TransportSpec::SerialDev {
                        devpath: devpath.clone(),
                    },
                });
            }
            _ => {
                filters.push(ParsedFilter { name, opts });
                idx += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_tcp_transport() {
        let parsed = parse_endpoint_string("tcp,example.com,852").unwrap();
        assert!(parsed.filters.is_empty());
        assert_eq!(
            parsed.transport,
            TransportSpec::Tcp {
                host: "example.com".into(),
                port: 852
            }
        );
    }

    #[test]
    fn parses_full_client_filter_chain() {
        let parsed = parse_endpoint_string(
            "telnet(rfc2217),mux,certauth(enable-password,username=alice),ssl(CA=/etc/ca.pem),tcp,example.com,852",
        )
        .unwrap();
        assert_eq!(parsed.filters.len(), 4);
        assert_eq!(parsed.filters[0].name, "telnet");
        assert!(parsed.filters[0].opts.flag("rfc2217"));
        assert_eq!(parsed.filters[1].name, "mux");
        assert_eq!(parsed.filters[2].name, "certauth");
        assert!(parsed.filters[2].opts.flag("enable-password"));
        assert_eq!(parsed.filters[2].opts.get("username"), Some("alice"));
        assert_eq!(parsed.filters[3].name, "ssl");
        assert_eq!(parsed.filters[3].opts.get("CA"), Some("/etc/ca.pem"));
        assert_eq!(
            parsed.transport,
            TransportSpec::Tcp {
                host: "example.com".into(),
                port: 852
            }
        );
    }

    #[test]
    fn parses_unix_transport() {
        let parsed = parse_endpoint_string("unix,/var/run/gtlssh.sock").unwrap();
        assert_eq!(
            parsed.transport,
            TransportSpec::Unix {
                path: "/var/run/gtlssh.sock".into()
            }
        );
    }

    #[test]
    fn parses_stdio_with_opts() {
        let parsed = parse_endpoint_string("stdio(raw)").unwrap();
        match parsed.transport {
            TransportSpec::Stdio { opts } => assert!(opts.flag("raw")),
            other => panic!("unexpected transport: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_transport() {
        let err = parse_endpoint_string("telnet(rfc2217),mux").unwrap_err();
        assert!(matches!(err, ParseError::MissingTransport));
    }

    #[test]
    fn rejects_bad_port() {
        let err = parse_endpoint_string("tcp,example.com,notaport").unwrap_err();
        assert!(matches!(err, ParseError::MalformedOption(_)));
    }

    #[test]
    fn rejects_unterminated_opts() {
        let err = parse_endpoint_string("ssl(CA=/etc/ca.pem,tcp,example.com,852").unwrap_err();
        assert!(matches!(err, ParseError::MalformedOption(_)));
    }
}
