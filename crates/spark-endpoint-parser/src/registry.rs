//! Pluggable filter/transport factories and stack construction.
//!
//! Construction is right-to-left: the transport is built first,
//! then each filter in the chain wraps the endpoint built so far, walking
//! the parsed filter list back-to-front (the filter closest to the
//! transport wraps it first).
use std::collections::HashMap;
use std::sync::Arc;

use spark_core::{Endpoint, FilterOpts};

use crate::error::ParseError;
use crate::grammar::{ParsedEndpoint, TransportSpec};

/// Builds a leaf endpoint from a parsed transport spec. Implementations are
/// expected to construct synchronously — any DNS resolution or connection
/// attempt is deferred to the endpoint's own `open()`, matching the way
/// [`spark_transport_tcp`]'s connect-side ops lazily resolve addresses.
pub trait TransportFactory: Send + Sync {
    fn create(&self, spec: &TransportSpec) -> Result<Arc<dyn Endpoint>, ParseError>;
}

/// Wraps an existing endpoint with a filter, given its parsed options.
pub trait FilterFactory: Send + Sync {
    fn create(&self, opts: &FilterOpts, inner: Arc<dyn Endpoint>) -> Result<Arc<dyn Endpoint>, ParseError>;
}

/// A registry of pluggable transport/filter factories keyed by grammar name.
///
/// Empty by construction — callers register exactly the transports and
/// filters their binary ships (the framework leaves `mux`, `ssl`, etc.
/// as external collaborators; this workspace's binary wires up the concrete
/// ones it builds).
#[derive(Default)]
pub struct Registry {
    transports: HashMap<String, Box<dyn TransportFactory>>,
    filters: HashMap<String, Box<dyn FilterFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transport(&mut self, name: impl Into<String>, factory: Box<dyn TransportFactory>) {
        self.transports.insert(name.into(), factory);
    }

    pub fn register_filter(&mut self, name: impl Into<String>, factory: Box<dyn FilterFactory>) {
        self.filters.insert(name.into(), factory);
    }

    /// Builds the endpoint stack described by `parsed`, right-to-left.
    pub fn build(&self, parsed: &ParsedEndpoint) -> Result<Arc<dyn Endpoint>, ParseError> {
        let keyword = parsed.transport.keyword();
        let transport_factory = self
            .transports
            .get(keyword)
            .ok_or_else(|| ParseError::UnknownTransport(keyword.to_string()))?;
        let mut endpoint = transport_factory.create(&parsed.transport)?;

        for filter in parsed.filters.iter().rev() {
            let factory = self
                .filters
                .get(filter.name.as_str())
                .ok_or_else(|| ParseError::UnknownFilter(filter.name.clone()))?;
            endpoint = factory.create(&filter.opts, endpoint)?;
        }
        Ok(endpoint)
    }
}

/// Parses `input` and builds the endpoint stack in one call.
pub fn parse_and_build(input: &str, registry: &Registry) -> Result<Arc<dyn Endpoint>, ParseError> {
    let parsed = crate::grammar::parse_endpoint_string(input)?;
    registry.build(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_core::{ControlDepth, ControlOp, ControlOption, ControlOptionId, EventSink, OpenState};

    struct StubEndpoint {
        tag: &'static str,
        inner: Option<Arc<dyn Endpoint>>,
    }

    #[async_trait::async_trait]
    impl Endpoint for StubEndpoint {
        fn endpoint_type(&self) -> &'static str {
            self.tag
        }
        fn state(&self) -> OpenState {
            OpenState::Closed
        }
        fn set_event_sink(&self, _sink: Arc<dyn EventSink>) {}
        async fn open(self: Arc<Self>) -> spark_core::Result<()> {
            Ok(())
        }
        async fn close(self: Arc<Self>) -> spark_core::Result<()> {
            Ok(())
        }
        async fn write(&self, _buf: &[u8], _aux: &[&str]) -> spark_core::Result<usize> {
            Ok(0)
        }
        fn set_read_callback_enable(&self, _enable: bool) {}
        fn set_write_callback_enable(&self, _enable: bool) {}
        async fn control(
            &self,
            _depth: ControlDepth,
            _op: ControlOp,
            _option: ControlOptionId,
            _value: ControlOption,
        ) -> spark_core::Result<ControlOption> {
            Err(spark_core::SparkError::NotSup("stub"))
        }
        fn get_child(&self, _depth: u32) -> Option<Arc<dyn Endpoint>> {
            self.inner.clone()
        }
        fn raddr_to_str(&self, _depth: u32) -> Option<String> {
            None
        }
    }

    struct StubTransport;
    impl TransportFactory for StubTransport {
        fn create(&self, _spec: &TransportSpec) -> Result<Arc<dyn Endpoint>, ParseError> {
            Ok(Arc::new(StubEndpoint {
                tag: "tcp",
                inner: None,
            }))
        }
    }

    struct StubFilter(&'static str);
    impl FilterFactory for StubFilter {
        fn create(
            &self,
            _opts: &FilterOpts,
            inner: Arc<dyn Endpoint>,
        ) -> Result<Arc<dyn Endpoint>, ParseError> {
            Ok(Arc::new(StubEndpoint {
                tag: self.0,
                inner: Some(inner),
            }))
        }
    }

    fn order_trace(mut endpoint: Arc<dyn Endpoint>) -> Vec<&'static str> {
        let mut trace = Vec::new();
        loop {
            trace.push(endpoint.endpoint_type());
            match endpoint.get_child(0) {
                Some(child) => endpoint = child,
                None => break,
            }
        }
        trace
    }

    #[test]
    fn builds_right_to_left_with_outermost_filter_first() {
        let mut registry = Registry::new();
        registry.register_transport("tcp", Box::new(StubTransport));
        registry.register_filter("telnet", Box::new(StubFilter("telnet")));
        registry.register_filter("ssl", Box::new(StubFilter("ssl")));

        let endpoint = parse_and_build("telnet,ssl,tcp,example.com,852", &registry).unwrap();
        // telnet is leftmost/outermost: it was applied last, wrapping ssl,
        // which wraps tcp.
        assert_eq!(order_trace(endpoint), vec!["telnet", "ssl", "tcp"]);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let mut registry = Registry::new();
        registry.register_transport("tcp", Box::new(StubTransport));
        let err = parse_and_build("bogus,tcp,example.com,852", &registry).unwrap_err();
        assert!(matches!(err, ParseError::UnknownFilter(name) if name == "bogus"));
    }

    #[test]
    fn unsupported_transport_is_rejected() {
        let registry = Registry::new();
        let err = parse_and_build("unix,/tmp/x.sock", &registry).unwrap_err();
        assert!(matches!(err, ParseError::UnknownTransport(name) if name == "unix"));
    }
}
