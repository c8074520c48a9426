//! `spark-endpoint-parser` registration for `telnet(rfc2217)`.
use std::sync::Arc;

use spark_core::{Endpoint, FilterOpts};
use spark_endpoint_parser::{FilterFactory, ParseError};

use crate::endpoint::TelnetEndpoint;

/// Grammar: `telnet(rfc2217)`. The `rfc2217` flag decides
/// whether this filter actively negotiates `COM-PORT-OPTION`; without it,
/// the filter still performs IAC byte-stuffing (so the stream it wraps
/// stays a well-formed telnet stream) but never sends negotiation or
/// subnegotiation frames of its own.
pub struct TelnetFilterFactory;

impl FilterFactory for TelnetFilterFactory {
    fn create(&self, opts: &FilterOpts, inner: Arc<dyn Endpoint>) -> Result<Arc<dyn Endpoint>, ParseError> {
        let rfc2217 = opts.flag("rfc2217");
        Ok(TelnetEndpoint::new(inner, rfc2217) as Arc<dyn Endpoint>)
    }
}
