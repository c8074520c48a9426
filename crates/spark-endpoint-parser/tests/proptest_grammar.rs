//! Property-based coverage for the endpoint-string grammar: arbitrary valid
//! filter chains round-trip through formatting and parsing without panics
//! or misplaced filters.
use proptest::prelude::*;
use spark_endpoint_parser::{parse_endpoint_string, TransportSpec};

fn filter_name() -> impl Strategy<Value = &'static str> {
    prop_oneof!["telnet", "mux", "certauth", "ssl"]
}

proptest! {
    #[test]
    fn arbitrary_filter_chains_over_tcp_parse_in_written_order(
        names in prop::collection::vec(filter_name(), 0..5),
        host in "[a-z]{1,10}(\\.[a-z]{1,5}){0,2}",
        port in 1u16..=65535,
    ) {
        let chain: String = names
            .iter()
            .map(|n| format!("{n},"))
            .collect();
        let endpoint_str = format!("{chain}tcp,{host},{port}");

        let parsed = parse_endpoint_string(&endpoint_str).expect("well-formed chain must parse");
        prop_assert_eq!(parsed.filters.len(), names.len());
        for (parsed_filter, expected_name) in parsed.filters.iter().zip(names.iter()) {
            prop_assert_eq!(&parsed_filter.name, expected_name);
        }
        prop_assert_eq!(
            parsed.transport,
            TransportSpec::Tcp { host, port }
        );
    }

    #[test]
    fn trailing_garbage_after_tcp_transport_is_rejected(garbage in "[a-z]{1,8}") {
        let endpoint_str = format!("tcp,example.com,852,{garbage}");
        prop_assert!(parse_endpoint_string(&endpoint_str).is_err());
    }
}
