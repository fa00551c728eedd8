//! Connection string parsing and resolution tests

use couchbase_rest::{Address, ConnectionString, RestError, Scheme};
use pretty_assertions::assert_eq;

fn address(host: &str, port: u16) -> Address {
    Address {
        host: host.to_string(),
        port,
    }
}

#[test]
fn parse_single_host() {
    let parsed = ConnectionString::parse("10.0.0.1").unwrap();

    assert_eq!(parsed.scheme, Scheme::Unset);
    assert_eq!(parsed.addresses, vec![address("10.0.0.1", 0)]);
    assert!(parsed.params.is_empty());
}

#[test]
fn parse_multi_host_with_params() {
    let parsed =
        ConnectionString::parse("couchbases://[2001:db8::1]:18091,host2?network=external").unwrap();

    assert_eq!(parsed.scheme, Scheme::Couchbases);
    assert_eq!(
        parsed.addresses,
        vec![address("[2001:db8::1]", 18091), address("host2", 0)]
    );
    assert_eq!(
        parsed.params.get("network"),
        Some(&vec!["external".to_string()])
    );
}

#[test]
fn parse_repeated_params_keep_order() {
    let parsed = ConnectionString::parse("http://host?opt=a&opt=b&other=c").unwrap();

    assert_eq!(
        parsed.params.get("opt"),
        Some(&vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(parsed.params.get("other"), Some(&vec!["c".to_string()]));
}

#[test]
fn parse_rejects_unknown_schemes() {
    let err = ConnectionString::parse("ftp://host").unwrap_err();
    assert!(matches!(err, RestError::BadScheme(scheme) if scheme == "ftp"));
}

#[test]
fn parse_rejects_out_of_range_ports() {
    let err = ConnectionString::parse("host:65536").unwrap_err();
    assert!(matches!(err, RestError::BadPort(port) if port == "65536"));

    let err = ConnectionString::parse("host:not-a-port").unwrap_err();
    assert!(matches!(err, RestError::BadPort(_)));
}

#[test]
fn parse_rejects_empty_input() {
    assert!(matches!(
        ConnectionString::parse("").unwrap_err(),
        RestError::NoAddressesParsed
    ));
    assert!(matches!(
        ConnectionString::parse("http://").unwrap_err(),
        RestError::NoAddressesParsed
    ));
    assert!(matches!(
        ConnectionString::parse("?network=external").unwrap_err(),
        RestError::NoAddressesParsed
    ));
}

#[test]
fn parse_rejects_malformed_hosts() {
    assert!(matches!(
        ConnectionString::parse("host1,,host2").unwrap_err(),
        RestError::InvalidConnectionString(_)
    ));
    assert!(matches!(
        ConnectionString::parse("[2001:db8::1").unwrap_err(),
        RestError::InvalidConnectionString(_)
    ));
    assert!(matches!(
        ConnectionString::parse("2001:db8::1").unwrap_err(),
        RestError::InvalidConnectionString(_)
    ));
}

#[test]
fn canonical_strings_round_trip() {
    let canonical = "couchbases://[2001:db8::1]:18091,host2?network=external&timeout=75";

    let parsed = ConnectionString::parse(canonical).unwrap();
    assert_eq!(parsed.to_string(), canonical);
    assert_eq!(ConnectionString::parse(&parsed.to_string()).unwrap(), parsed);
}

#[tokio::test]
async fn resolve_fills_plain_default_port() {
    let resolved = ConnectionString::parse("host1,host2:12000")
        .unwrap()
        .resolve()
        .await
        .unwrap();

    assert!(!resolved.use_tls);
    assert_eq!(
        resolved.addresses,
        vec![address("host1", 8091), address("host2", 12000)]
    );
}

#[tokio::test]
async fn resolve_fills_tls_default_port() {
    let resolved = ConnectionString::parse("couchbases://host")
        .unwrap()
        .resolve()
        .await
        .unwrap();

    assert!(resolved.use_tls);
    assert_eq!(resolved.addresses, vec![address("host", 18091)]);
}

#[tokio::test]
async fn resolve_keeps_explicit_ports() {
    let resolved = ConnectionString::parse("https://host:9443")
        .unwrap()
        .resolve()
        .await
        .unwrap();

    assert!(resolved.use_tls);
    assert_eq!(resolved.addresses, vec![address("host", 9443)]);
}

#[tokio::test]
async fn resolve_every_address_has_a_port() {
    let resolved = ConnectionString::parse("couchbase://a,b:1,c?x=y")
        .unwrap()
        .resolve()
        .await
        .unwrap();

    assert!(resolved.addresses.iter().all(|address| address.port > 0));
    assert_eq!(resolved.params.get("x"), Some(&vec!["y".to_string()]));
}
