//! `network.ssrf`: outbound URL checks.
//!
//! A URL-bearing param is blocked when its scheme is not http(s), it carries
//! credentials, its host is internal (loopback, private, link-local, cloud
//! metadata), or an allow-list is configured and the host is not on it.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde_json::{json, Map, Value};
use url::{Host, Url};

use super::ids;
use crate::validation::context::Context;
use crate::validation::decision::{Decision, RiskLevel};
use crate::validation::validator::{config_strings, Validator, ValidatorError};

pub const SSRF_CODE: &str = "FC_NET_SSRF";

const DEFAULT_URL_PARAMS: &[&str] = &[
    "url", "uri", "endpoint", "href", "link", "webhook", "callback",
];

const INTERNAL_HOSTNAMES: &[&str] = &["localhost", "metadata"];

const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SsrfReason {
    Scheme,
    Credentials,
    MissingHost,
    InternalHost,
    PrivateAddress,
    MetadataEndpoint,
    HostNotAllowed,
}

impl SsrfReason {
    fn as_str(self) -> &'static str {
        match self {
            SsrfReason::Scheme => "scheme",
            SsrfReason::Credentials => "credentials",
            SsrfReason::MissingHost => "missing_host",
            SsrfReason::InternalHost => "internal_host",
            SsrfReason::PrivateAddress => "private_address",
            SsrfReason::MetadataEndpoint => "metadata_endpoint",
            SsrfReason::HostNotAllowed => "host_not_allowed",
        }
    }

    fn risk(self) -> RiskLevel {
        match self {
            SsrfReason::MetadataEndpoint => RiskLevel::Critical,
            SsrfReason::HostNotAllowed | SsrfReason::Scheme => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

fn private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
}

fn private_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return private_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        match pattern.strip_prefix("*.") {
            Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
            None => host == pattern,
        }
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfValidator;

impl SsrfValidator {
    fn classify(
        &self,
        url: &Url,
        allowed_hosts: &[String],
        allow_private: bool,
    ) -> Option<SsrfReason> {
        if !matches!(url.scheme(), "http" | "https") {
            return Some(SsrfReason::Scheme);
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Some(SsrfReason::Credentials);
        }
        let host = match url.host() {
            None => return Some(SsrfReason::MissingHost),
            Some(host) => host,
        };

        let ip = match &host {
            Host::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Host::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Host::Domain(_) => None,
        };
        if ip == Some(IpAddr::V4(METADATA_V4)) {
            return Some(SsrfReason::MetadataEndpoint);
        }

        let name = host.to_string().to_lowercase();
        if let Host::Domain(domain) = &host {
            let domain = domain.trim_end_matches('.').to_lowercase();
            if domain == "metadata.google.internal" {
                return Some(SsrfReason::MetadataEndpoint);
            }
            let internal = INTERNAL_HOSTNAMES.contains(&domain.as_str())
                || domain.ends_with(".localhost")
                || domain.ends_with(".internal");
            if internal && !allow_private {
                return Some(SsrfReason::InternalHost);
            }
        }

        let private = match ip {
            Some(IpAddr::V4(v4)) => private_v4(v4),
            Some(IpAddr::V6(v6)) => private_v6(v6),
            None => false,
        };
        if private && !allow_private {
            return Some(SsrfReason::PrivateAddress);
        }

        let bare = name.trim_matches(|c| c == '[' || c == ']');
        if !allowed_hosts.is_empty() && !host_allowed(bare, allowed_hosts) {
            return Some(SsrfReason::HostNotAllowed);
        }
        None
    }
}

impl Validator for SsrfValidator {
    fn id(&self) -> &str {
        ids::SSRF
    }

    fn domain(&self) -> &str {
        "network"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url_params": {"type": "array", "items": {"type": "string"}},
                "allowed_hosts": {"type": "array", "items": {"type": "string"}},
                "allow_private": {"type": "boolean"}
            }
        })
    }

    fn evaluate(
        &self,
        context: &Context,
        config: &Map<String, Value>,
    ) -> Result<Vec<Decision>, ValidatorError> {
        let url_params = config_strings(self.id(), config, "url_params", DEFAULT_URL_PARAMS)?;
        let allowed_hosts = config_strings(self.id(), config, "allowed_hosts", &[])?;
        let allow_private = config
            .get("allow_private")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut decisions = Vec::new();
        for (key, value) in &context.params {
            let Some(raw) = value.as_str() else { continue };
            let lowered = key.to_lowercase();
            let named = url_params
                .iter()
                .any(|n| lowered == *n || lowered.ends_with(&format!("_{n}")));
            if !named && !raw.contains("://") {
                continue;
            }
            // Not a URL at all (e.g. a bare hostname): nothing to judge.
            let Ok(url) = Url::parse(raw.trim()) else {
                continue;
            };
            let Some(reason) = self.classify(&url, &allowed_hosts, allow_private) else {
                continue;
            };
            decisions.push(
                Decision::block(
                    ids::SSRF,
                    SSRF_CODE,
                    format!("parameter '{key}' targets a disallowed URL ({})", reason.as_str()),
                    reason.risk(),
                )
                .with_rule_id(format!("NET_SSRF_{}", reason.as_str().to_uppercase()))
                .with_evidence("param", key.as_str())
                .with_evidence("url", raw)
                .with_evidence("host", url.host_str().unwrap_or_default())
                .with_evidence("reason", reason.as_str())
                .with_remediation(
                    "call only public http(s) endpoints, or add the host to allowed_hosts",
                ),
            );
        }
        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(params: Value, config: Value) -> Vec<Decision> {
        let ctx = Context::new("http_get", params.as_object().cloned().unwrap(), "s1");
        SsrfValidator
            .evaluate(&ctx, config.as_object().unwrap())
            .unwrap()
    }

    fn reason(decisions: &[Decision]) -> &str {
        decisions[0].evidence()["reason"].as_str().unwrap()
    }

    #[test]
    fn test_public_url_allowed() {
        assert!(run(json!({"url": "https://example.com/a?b=1"}), json!({})).is_empty());
    }

    #[test]
    fn test_internal_targets_blocked() {
        for (url, expected) in [
            ("http://127.0.0.1:8080/admin", "private_address"),
            ("http://2130706433/", "private_address"),
            ("http://10.1.2.3/", "private_address"),
            ("http://[::1]/", "private_address"),
            ("http://localhost/", "internal_host"),
            ("http://169.254.169.254/latest/meta-data", "metadata_endpoint"),
            ("http://metadata.google.internal/", "metadata_endpoint"),
            ("file:///etc/passwd", "scheme"),
            ("http://user:pw@example.com/", "credentials"),
        ] {
            let out = run(json!({ "url": url }), json!({}));
            assert_eq!(out.len(), 1, "{url}");
            assert_eq!(out[0].code(), SSRF_CODE);
            assert!(out[0].is_block());
            assert_eq!(reason(&out), expected, "{url}");
        }
    }

    #[test]
    fn test_allow_list_and_wildcards() {
        let config = json!({"allowed_hosts": ["api.example.com", "*.trusted.io"]});
        assert!(run(json!({"url": "https://api.example.com/v1"}), config.clone()).is_empty());
        assert!(run(json!({"url": "https://x.trusted.io/"}), config.clone()).is_empty());
        let out = run(json!({"url": "https://evil.com/"}), config);
        assert_eq!(reason(&out), "host_not_allowed");
    }

    #[test]
    fn test_allow_private_opt_in() {
        let out = run(json!({"url": "http://10.0.0.5/"}), json!({"allow_private": true}));
        assert!(out.is_empty());
        let meta = run(json!({"url": "http://169.254.169.254/"}), json!({"allow_private": true}));
        assert_eq!(reason(&meta), "metadata_endpoint");
    }

    #[test]
    fn test_unnamed_param_with_scheme_is_checked() {
        let out = run(json!({"body": "http://127.0.0.1/"}), json!({}));
        assert_eq!(out.len(), 1);
        assert!(run(json!({"host": "example.com"}), json!({})).is_empty());
    }
}
