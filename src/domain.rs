//! Site key normalization for rollups
//!
//! Squid records the full request target: `http://www.host.tld/path` for plain
//! requests and `host.tld:443` for CONNECT tunnels. Rollups group by the registrable
//! part of the host so that `www.a.example.com` and `cdn.example.com` land in the
//! same bucket.

use std::sync::LazyLock;

use regex::Regex;

/// Host with at least one dot label, an alphabetic last label and an optional port.
const HOST_PATTERN: &str = r"(?i)^(www\.)?[a-z0-9]+([\-.][a-z0-9]+)*\.[a-z]{2,5}(:[0-9]{1,5})?";

static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(HOST_PATTERN).expect("invalid host pattern"));

/// Returns the rollup key for a logged site.
///
/// Hosts matching the pattern are cut to their last two labels, lower-cased and
/// stripped of the port. Anything else (bare names, IP addresses) is returned as the
/// first path segment unchanged.
pub fn normalize_site(site: &str) -> String {
    let target = strip_scheme(site);
    let segment = target.split('/').next().unwrap_or(target);

    if !HOST_RE.is_match(segment) {
        return segment.to_string();
    }

    let host = strip_port(segment);
    let mut labels = host.rsplitn(3, '.');
    let tld = labels.next().unwrap_or_default();
    match labels.next() {
        Some(name) => format!("{}.{}", name, tld).to_ascii_lowercase(),
        None => host.to_ascii_lowercase(),
    }
}

fn strip_scheme(site: &str) -> &str {
    if let Some((scheme, rest)) = site.split_once("://") {
        let is_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            return rest;
        }
    }
    site
}

fn strip_port(segment: &str) -> &str {
    match segment.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => segment,
    }
}
