//! Whitelist → front-domain rule set.
//!
//! Keys are `host:port` patterns. The host part is `*` (any host), `*.suffix`
//! (any host under `suffix`) or an exact name; the port part is `*` or an
//! exact port. Values are the front domains to dial instead of the target,
//! optionally with their own `:port`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Wildcard used for either half of a rule.
pub const WILDCARD: &str = "*";

/// Whitelist used when only a frontend list is supplied.
pub const WILDCARD_WHITELIST: &str = "*:*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct InjectionRuleSet {
    rules: BTreeMap<String, Vec<String>>,
}

impl InjectionRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A rule set with exactly one whitelist entry.
    pub fn single<K, I, S>(whitelist: K, frontends: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rules = BTreeMap::new();
        rules.insert(whitelist.into(), frontends.into_iter().map(Into::into).collect());
        Self { rules }
    }

    pub fn insert(&mut self, whitelist: impl Into<String>, frontends: Vec<String>) {
        self.rules.insert(whitelist.into(), frontends);
    }

    pub fn get(&self, whitelist: &str) -> Option<&[String]> {
        self.rules.get(whitelist).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Front domains for a CONNECT target.
    ///
    /// An exact key wins over suffix patterns, which win over `*`.
    pub fn lookup(&self, host: &str, port: u16) -> Option<&[String]> {
        let mut best: Option<(u8, &[String])> = None;
        for (key, fronts) in &self.rules {
            let Some(rank) = match_key(key, host, port) else {
                continue;
            };
            if best.map_or(true, |(r, _)| rank > r) {
                best = Some((rank, fronts.as_slice()));
            }
        }
        best.map(|(_, fronts)| fronts)
    }
}

/// Match rank of `key` against a target, higher is more specific.
fn match_key(key: &str, host: &str, port: u16) -> Option<u8> {
    let (key_host, key_port) = key.rsplit_once(':').unwrap_or((key, WILDCARD));

    let port_rank = if key_port == WILDCARD {
        0
    } else if key_port.parse::<u16>().ok()? == port {
        1
    } else {
        return None;
    };

    let host = host.trim_end_matches('.');
    let host_rank = if key_host == WILDCARD {
        0
    } else if let Some(suffix) = key_host.strip_prefix("*.") {
        let split = host.len().checked_sub(suffix.len() + 1);
        let matches = split.is_some_and(|at| {
            host.as_bytes()[at] == b'.'
                && host.get(at + 1..).is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
        });
        if !matches {
            return None;
        }
        2
    } else if key_host.eq_ignore_ascii_case(host) {
        4
    } else {
        return None;
    };

    Some(host_rank + port_rank)
}

/// Split a `host[:port]` front into its parts; `default_port` fills a bare host.
pub fn split_host_port(front: &str, default_port: u16) -> (String, u16) {
    if let Some(stripped) = front.strip_prefix('[') {
        if let Some((host, rest)) = stripped.split_once(']') {
            let port = rest
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match front.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (front.to_string(), default_port),
        },
        _ => (front.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_matches_host_and_port() {
        let rules = InjectionRuleSet::single("akamai.net:80", ["video.iflix.com"]);
        assert_eq!(rules.lookup("akamai.net", 80), Some(&["video.iflix.com".to_string()][..]));
        assert_eq!(rules.lookup("AKAMAI.NET", 80).map(<[String]>::len), Some(1));
        assert!(rules.lookup("akamai.net", 443).is_none());
        assert!(rules.lookup("a248.e.akamai.net", 80).is_none());
    }

    #[test]
    fn wildcard_whitelist_matches_everything() {
        let rules = InjectionRuleSet::single(WILDCARD_WHITELIST, ["bug.com"]);
        assert!(rules.lookup("example.org", 443).is_some());
        assert!(rules.lookup("10.0.0.1", 1).is_some());
    }

    #[test]
    fn suffix_pattern_requires_label_boundary() {
        let rules = InjectionRuleSet::single("*.akamai.net:*", ["front.example"]);
        assert!(rules.lookup("a248.e.akamai.net", 443).is_some());
        assert!(rules.lookup("notakamai.net", 443).is_none());
        assert!(rules.lookup("akamai.net", 443).is_none());
    }

    #[test]
    fn most_specific_rule_wins() {
        let mut rules = InjectionRuleSet::single("*:*", ["any.example"]);
        rules.insert("*.cdn.net:443", vec!["suffix.example".into()]);
        rules.insert("img.cdn.net:443", vec!["exact.example".into()]);

        assert_eq!(rules.lookup("img.cdn.net", 443).unwrap()[0], "exact.example");
        assert_eq!(rules.lookup("js.cdn.net", 443).unwrap()[0], "suffix.example");
        assert_eq!(rules.lookup("js.cdn.net", 80).unwrap()[0], "any.example");
    }

    #[test]
    fn front_without_port_inherits_target_port() {
        assert_eq!(split_host_port("bug.com", 80), ("bug.com".to_string(), 80));
        assert_eq!(split_host_port("bug.com:443", 80), ("bug.com".to_string(), 443));
        assert_eq!(split_host_port("[::1]:8443", 80), ("::1".to_string(), 8443));
        assert_eq!(split_host_port("[::1]", 80), ("::1".to_string(), 80));
    }

    #[test]
    fn serializes_as_plain_map() {
        let rules = InjectionRuleSet::single("akamai.net:80", ["a.com", "b.com"]);
        let json = serde_json::to_string(&rules).unwrap();
        assert_eq!(json, r#"{"akamai.net:80":["a.com","b.com"]}"#);
    }
}
