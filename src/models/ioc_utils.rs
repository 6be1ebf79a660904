// src/models/ioc_utils.rs

use crate::models::{Classification, IocType};
use std::net::Ipv4Addr;

/// Detect the IOC type from a raw value string.
///
/// Ordering matters: hash patterns are checked before domain so that a
/// 64-char hex string is never mistaken for a dotless domain.
pub fn detect_ioc_type(value: &str) -> Option<IocType> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(IocType::Sha256);
    }

    if trimmed.len() == 32 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(IocType::Md5);
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(IocType::Url);
    }

    if trimmed.contains('@') && trimmed.contains('.') {
        return Some(IocType::Email);
    }

    if trimmed.parse::<Ipv4Addr>().is_ok() {
        return Some(IocType::Ipv4);
    }

    if trimmed.contains('.')
        && !trimmed.contains(' ')
        && !trimmed.contains('/')
        && !trimmed.contains('@')
        && trimmed.chars().all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Some(IocType::Domain);
    }

    // Anything else is treated as a free-text subject keyword.
    Some(IocType::SubjectKeyword)
}

/// Normalize an IOC value based on its type, matching the case-folding
/// rules each provider expects its input in.
pub fn normalize_ioc(value: &str, ioc_type: &IocType) -> String {
    let trimmed = value.trim();

    match ioc_type {
        IocType::Domain => trimmed.to_lowercase(),
        IocType::Url => {
            if let Some(idx) = trimmed.find("://") {
                let (scheme, rest) = trimmed.split_at(idx + 3);
                if let Some(path_idx) = rest.find('/') {
                    let (host, path) = rest.split_at(path_idx);
                    format!("{}{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
                } else {
                    trimmed.to_lowercase()
                }
            } else {
                trimmed.to_lowercase()
            }
        }
        IocType::Email => trimmed.to_lowercase(),
        IocType::Ipv4 => trimmed.to_lowercase(),
        IocType::Sha256 | IocType::Md5 => trimmed.to_lowercase(),
        IocType::SubjectKeyword => trimmed.to_string(),
    }
}

/// Upgrade an IOC's stored classification toward a new one, never
/// downgrading back to `Unknown` and never demoting `Malicious`.
pub fn upgrade_classification(current: Classification, incoming: Classification) -> Classification {
    fn rank(c: Classification) -> u8 {
        match c {
            Classification::Unknown => 0,
            Classification::Benign => 1,
            Classification::Suspicious => 2,
            Classification::Malicious => 3,
        }
    }

    if rank(incoming) > rank(current) {
        incoming
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sha256_over_domain() {
        let hash = "a".repeat(64);
        assert_eq!(detect_ioc_type(&hash), Some(IocType::Sha256));
    }

    #[test]
    fn detects_md5() {
        let hash = "b".repeat(32);
        assert_eq!(detect_ioc_type(&hash), Some(IocType::Md5));
    }

    #[test]
    fn detects_url_and_domain() {
        assert_eq!(detect_ioc_type("https://evil.example/path"), Some(IocType::Url));
        assert_eq!(detect_ioc_type("evil.example"), Some(IocType::Domain));
    }

    #[test]
    fn detects_email_and_ip() {
        assert_eq!(detect_ioc_type("a@b.com"), Some(IocType::Email));
        assert_eq!(detect_ioc_type("203.0.113.4"), Some(IocType::Ipv4));
    }

    #[test]
    fn falls_back_to_subject_keyword() {
        assert_eq!(detect_ioc_type("urgent wire transfer"), Some(IocType::SubjectKeyword));
    }

    #[test]
    fn normalizes_domain_and_url_case() {
        assert_eq!(normalize_ioc("EVIL.example", &IocType::Domain), "evil.example");
        assert_eq!(
            normalize_ioc("HTTPS://EVIL.example/Path", &IocType::Url),
            "https://evil.example/Path"
        );
    }

    #[test]
    fn classification_upgrades_but_never_downgrades() {
        assert_eq!(
            upgrade_classification(Classification::Unknown, Classification::Malicious),
            Classification::Malicious
        );
        assert_eq!(
            upgrade_classification(Classification::Malicious, Classification::Benign),
            Classification::Malicious
        );
    }
}
