//! Name checks for the identifiers the pipeline hands to AWS, Docker and Kubernetes.

/// RFC 1123 label: lowercase alphanumerics and '-', 1..=63 chars, alphanumeric at both ends.
pub fn is_valid_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 { return false; }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

/// DNS hostname as published by a load balancer, e.g.
/// `k8s-default-flaskapp-0123456789-1234567890.us-west-2.elb.amazonaws.com`.
/// Requires at least two labels; label case is not significant.
pub fn is_valid_hostname(s: &str) -> bool {
    let s = s.strip_suffix('.').unwrap_or(s);
    if s.is_empty() || s.len() > 253 { return false; }
    let labels: Vec<&str> = s.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| is_valid_dns_label(&l.to_ascii_lowercase()))
}

/// Docker tag grammar: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
pub fn is_valid_image_tag(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 128 { return false; }
    (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
        && bytes.iter().all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert!(is_valid_dns_label("default"));
        assert!(is_valid_dns_label("team-a1"));
        assert!(!is_valid_dns_label("-lead"));
        assert!(!is_valid_dns_label("trail-"));
        assert!(!is_valid_dns_label("Upper"));
        assert!(!is_valid_dns_label(""));
        assert!(!is_valid_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn hostnames() {
        assert!(is_valid_hostname("k8s-default-flaskapp-abc123-456.us-west-2.elb.amazonaws.com"));
        assert!(is_valid_hostname("Example.COM."));
        assert!(!is_valid_hostname("localhost"));
        assert!(!is_valid_hostname("bad..host.com"));
        assert!(!is_valid_hostname("under_score.example.com"));
        assert!(!is_valid_hostname(""));
    }

    #[test]
    fn tags() {
        assert!(is_valid_image_tag("latest"));
        assert!(is_valid_image_tag("20240101.3"));
        assert!(is_valid_image_tag("_x"));
        assert!(!is_valid_image_tag(".hidden"));
        assert!(!is_valid_image_tag("-dash"));
        assert!(!is_valid_image_tag("has space"));
        assert!(!is_valid_image_tag(&"a".repeat(129)));
    }
}
