// Input hardening: trusted-IP checks, suspicious-content heuristics, HTML
// sanitization, and the fixed security-header map.

use once_cell::sync::Lazy;
use regex::Regex;

static SUSPICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<script\b",
        r"(?i)javascript\s*:",
        r"(?i)\bon\w+\s*=",
        r"(?i)\bunion\s+select\b",
        r"(?i)\bdrop\s+table\b",
        r"(?i)\binsert\s+into\b",
        r"(?i)\bdelete\s+from\b",
        r"(?i)--\s*$",
        r"(?i)\bor\s+1\s*=\s*1\b",
        r"\.\./",
        r"(?i)%3cscript",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Heuristic scan for script/SQL/path-traversal fragments.
pub fn detect_suspicious_content(content: &str) -> bool {
    SUSPICIOUS_PATTERNS.iter().any(|re| re.is_match(content))
}

/// Escape HTML metacharacters for safe rendering.
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Exact entries match whole addresses; entries ending in `.` or `:` match as
/// prefixes (`10.` covers the whole 10.0.0.0/8 block).
pub fn is_trusted_ip(ip: &str, trusted: &[String]) -> bool {
    trusted.iter().any(|entry| {
        if entry.ends_with('.') || entry.ends_with(':') {
            ip.starts_with(entry.as_str())
        } else {
            ip == entry
        }
    })
}

/// Fixed header map attached to every response.
pub fn security_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("X-Content-Type-Options", "nosniff"),
        ("X-Frame-Options", "DENY"),
        ("X-XSS-Protection", "1; mode=block"),
        ("Referrer-Policy", "strict-origin-when-cross-origin"),
        (
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ),
        ("Content-Security-Policy", "default-src 'self'"),
        ("Cache-Control", "no-store"),
    ]
}
