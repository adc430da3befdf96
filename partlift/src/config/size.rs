//! Human-readable byte sizes ("8MiB", "500K", "1048576").

const UNITS: &[(&str, u64)] = &[
    ("gib", 1024 * 1024 * 1024),
    ("gb", 1000 * 1000 * 1000),
    ("g", 1024 * 1024 * 1024),
    ("mib", 1024 * 1024),
    ("mb", 1000 * 1000),
    ("m", 1024 * 1024),
    ("kib", 1024),
    ("kb", 1000),
    ("k", 1024),
    ("b", 1),
];

/// Parse a byte count with an optional unit suffix.
///
/// Single-letter suffixes are binary (`8M` is 8 MiB).
pub fn parse_size(input: &str) -> Option<u64> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    for (suffix, multiplier) in UNITS {
        if let Some(number) = s.strip_suffix(suffix) {
            let number = number.trim();
            if number.is_empty() {
                return None;
            }
            return number.parse::<u64>().ok()?.checked_mul(*multiplier);
        }
    }

    s.parse().ok()
}

/// Format a byte count using the largest binary unit that divides it.
pub fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    match bytes {
        0 => "0".to_string(),
        b if b % GIB == 0 => format!("{}GiB", b / GIB),
        b if b % MIB == 0 => format!("{}MiB", b / MIB),
        b if b % KIB == 0 => format!("{}KiB", b / KIB),
        b => b.to_string(),
    }
}
