//! util — small shared helpers.

/// Current Unix time in seconds, truncated to u32 (saturating).
#[inline]
pub fn now_secs() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs()).min(u32::MAX as u64) as u32
}

/// Best-effort hostname: HOSTNAME env var, then /etc/hostname, then "localhost".
pub fn hostname() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        let h = h.trim().to_string();
        if !h.is_empty() {
            return h;
        }
    }
    if let Ok(h) = std::fs::read_to_string("/etc/hostname") {
        let h = h.trim().to_string();
        if !h.is_empty() {
            return h;
        }
    }
    "localhost".to_string()
}

/// Current OS user, for the default authenticate answer.
pub fn os_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_secs_monotonic_nonzero() {
        let a = now_secs();
        let b = now_secs();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn hostname_never_empty() {
        assert!(!hostname().is_empty());
    }
}
