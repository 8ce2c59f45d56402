use std::time::Duration;

/// `2h15m`, `1m30s`, `45s`; zero components are dropped, sub-second is `0s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(999), "0s")]
    #[case(Duration::from_secs(45), "45s")]
    #[case(Duration::from_secs(90), "1m30s")]
    #[case(Duration::from_secs(3600), "1h")]
    #[case(Duration::from_secs(2 * 3600 + 15 * 60), "2h15m")]
    #[case(Duration::from_secs(3601), "1h1s")]
    fn formats(#[case] input: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(input), expected);
    }
}
