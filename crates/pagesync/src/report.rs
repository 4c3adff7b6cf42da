//! Human-readable session summaries.

use pagesync_sync::SyncReport;

/// Printed when a session recorded any error.
pub const NOT_SYNCED: &str = "Databases were not synced due to errors";

/// Format `n` with `,` between groups of three digits.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format a non-negative rate with two decimals and grouped thousands.
fn format_rate(rate: f64) -> String {
    let cents = (rate * 100.0).round() as u64;
    format!("{}.{:02}", group_thousands(cents / 100), cents % 100)
}

/// The transfer summary shown at `-v`.
///
/// The first line always reports traffic; the rate is added when any time
/// elapsed. The second line, with the database size and the speedup over
/// copying the whole file, appears only for a clean session.
pub fn summary_lines(report: &SyncReport) -> Vec<String> {
    let io = report.bytes_sent + report.bytes_received;
    let millis = report.elapsed.as_millis();

    let mut traffic = format!(
        "sent {} bytes, received {} bytes",
        group_thousands(report.bytes_sent),
        group_thousands(report.bytes_received)
    );
    if millis > 0 {
        let rate = 1000.0 * io as f64 / millis as f64;
        traffic.push_str(&format!(", {} bytes/sec", format_rate(rate)));
    }

    let mut lines = vec![traffic];
    if report.is_success() {
        let total = report.total_size();
        if io > 0 && io <= total {
            lines.push(format!(
                "total size {}  speedup is {:.2}",
                group_thousands(total),
                total as f64 / io as f64
            ));
        } else {
            lines.push(format!("total size {}", group_thousands(total)));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesync_core::PageSize;
    use pagesync_sync::Role;
    use std::time::Duration;

    fn report(sent: u64, received: u64, millis: u64, errors: u32) -> SyncReport {
        SyncReport {
            role: Role::Origin,
            protocol_version: 1,
            page_size: Some(PageSize::DEFAULT),
            page_count: 1000,
            bytes_sent: sent,
            bytes_received: received,
            hashes_sent: 0,
            pages_sent: 0,
            errors,
            write_errors: 0,
            messages: Vec::new(),
            elapsed: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(4_096_000), "4,096,000");
        assert_eq!(group_thousands(u64::MAX), "18,446,744,073,709,551,615");
    }

    #[test]
    fn test_summary_with_speedup() {
        let lines = summary_lines(&report(20_000, 1_000, 2000, 0));
        assert_eq!(
            lines,
            vec![
                "sent 20,000 bytes, received 1,000 bytes, 10,500.00 bytes/sec".to_string(),
                "total size 4,096,000  speedup is 195.05".to_string(),
            ]
        );
    }

    #[test]
    fn test_summary_without_elapsed_time() {
        let lines = summary_lines(&report(7, 0, 0, 0));
        assert_eq!(lines[0], "sent 7 bytes, received 0 bytes");
    }

    #[test]
    fn test_summary_traffic_exceeds_size() {
        let lines = summary_lines(&report(5_000_000, 0, 1000, 0));
        assert_eq!(lines[1], "total size 4,096,000");
    }

    #[test]
    fn test_summary_after_errors_omits_size() {
        let lines = summary_lines(&report(10, 10, 1000, 2));
        assert_eq!(lines.len(), 1);
    }
}
