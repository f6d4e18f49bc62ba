//! Statistics display and formatting

use imgxfer::{ConnectionState, StatsSnapshot};
use std::io::Write;
use std::time::Duration;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bandwidth in human-readable form
pub fn format_bandwidth(bps: u64) -> String {
    const KBPS: u64 = 1000;
    const MBPS: u64 = KBPS * 1000;
    const GBPS: u64 = MBPS * 1000;

    if bps >= GBPS {
        format!("{:.2} Gbps", bps as f64 / GBPS as f64)
    } else if bps >= MBPS {
        format!("{:.2} Mbps", bps as f64 / MBPS as f64)
    } else if bps >= KBPS {
        format!("{:.2} Kbps", bps as f64 / KBPS as f64)
    } else {
        format!("{} bps", bps)
    }
}

/// Format duration in human-readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// One-line summary of a snapshot
pub fn format_stats_line(stats: &StatsSnapshot, state: ConnectionState) -> String {
    let c = &stats.counters;
    let bits_per_sec = (stats.throughput_bps() * 8.0) as u64;

    format!(
        "[{:>8}] {} | tx {} pkts / {} frames | rx {} pkts / {} frames | lost {} rexmit {} | {:.1} fps | {}",
        format_duration(stats.elapsed),
        state,
        c.packets_sent,
        c.frames_sent,
        c.packets_received,
        c.frames_completed,
        c.packets_lost,
        c.packets_retransmitted,
        stats.fps,
        format_bandwidth(bits_per_sec),
    )
}

/// Display compact stats on one line (for continuous updates)
pub fn display_compact_stats(stats: &StatsSnapshot, state: ConnectionState) {
    print!("\r{}        ", format_stats_line(stats, state));
    let _ = std::io::stdout().flush();
}

/// Display a final summary
pub fn display_summary(stats: &StatsSnapshot) {
    let c = &stats.counters;
    let r = &stats.reassembly;

    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ TRANSFER SUMMARY                                            │");
    println!("├─────────────────────────────────────────────────────────────┤");
    println!("│ Duration:  {}", format_duration(stats.elapsed));
    println!(
        "│ Sent:      {} packets, {} frames, {}",
        c.packets_sent,
        c.frames_sent,
        format_bytes(c.bytes_sent)
    );
    println!(
        "│ Received:  {} packets, {} frames, {}",
        c.packets_received,
        c.frames_completed,
        format_bytes(c.bytes_received)
    );
    println!(
        "│ Loss:      {} NACKed ({:.2}%), {} retransmitted",
        c.packets_lost,
        c.loss_rate() * 100.0,
        c.packets_retransmitted
    );
    println!(
        "│ Frames:    {} decoded, {} dropped, {} superseded, {} expired",
        c.frames_decoded, c.frames_dropped, r.frames_superseded, r.frames_expired
    );
    println!(
        "│ Errors:    {} checksum, {} malformed, {} decode",
        c.checksum_failures, c.malformed_packets, c.decode_failures
    );
    println!("└─────────────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgxfer::protocol::ReassemblyStats;
    use imgxfer::TransferStats;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MB");
    }

    #[test]
    fn test_format_bandwidth() {
        assert_eq!(format_bandwidth(500), "500 bps");
        assert_eq!(format_bandwidth(10_000), "10.00 Kbps");
        assert_eq!(format_bandwidth(10_000_000), "10.00 Mbps");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_stats_line() {
        let snapshot = StatsSnapshot {
            counters: TransferStats {
                packets_sent: 12,
                frames_sent: 3,
                packets_lost: 1,
                bytes_sent: 1000,
                ..Default::default()
            },
            reassembly: ReassemblyStats::default(),
            fps: 14.5,
            elapsed: Duration::from_secs(1),
        };

        let line = format_stats_line(&snapshot, ConnectionState::HostRunning);
        assert!(line.contains("host-running"));
        assert!(line.contains("tx 12 pkts / 3 frames"));
        assert!(line.contains("lost 1"));
        assert!(line.contains("14.5 fps"));
        assert!(line.contains("8.00 Kbps"));
    }
}
