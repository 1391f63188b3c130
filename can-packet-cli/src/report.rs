//! End-of-run summaries

use can_packet_decoder::{PacketStats, TraceStats};
use std::fmt::Write;
use std::path::Path;

/// Summary of stage 1
pub fn trace_summary(stats: &TraceStats, output: &Path) -> String {
    let r = &stats.reassembly;
    let mut out = String::new();
    let _ = writeln!(out, "Trace decoded -> {}", output.display());
    let _ = writeln!(out, "  Frames:           {}", r.frames);
    let _ = writeln!(out, "  Messages:         {}", r.messages);
    if r.truncated > 0 {
        let _ = writeln!(out, "  Truncated:        {}", r.truncated);
    }
    if r.sequence_gaps > 0 {
        let _ = writeln!(out, "  Sequence gaps:    {}", r.sequence_gaps);
    }
    let skipped = stats.malformed_lines + r.malformed_frames + r.orphaned_segments;
    if skipped > 0 {
        let _ = writeln!(
            out,
            "  Skipped:          {} ({} malformed line(s), {} malformed frame(s), {} orphaned segment(s))",
            skipped, stats.malformed_lines, r.malformed_frames, r.orphaned_segments
        );
    }
    if stats.filtered_frames > 0 {
        let _ = writeln!(out, "  Filtered frames:  {}", stats.filtered_frames);
    }
    out
}

/// Summary of stage 2
pub fn packet_summary(stats: &PacketStats, output: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Packets decoded -> {}", output.display());
    let _ = writeln!(out, "  Messages:         {}", stats.messages);
    let _ = writeln!(out, "  Decoded:          {}", stats.decoded);
    let _ = writeln!(out, "  Other IDs:        {}", stats.other_identifiers);

    let rejected = [
        ("length out of range", stats.length_out_of_range),
        ("truncated field", stats.truncated_fields),
        ("truncated message", stats.rejected_truncated),
        ("malformed line", stats.malformed_lines),
        ("invalid data", stats.invalid),
    ];
    for (reason, count) in rejected.iter().filter(|(_, count)| *count > 0) {
        let _ = writeln!(out, "  Rejected:         {} ({})", count, reason);
    }
    if stats.trailing_bytes > 0 {
        let _ = writeln!(out, "  Trailing bytes:   {}", stats.trailing_bytes);
    }
    out
}
