//! Formatted output helpers for CLI commands.
//!
//! Provides human-readable sizes, argument vectors and section rules.

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a command in exec form, e.g. `["java", "-jar", "app.jar"]`.
/// An empty command prints as `-`.
#[must_use]
pub fn format_argv(argv: &[String]) -> String {
    if argv.is_empty() {
        return "-".to_string();
    }
    serde_json::to_string(argv).unwrap_or_else(|_| argv.join(" "))
}

/// A horizontal rule of `width` box-drawing characters.
#[must_use]
pub fn rule(width: usize) -> String {
    "\u{2550}".repeat(width)
}
