// Text reports of a flattened hierarchy

use colored::Colorize;
use std::collections::BTreeMap;

use crate::flatten::FlatRecord;

/// Render records as an indented tree followed by a per-depth summary.
///
/// Records are expected in flatten order; indentation comes from `depth`.
pub fn generate_tree_report(records: &[FlatRecord]) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    for record in records {
        let indent = "  ".repeat(record.depth);
        let name = if record.depth == 0 {
            record.display_name.bold().to_string()
        } else {
            record.display_name.clone()
        };
        report.push_str(&format!(
            "{}{} {}\n",
            indent,
            name,
            record.id.bright_black()
        ));
    }

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Folders discovered: {}\n", records.len()));

    let mut by_depth: BTreeMap<usize, usize> = BTreeMap::new();
    for record in records {
        *by_depth.entry(record.depth).or_default() += 1;
    }
    for (depth, count) in by_depth {
        report.push_str(&format!("  Depth {}: {}\n", depth, count));
    }

    report
}
