//! Process identity helpers

use tracing::debug;

/// Key that tells apart two processes that reused the same pid.
///
/// On Linux this is the process start time in clock ticks since boot (field 22
/// of `/proc/self/stat`). Returns 0 when it cannot be determined.
pub fn process_disambiguation_key() -> u64 {
    match std::fs::read_to_string("/proc/self/stat") {
        Ok(stat) => parse_start_time(&stat).unwrap_or_else(|| {
            debug!("Could not parse start time from /proc/self/stat");
            0
        }),
        Err(e) => {
            debug!(error = %e, "Could not read /proc/self/stat");
            0
        }
    }
}

/// Extract the start time from the contents of a `/proc/<pid>/stat` file.
///
/// The command name (field 2) is parenthesised and may itself contain spaces
/// or parentheses, so fields are counted from the last `)`.
pub fn parse_start_time(stat: &str) -> Option<u64> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // Fields after the command name start at field 3 (state); start time is field 22.
    after_comm.split_whitespace().nth(22 - 3)?.parse().ok()
}
