//! Stderr diagnostics: bracketed `[...]` notices and `%`-prefixed
//! warnings. These are the program's stable output contract, not
//! operational logging -- see the `tracing` setup in the binary crate for
//! that. Wording is grounded verbatim in `original_source/parallel/apply.py`.

use crate::signal::Signal;
use crate::timefmt::{elapsed_str, time_str};
use chrono::{DateTime, Local};
use std::time::Duration;

fn eprint_flushed(message: &str) {
    eprintln!("{message}");
}

/// `[This pid = N]`, printed to stdout once at the very start in verbose mode.
pub fn notice_this_pid(pid: u32) {
    println!("[This pid = {pid}]");
}

/// `[Started (N) at TIME]`, verbose+times mode, before any child spawns.
pub fn notice_started_count_at(count: usize, at: DateTime<Local>) {
    println!("[Started ({count}) at {}]", time_str(at));
}

/// `[name started at TIME]` or `[Started at TIME]` for one child, times mode.
pub fn notice_child_started(real_name: Option<&str>, at: DateTime<Local>) {
    match real_name {
        Some(name) => eprint_flushed(&format!("[{name} started at {}]", time_str(at))),
        None => eprint_flushed(&format!("[Started at {}]", time_str(at))),
    }
}

/// `[Started (N): a,b,c]`, verbose-without-times mode, after all spawns.
pub fn notice_started_names(names: &[String]) {
    println!("[Started ({}): {}]", names.len(), names.join(","));
}

/// `[Forwarding signal N (NAME) to subprocesses at TIME]`.
pub fn notice_forwarding_signal(sig: Signal, at: DateTime<Local>) {
    eprint_flushed(&format!(
        "[Forwarding signal {} ({}) to subprocesses at {}]",
        sig.raw(),
        sig.name(),
        time_str(at)
    ));
}

/// `%Unsignaled subprocess NAME still running at TIME`.
pub fn warn_unsignaled_still_running(name: &str, at: DateTime<Local>) {
    eprint_flushed(&format!(
        "%Unsignaled subprocess {name} still running at {}",
        time_str(at)
    ));
}

/// `%Subprocess NAME hung at TIME` (warn-only mode, no kill requested).
pub fn warn_hung(name: &str, at: DateTime<Local>) {
    eprint_flushed(&format!("%Subprocess {name} hung at {}", time_str(at)));
}

/// `%Killing hung subprocess NAME at TIME`.
pub fn warn_killing_hung(name: &str, at: DateTime<Local>) {
    eprint_flushed(&format!(
        "%Killing hung subprocess {name} at {}",
        time_str(at)
    ));
}

/// `%Timed out killing subprocess NAME at TIME`.
pub fn warn_timed_out_killing(name: &str, at: DateTime<Local>) {
    eprint_flushed(&format!(
        "%Timed out killing subprocess {name} at {}",
        time_str(at)
    ));
}

/// `[Returned N[ for NAME][ at TIME, took ELAPSED]]`.
pub fn notice_returned(
    ret: i32,
    real_name: Option<&str>,
    times: Option<(DateTime<Local>, Duration)>,
) {
    let nstr = real_name.map(|n| format!(" for {n}")).unwrap_or_default();
    let tstr = times
        .map(|(at, elapsed)| format!(" at {}, took {}", time_str(at), elapsed_str(elapsed)))
        .unwrap_or_default();
    eprint_flushed(&format!("[Returned {ret}{nstr}{tstr}]"));
}

/// `[Returns (D/N): name=ret, ...; retval = R]`, verbose mode while other
/// children remain.
pub fn notice_returns_so_far(done: usize, total: usize, results: &[(String, i32)], retval: i32) {
    let joined = results
        .iter()
        .map(|(n, r)| format!("{n}={r}"))
        .collect::<Vec<_>>()
        .join(", ");
    eprint_flushed(&format!(
        "[Returns ({done}/{total}): {joined}; retval = {retval}]"
    ));
}

/// `[Still running (R/N): a,b,c]`, verbose mode while other children remain.
pub fn notice_still_running(names: &[String], total: usize) {
    eprint_flushed(&format!(
        "[Still running ({}/{total}): {}]",
        names.len(),
        names.join(",")
    ));
}

/// `%Abandoning D unsignalable subprocesses`.
pub fn warn_abandoning(count: usize) {
    eprint_flushed(&format!("%Abandoning {count} unsignalable subprocesses"));
}

/// `[Returns: a=1, b=0]`, verbose-without-times summary.
pub fn notice_returns_summary(results: &[(String, i32)]) {
    let joined = results
        .iter()
        .map(|(n, r)| format!("{n}={r}"))
        .collect::<Vec<_>>()
        .join(", ");
    eprint_flushed(&format!("[Returns: {joined}]"));
}

/// `[name returned N, took ELAPSED]`, verbose+times per-child summary line.
pub fn notice_returned_took(name: &str, ret: i32, elapsed: Duration) {
    eprint_flushed(&format!(
        "[{name} returned {ret}, took {}]",
        elapsed_str(elapsed)
    ));
}

/// `[All N processes complete, final return = R]`.
pub fn notice_all_complete(count: usize, retval: i32) {
    eprint_flushed(&format!(
        "[All {count} processes complete, final return = {retval}]"
    ));
}

/// `[Failures: a=1, b=2]`, non-verbose summary, only when at least one
/// child failed.
pub fn notice_failures(results: &[(String, i32)]) {
    let joined = results
        .iter()
        .map(|(n, r)| format!("{n}={r}"))
        .collect::<Vec<_>>()
        .join(", ");
    eprint_flushed(&format!("[Failures: {joined}]"));
}

/// `[Finished at TIME, took ELAPSED]`.
pub fn notice_finished(at: DateTime<Local>, elapsed: Duration) {
    eprint_flushed(&format!(
        "[Finished at {}, took {}]",
        time_str(at),
        elapsed_str(elapsed)
    ));
}
