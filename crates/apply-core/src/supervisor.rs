//! Item resolution and the main supervise loop: spawn one child per item,
//! multiplex their output, forward signals, escalate against children that
//! won't die, and compute the aggregate exit code.

use chrono::Local;
use std::time::{Duration, Instant};

use crate::child::{Child, KillState, PollOutcome};
use crate::diag;
use crate::error::AppError;
use crate::interpolate::{self, PlaceholderMap, ARG_MAP, MACH_MAP, NULL_MAP, PATH_MAP};
use crate::line::{format_line, Line, StreamKind};
use crate::poller::Poller;
use crate::signal::{Signal, SignalRelay};

/// How `-m`'s ssh invocation should pin the IP family (`-4`/`-6`/neither).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpPref {
    Any,
    V4,
    V6,
}

/// Where the per-item list came from, before re-splitting is applied.
/// Determines which placeholder map is active and, for `Machines`, rewrites
/// the command to go through `ssh`.
pub enum ItemSource {
    /// `-f`: lines already read from the argument file, right-stripped.
    ArgFileLines(Vec<String>),
    /// `-a`: one or more raw strings, each re-split on whitespace/commas.
    Paths(Vec<String>),
    /// `-m`: same re-split as `Paths`.
    Machines(Vec<String>, IpPref),
    /// No `-a`/`-f`/`-m` given but `-c` supplied a command: the positional
    /// tail is used verbatim (already argv-split by the shell, so no
    /// further whitespace/comma re-split) as `PATH`-mapped items.
    Default(Vec<String>),
}

/// Split `-a`/`-m` arguments into individual items on whitespace or commas.
pub fn split_args(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|entry| entry.split(|c: char| c.is_whitespace() || c == ','))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct ResolvedRun {
    pub items: Vec<String>,
    pub map: PlaceholderMap,
    pub command: Vec<String>,
}

/// Resolve the final item list, placeholder map, and command tokens.
/// Precedence: arg-file lines → `-a` paths → `-m` machines → the singleton
/// empty item (`NULL` map), at which point `-n` is a usage error.
pub fn resolve(
    source: Option<ItemSource>,
    mut command: Vec<String>,
    names: bool,
) -> Result<ResolvedRun, AppError> {
    if command.is_empty() {
        return Err(AppError::MissingCommand);
    }
    let (items, map) = match source {
        Some(ItemSource::ArgFileLines(lines)) => (lines, ARG_MAP),
        Some(ItemSource::Paths(raw)) => (split_args(&raw), PATH_MAP),
        Some(ItemSource::Machines(raw, pref)) => {
            let items = split_args(&raw);
            let sshopt = match pref {
                IpPref::V4 => "-4T",
                IpPref::V6 => "-6T",
                IpPref::Any => "-T",
            };
            let mut prefixed = vec!["ssh".to_string(), sshopt.to_string(), "%M".to_string()];
            prefixed.extend(command.drain(..));
            command = prefixed;
            (items, MACH_MAP)
        }
        Some(ItemSource::Default(raw)) => (raw, PATH_MAP),
        None => (Vec::new(), PATH_MAP),
    };
    if items.is_empty() {
        if names {
            return Err(AppError::NamesWithEmptyItems);
        }
        return Ok(ResolvedRun {
            items: vec![String::new()],
            map: NULL_MAP,
            command,
        });
    }
    Ok(ResolvedRun { items, map, command })
}

/// Sleep duration while idle and a hung-process kill timer is outstanding.
const HUNG_POLL: Duration = Duration::from_millis(100);
/// Sleep duration while idle and no kill timer is outstanding.
const IDLE_POLL: Duration = Duration::from_millis(5000);
/// Aggregate return code when every remaining child had to be abandoned.
const ABANDONED_RETVAL: i32 = 999;

/// Resolved options for one supervise run. Constructed by the binary crate
/// from parsed CLI flags plus [`resolve`]'s output.
pub struct RunOptions {
    pub command: Vec<String>,
    pub shell: bool,
    pub items: Vec<String>,
    pub map: PlaceholderMap,
    pub sequential: bool,
    pub names: bool,
    pub times: bool,
    pub verbose: bool,
    pub kill_hung: bool,
    pub signal_test: bool,
}

fn emit_line(line: &Line, name: Option<&str>, times: bool) {
    let at = times.then_some(line.at);
    let text = line.text();
    let formatted = format_line(line.stream, &text, name, at);
    match line.stream {
        StreamKind::Stdout => println!("{formatted}"),
        StreamKind::Stderr => eprintln!("{formatted}"),
    }
}

fn flush_pending(child: &mut Child, options: &RunOptions) {
    let name = options.names.then(|| child.display_name().to_string());
    for line in child.take_pending_lines() {
        emit_line(&line, name.as_deref(), options.times);
    }
}

fn flush_partial(child: &mut Child, options: &RunOptions) {
    let name = options.names.then(|| child.display_name().to_string());
    for line in child.take_partial_lines() {
        emit_line(&line, name.as_deref(), options.times);
    }
}

/// Whether forwarding `pending` right now should arm the kill-escalation
/// clock on every child. `SIG_WAIT` (USR1/USR2) never escalates on its own,
/// but a single INT/TERM/HUP/QUIT does, and once any non-wait signal has
/// gone out every later forward -- including further `SIG_WAIT` ones --
/// escalates too.
fn should_escalate(signal_test: bool, any_non_wait_sent: bool, pending: &[Signal]) -> bool {
    signal_test || any_non_wait_sent || pending.iter().any(|s| !s.is_sig_wait())
}

/// Run the supervise loop to completion and return the aggregate exit code
/// (the highest child return code seen, or `999` if children had to be
/// abandoned as unsignalable).
pub fn run(options: RunOptions) -> Result<i32, AppError> {
    let mut poller: Poller = Poller::new();
    let relay = SignalRelay::new();
    for sig in Signal::ALL {
        relay.arm(sig, &mut poller).map_err(AppError::SignalSetupFailed)?;
    }

    if options.signal_test {
        diag::notice_this_pid(std::process::id());
    }

    let started = Instant::now();
    if options.verbose && options.times {
        diag::notice_started_count_at(options.items.len(), Local::now());
    }

    let mut procs: Vec<Child> = Vec::with_capacity(options.items.len());
    for item in &options.items {
        let real_name = if item.is_empty() {
            None
        } else {
            item.split_whitespace().next().map(str::to_string)
        };
        let mut argv = Vec::with_capacity(options.command.len());
        for tmpl in &options.command {
            argv.push(interpolate::expand(tmpl, item, &options.map)?);
        }
        let child = Child::spawn(real_name, argv, options.shell).map_err(AppError::SpawnFailed)?;
        if options.times {
            diag::notice_child_started(child.real_name(), child.started_at);
        }
        child.register(&mut poller);
        procs.push(child);
    }
    if options.verbose && !options.times {
        let names: Vec<String> = procs.iter().map(|c| c.display_name().to_string()).collect();
        diag::notice_started_names(&names);
    }

    let total = procs.len();
    let mut done: Vec<Child> = Vec::new();
    let mut retval = 0i32;

    while !procs.is_empty() {
        let pending_sigs = relay.pending_to_send();
        if !pending_sigs.is_empty() {
            let set_kill =
                should_escalate(options.signal_test, relay.any_non_wait_sent(), &pending_sigs);
            for sig in &pending_sigs {
                if options.verbose || options.signal_test {
                    diag::notice_forwarding_signal(*sig, Local::now());
                }
                for child in procs.iter_mut() {
                    child.signal(*sig, set_kill);
                }
            }
            relay.mark_sent(&pending_sigs);
        }

        let mut activity = false;
        let mut hung_check = false;
        let now_at = Local::now();
        let now_instant = Instant::now();
        let mut deadprocs = 0usize;

        let mut i = 0;
        while i < procs.len() {
            match procs[i].poll_once()? {
                PollOutcome::Exited(code) => {
                    let mut child = procs.remove(i);
                    child.unregister(&mut poller);
                    flush_pending(&mut child, &options);
                    flush_partial(&mut child, &options);
                    activity = true;

                    if code != 0 || options.verbose || options.times {
                        let times_info = options.times.then(|| {
                            (
                                child.finished_at.expect("exited child has finished_at"),
                                child.finished.expect("exited child has finished") - child.started,
                            )
                        });
                        diag::notice_returned(code, child.real_name(), times_info);
                        if code > retval {
                            retval = code;
                        }
                    }
                    done.push(child);
                    if options.verbose && !procs.is_empty() {
                        if done.len() > 1 {
                            let results: Vec<(String, i32)> = done
                                .iter()
                                .map(|c| (c.display_name().to_string(), c.exit_code.unwrap_or(0)))
                                .collect();
                            diag::notice_returns_so_far(done.len(), total, &results, retval);
                        }
                        let names: Vec<String> =
                            procs.iter().map(|c| c.display_name().to_string()).collect();
                        diag::notice_still_running(&names, total);
                    }
                    if options.sequential && procs.len() == 1 {
                        flush_pending(&mut procs[0], &options);
                    }
                }
                PollOutcome::NotExitedData => {
                    activity = true;
                    if !options.sequential || procs.len() < 2 {
                        flush_pending(&mut procs[i], &options);
                    }
                    if procs[i].kill_time().is_some() {
                        procs[i].set_kill(false);
                    }
                    i += 1;
                }
                PollOutcome::NotExitedNoData => {
                    let Some(kill_time) = procs[i].kill_time() else {
                        i += 1;
                        continue;
                    };
                    hung_check = true;
                    if kill_time > now_instant {
                        i += 1;
                        continue;
                    }
                    let child = &mut procs[i];
                    if child.kill_state() == KillState::Abandoned {
                        deadprocs += 1;
                    } else if child.sigfail {
                        diag::warn_unsignaled_still_running(child.display_name(), now_at);
                        deadprocs += 1;
                    } else if !options.kill_hung {
                        diag::warn_hung(child.display_name(), now_at);
                        child.set_kill(false);
                    } else if child.kill_state() == KillState::NotKilled {
                        diag::warn_killing_hung(child.display_name(), now_at);
                        child.kill();
                        child.set_kill(true);
                        activity = true;
                    } else {
                        diag::warn_timed_out_killing(child.display_name(), now_at);
                        child.mark_abandoned();
                        deadprocs += 1;
                    }
                    i += 1;
                }
            }
        }

        if deadprocs > 0 && deadprocs >= procs.len() {
            diag::warn_abandoning(deadprocs);
            retval = ABANDONED_RETVAL;
            break;
        }
        if !activity {
            let timeout = if hung_check { HUNG_POLL } else { IDLE_POLL };
            let _ = poller.poll(&relay, timeout)?;
        }
    }

    let numdone = done.len();
    if numdone > 1 {
        if options.verbose {
            if !options.times {
                let results: Vec<(String, i32)> = done
                    .iter()
                    .map(|c| (c.display_name().to_string(), c.exit_code.unwrap_or(0)))
                    .collect();
                diag::notice_returns_summary(&results);
            } else {
                for child in &done {
                    diag::notice_returned_took(
                        child.display_name(),
                        child.exit_code.unwrap_or(0),
                        child.finished.expect("done child has finished") - child.started,
                    );
                }
            }
            diag::notice_all_complete(numdone, retval);
        } else {
            let results: Vec<(String, i32)> = done
                .iter()
                .filter(|c| c.exit_code.unwrap_or(0) != 0)
                .map(|c| (c.display_name().to_string(), c.exit_code.unwrap_or(0)))
                .collect();
            if !results.is_empty() {
                diag::notice_failures(&results);
            }
        }
    }
    if options.times {
        diag::notice_finished(Local::now(), started.elapsed());
    }
    Ok(retval)
}
