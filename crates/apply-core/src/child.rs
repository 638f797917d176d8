//! One subprocess plus its two non-blocking output streams, accumulated
//! lines, and escalation timer.

use chrono::{DateTime, Local};
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::line::{Line, LineBuffer, StreamKind};
use crate::poller::{Interest, PollBackend, Poller};
use crate::signal::Signal;

/// Warning-to-kill delay: how long a signalled child is given before the
/// supervisor escalates to an unconditional kill.
pub const KILL_DELAY: Duration = Duration::from_secs(7);
/// Post-kill grace period before a child is declared unsignalable.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// Explicit tri-state replacement for the original's overloaded
/// `killed: False | True | <timestamp>` field (see redesign notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillState {
    NotKilled,
    /// An unconditional kill has been sent; waiting out `KILL_TIMEOUT`.
    Killed,
    /// The post-kill grace period elapsed with the child still alive;
    /// it is now counted as dead-unsignalable.
    Abandoned,
}

/// Result of one non-blocking poll of a child.
pub enum PollOutcome {
    NotExitedNoData,
    NotExitedData,
    Exited(i32),
}

/// One subprocess plus its bookkeeping (§4.5 of the design).
pub struct Child {
    display_name: String,
    real_name: Option<String>,
    pub argv: Vec<String>,
    pub shell: bool,
    proc: std::process::Child,
    stdout: std::process::ChildStdout,
    stderr: std::process::ChildStderr,
    stdout_buf: LineBuffer,
    stderr_buf: LineBuffer,
    pending: Vec<Line>,
    pub started: Instant,
    pub started_at: DateTime<Local>,
    pub finished: Option<Instant>,
    pub finished_at: Option<DateTime<Local>>,
    pub exit_code: Option<i32>,
    kill_time: Option<Instant>,
    kill_state: KillState,
    pub sigfail: bool,
}

fn set_nonblocking(fd: RawFd, nonblock: bool) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let newflags = if nonblock {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, newflags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

impl Child {
    /// Spawn a child. Stdin is never forwarded -- the child won't
    /// expect any. `name` is the display/real name (first whitespace
    /// field of the item), or `None` for the singleton-empty-item case.
    pub fn spawn(name: Option<String>, argv: Vec<String>, shell: bool) -> std::io::Result<Child> {
        let mut cmd = if shell {
            let shell_path = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
            let mut c = Command::new(shell_path);
            c.arg("-c").arg(argv.join(" "));
            c
        } else {
            let mut c = Command::new(&argv[0]);
            c.args(&argv[1..]);
            c
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut proc = cmd.spawn()?;
        let stdout = proc.stdout.take().expect("stdout was piped");
        let stderr = proc.stderr.take().expect("stderr was piped");
        set_nonblocking(stdout.as_raw_fd(), true)?;
        set_nonblocking(stderr.as_raw_fd(), true)?;

        Ok(Child {
            display_name: name.clone().unwrap_or_else(|| "(command)".to_string()),
            real_name: name,
            argv,
            shell,
            proc,
            stdout,
            stderr,
            stdout_buf: LineBuffer::new(StreamKind::Stdout),
            stderr_buf: LineBuffer::new(StreamKind::Stderr),
            pending: Vec::new(),
            started: Instant::now(),
            started_at: Local::now(),
            finished: None,
            finished_at: None,
            exit_code: None,
            kill_time: None,
            kill_state: KillState::NotKilled,
            sigfail: false,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn real_name(&self) -> Option<&str> {
        self.real_name.as_deref()
    }

    pub fn pid(&self) -> u32 {
        self.proc.id()
    }

    pub fn register<B: PollBackend>(&self, poller: &mut Poller<B>) {
        poller.register(self.stdout.as_raw_fd(), Interest::READABLE);
        poller.register(self.stderr.as_raw_fd(), Interest::READABLE);
    }

    pub fn unregister<B: PollBackend>(&self, poller: &mut Poller<B>) {
        poller.unregister(self.stdout.as_raw_fd());
        poller.unregister(self.stderr.as_raw_fd());
    }

    fn drain_nonblocking(
        stream: &mut impl Read,
        buf: &mut LineBuffer,
        pending: &mut Vec<Line>,
    ) -> std::io::Result<bool> {
        let mut chunk = [0u8; 8192];
        let mut got_any = false;
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    got_any = true;
                    pending.extend(buf.feed(&chunk[..n]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        Ok(got_any)
    }

    fn drain_blocking(
        stream: &mut impl Read,
        buf: &mut LineBuffer,
        pending: &mut Vec<Line>,
    ) -> std::io::Result<()> {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => pending.extend(buf.feed(&chunk[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Non-blocking poll: if the process is alive, attempt a read on both
    /// streams and report whether anything was read. If it has exited,
    /// switch both streams back to blocking, drain them to EOF, and
    /// report the exit code.
    pub fn poll_once(&mut self) -> std::io::Result<PollOutcome> {
        match self.proc.try_wait()? {
            None => {
                let out = Self::drain_nonblocking(&mut self.stdout, &mut self.stdout_buf, &mut self.pending)?;
                let err = Self::drain_nonblocking(&mut self.stderr, &mut self.stderr_buf, &mut self.pending)?;
                Ok(if out || err {
                    PollOutcome::NotExitedData
                } else {
                    PollOutcome::NotExitedNoData
                })
            }
            Some(status) => {
                set_nonblocking(self.stdout.as_raw_fd(), false)?;
                set_nonblocking(self.stderr.as_raw_fd(), false)?;
                Self::drain_blocking(&mut self.stdout, &mut self.stdout_buf, &mut self.pending)?;
                Self::drain_blocking(&mut self.stderr, &mut self.stderr_buf, &mut self.pending)?;
                self.finished = Some(Instant::now());
                self.finished_at = Some(Local::now());
                let code = exit_code_of(status);
                self.exit_code = Some(code);
                Ok(PollOutcome::Exited(code))
            }
        }
    }

    /// Take every completed line accumulated since the last call.
    pub fn take_pending_lines(&mut self) -> Vec<Line> {
        std::mem::take(&mut self.pending)
    }

    /// Take any residual partial line on both streams (called once after
    /// exit has been observed).
    pub fn take_partial_lines(&mut self) -> Vec<Line> {
        let mut out = Vec::new();
        if let Some(line) = self.stdout_buf.take_partial() {
            out.push(line);
        }
        if let Some(line) = self.stderr_buf.take_partial() {
            out.push(line);
        }
        out
    }

    pub fn kill_time(&self) -> Option<Instant> {
        self.kill_time
    }

    pub fn kill_state(&self) -> KillState {
        self.kill_state
    }

    pub fn is_killed(&self) -> bool {
        matches!(self.kill_state, KillState::Killed | KillState::Abandoned)
    }

    /// Send `sig` to the child. On `EPERM`, records `sigfail` and emits a
    /// diagnostic rather than propagating -- the child is then treated as
    /// unsignalable for the abandonment count. If `escalate`, arms (or
    /// advances) the kill timer.
    pub fn signal(&mut self, sig: Signal, escalate: bool) {
        let ret = unsafe { libc::kill(self.proc.id() as libc::pid_t, sig.raw()) };
        if ret != 0 {
            self.record_signal_failure(&format!("sending signal {} to", sig.raw()));
        }
        if escalate {
            self.set_kill(false);
        }
    }

    /// Send the OS's unconditional-kill signal.
    pub fn kill(&mut self) {
        let ret = unsafe { libc::kill(self.proc.id() as libc::pid_t, libc::SIGKILL) };
        if ret != 0 {
            self.record_signal_failure("killing");
        }
    }

    fn record_signal_failure(&mut self, verb: &str) {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            self.sigfail = true;
            eprintln!("Error {verb} subprocess {}: {err}", self.display_name);
        }
    }

    /// Set up (or advance) the kill timeout. `final=false` arms/renews the
    /// `KILL_DELAY` warning clock; `final=true` marks the child killed and
    /// arms the shorter `KILL_TIMEOUT` post-kill grace period. A no-op
    /// once the child is already `Killed`/`Abandoned`.
    pub fn set_kill(&mut self, final_: bool) {
        self.set_kill_with(final_, KILL_DELAY, KILL_TIMEOUT)
    }

    fn set_kill_with(&mut self, final_: bool, delay: Duration, timeout: Duration) {
        if matches!(self.kill_state, KillState::Killed | KillState::Abandoned) {
            return;
        }
        let now = Instant::now();
        if !final_ {
            self.kill_time = Some(now + delay);
        } else {
            self.kill_state = KillState::Killed;
            self.kill_time = Some(now + timeout);
        }
    }

    /// Record that the post-kill grace period elapsed with the child
    /// still alive: it is now counted as dead-unsignalable.
    pub fn mark_abandoned(&mut self) {
        self.kill_state = KillState::Abandoned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    fn drain_until_exit(child: &mut Child) -> i32 {
        loop {
            match child.poll_once().unwrap() {
                PollOutcome::Exited(code) => return code,
                _ => sleep(Duration::from_millis(5)),
            }
        }
    }

    #[test]
    fn test_spawn_and_exit_code() {
        let mut child = Child::spawn(None, argv(&["true"]), false).unwrap();
        assert_eq!(drain_until_exit(&mut child), 0);
    }

    #[test]
    fn test_nonzero_exit_code() {
        let mut child = Child::spawn(None, argv(&["sh", "-c", "exit 3"]), false).unwrap();
        assert_eq!(drain_until_exit(&mut child), 3);
    }

    #[test]
    fn test_output_is_captured_as_lines() {
        let mut child = Child::spawn(
            Some("job".to_string()),
            argv(&["sh", "-c", "echo hello"]),
            false,
        )
        .unwrap();
        let _ = drain_until_exit(&mut child);
        let lines = child.take_pending_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "hello");
    }

    #[test]
    fn test_partial_line_reported_on_drain() {
        let mut child = Child::spawn(
            None,
            argv(&["sh", "-c", "printf no-newline"]),
            false,
        )
        .unwrap();
        let _ = drain_until_exit(&mut child);
        let partials = child.take_partial_lines();
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].text(), "no-newline");
    }

    #[test]
    fn test_display_name_falls_back_to_sentinel() {
        let child = Child::spawn(None, argv(&["true"]), false).unwrap();
        assert_eq!(child.display_name(), "(command)");
        assert_eq!(child.real_name(), None);
    }

    #[test]
    fn test_set_kill_then_final() {
        let mut child = Child::spawn(None, argv(&["sleep", "5"]), false).unwrap();
        child.set_kill(false);
        assert!(matches!(child.kill_state(), KillState::NotKilled));
        assert!(child.kill_time().is_some());
        child.set_kill(true);
        assert!(matches!(child.kill_state(), KillState::Killed));
        child.kill();
        let _ = drain_until_exit(&mut child);
    }

    #[test]
    fn test_set_kill_is_noop_once_killed() {
        let mut child = Child::spawn(None, argv(&["sleep", "5"]), false).unwrap();
        child.set_kill(true);
        let deadline = child.kill_time().unwrap();
        // Calling again with final=false must not resurrect the warn timer.
        child.set_kill(false);
        assert_eq!(child.kill_time().unwrap(), deadline);
        child.kill();
        let _ = drain_until_exit(&mut child);
    }

    /// Exercises the full warn -> kill -> abandon escalation machine against
    /// a child that ignores the forwarded signal, using short synthetic
    /// delays in place of the real 7s `KILL_DELAY`/3s `KILL_TIMEOUT` so the
    /// test runs in milliseconds (scenario S4, minus the live supervisor
    /// loop and real signal delivery).
    #[test]
    fn test_escalation_warn_kill_abandon_with_short_timers() {
        let short_delay = Duration::from_millis(20);
        let short_timeout = Duration::from_millis(20);

        let mut child = Child::spawn(None, argv(&["sh", "-c", "trap '' TERM; sleep 5"]), false)
            .unwrap();

        // Forwarding a signal with escalate=true arms the warn clock.
        child.set_kill_with(false, short_delay, short_timeout);
        assert_eq!(child.kill_state(), KillState::NotKilled);
        let warn_deadline = child.kill_time().unwrap();
        sleep(short_delay + Duration::from_millis(5));
        assert!(Instant::now() >= warn_deadline);

        // Deadline elapsed and the child is still alive: escalate to kill.
        child.kill();
        child.set_kill_with(true, short_delay, short_timeout);
        assert_eq!(child.kill_state(), KillState::Killed);
        let kill_deadline = child.kill_time().unwrap();
        sleep(short_timeout + Duration::from_millis(5));
        assert!(Instant::now() >= kill_deadline);

        // SIGKILL isn't trappable, so the child is actually gone by now;
        // poll_once observes the exit rather than requiring abandonment.
        let code = drain_until_exit(&mut child);
        assert_ne!(code, 0);
    }

    #[test]
    fn test_shell_mode_uses_shell_grammar() {
        let mut child = Child::spawn(
            None,
            argv(&["echo", "a", "&&", "echo", "b"]),
            true,
        )
        .unwrap();
        let _ = drain_until_exit(&mut child);
        let lines: Vec<String> = child.take_pending_lines().iter().map(|l| l.text()).collect();
        assert_eq!(lines, vec!["a", "b"]);
    }
}
