//! Process-wide signal coordination: which supervised signals have
//! arrived, and whether the supervisor is currently parked in an
//! interruptible poll.
//!
//! Ported as a self-pipe per signal rather than an asynchronous exception
//! raised out of a signal handler (see the redesign notes): each
//! supervised signal gets its own non-blocking pipe; `signal-hook`'s
//! low-level primitive writes one byte to the pipe's write end whenever
//! the signal is delivered, entirely inside async-signal-safe code. The
//! read end is registered with the [`crate::poller::Poller`] like any
//! other fd, and draining it is how this relay learns which signal fired.

use std::collections::HashSet;
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::poller::{Interest, PollBackend, Poller};

/// One of the six signals the supervisor forwards to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Int,
    Term,
    Hup,
    Quit,
    Usr1,
    Usr2,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::Int,
        Signal::Term,
        Signal::Hup,
        Signal::Quit,
        Signal::Usr1,
        Signal::Usr2,
    ];

    /// The `SIG_WAIT` set: forwarded to children but does not by itself
    /// start the kill-escalation clock.
    pub fn is_sig_wait(self) -> bool {
        matches!(self, Signal::Usr1 | Signal::Usr2)
    }

    pub fn raw(self) -> libc::c_int {
        match self {
            Signal::Int => libc::SIGINT,
            Signal::Term => libc::SIGTERM,
            Signal::Hup => libc::SIGHUP,
            Signal::Quit => libc::SIGQUIT,
            Signal::Usr1 => libc::SIGUSR1,
            Signal::Usr2 => libc::SIGUSR2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Int => "SIGINT",
            Signal::Term => "SIGTERM",
            Signal::Hup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
            Signal::Usr1 => "SIGUSR1",
            Signal::Usr2 => "SIGUSR2",
        }
    }
}

struct ArmedPipe {
    signal: Signal,
    read_end: UnixStream,
    #[allow(dead_code)] // keeps the registered action alive for the process lifetime
    sig_id: signal_hook::SigId,
}

/// Owned (not a true global singleton, see redesign notes) coordinator
/// shared by reference between the [`crate::supervisor::Supervisor`] and
/// its [`Poller`].
pub struct SignalRelay {
    pipes: Mutex<Vec<ArmedPipe>>,
    sigs_rcvd: Mutex<HashSet<Signal>>,
    sigs_sent: Mutex<HashSet<Signal>>,
    interruptible: AtomicBool,
}

impl SignalRelay {
    pub fn new() -> Self {
        SignalRelay {
            pipes: Mutex::new(Vec::new()),
            sigs_rcvd: Mutex::new(HashSet::new()),
            sigs_sent: Mutex::new(HashSet::new()),
            interruptible: AtomicBool::new(false),
        }
    }

    /// Arm the handler for `signal` and register its self-pipe read end
    /// with `poller`.
    pub fn arm<B: PollBackend>(
        &self,
        signal: Signal,
        poller: &mut Poller<B>,
    ) -> std::io::Result<()> {
        let (read_end, write_end) = UnixStream::pair()?;
        read_end.set_nonblocking(true)?;
        let sig_id = signal_hook::low_level::pipe::register(signal.raw(), write_end)?;
        poller.register(read_end.as_raw_fd(), Interest::READABLE);
        self.pipes.lock().unwrap().push(ArmedPipe {
            signal,
            read_end,
            sig_id,
        });
        Ok(())
    }

    pub fn set_interruptible(&self, value: bool) {
        self.interruptible.store(value, Ordering::SeqCst);
    }

    pub fn is_interruptible(&self) -> bool {
        self.interruptible.load(Ordering::SeqCst)
    }

    /// A cheap, comparable snapshot of the received-signal set, used by
    /// the poller to detect a signal landing between "snapshot" and "arm
    /// interruptible" (see [`Poller::poll`]).
    pub fn snapshot_received(&self) -> Vec<Signal> {
        let mut v: Vec<Signal> = self.sigs_rcvd.lock().unwrap().iter().copied().collect();
        v.sort_by_key(|s| s.raw());
        v
    }

    /// Given a poll-ready list that may include this relay's self-pipe
    /// fds, drain any that are ready (recording their signal into
    /// `sigs_rcvd`) and return only the fds that are *not* self-pipes.
    pub fn filter_and_absorb_signal_fds(
        &self,
        ready: Vec<(RawFd, Interest)>,
    ) -> Vec<(RawFd, Interest)> {
        let mut pipes = self.pipes.lock().unwrap();
        let mut rcvd = self.sigs_rcvd.lock().unwrap();
        ready
            .into_iter()
            .filter(|(fd, _)| {
                if let Some(armed) = pipes.iter_mut().find(|p| p.read_end.as_raw_fd() == *fd) {
                    let mut buf = [0u8; 64];
                    loop {
                        match armed.read_end.read(&mut buf) {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(_) => break,
                        }
                    }
                    rcvd.insert(armed.signal);
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Signals received but not yet forwarded to children.
    pub fn pending_to_send(&self) -> Vec<Signal> {
        let rcvd = self.sigs_rcvd.lock().unwrap();
        let sent = self.sigs_sent.lock().unwrap();
        rcvd.difference(&sent).copied().collect()
    }

    pub fn mark_sent(&self, signals: &[Signal]) {
        self.sigs_sent.lock().unwrap().extend(signals);
    }

    /// Whether any non-`SIG_WAIT` signal has been forwarded already -- the
    /// condition under which subsequent signals (even `SIG_WAIT` ones)
    /// start the kill-escalation clock.
    pub fn any_non_wait_sent(&self) -> bool {
        self.sigs_sent
            .lock()
            .unwrap()
            .iter()
            .any(|s| !s.is_sig_wait())
    }

    #[cfg(test)]
    pub fn new_empty_for_test() -> Self {
        SignalRelay::new()
    }

    #[cfg(test)]
    pub fn inject_received_for_test(&self, signal: Signal) {
        self.sigs_rcvd.lock().unwrap().insert(signal);
    }
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new()
    }
}
