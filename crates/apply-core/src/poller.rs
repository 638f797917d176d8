//! Interruptible readiness multiplexer over a dynamic set of file
//! descriptors, plus the two-phase poll contract that lets an armed
//! signal abort a blocking wait.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::signal::SignalRelay;

/// Readiness/interest bits, mirroring the original's `POLLIN`/`POLLOUT`/`POLLPRI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(1 << 0);
    pub const WRITABLE: Interest = Interest(1 << 1);
    pub const PRIORITY: Interest = Interest(1 << 2);

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// A poll/select-style backend. Supervisor code only ever talks to the
/// [`Poller`] wrapper; this trait exists so the native `poll(2)` backend
/// and the `select(2)` fallback are interchangeable, per the design note
/// that calls for preserving the fallback "behind the same Poller
/// interface".
pub trait PollBackend {
    fn register(&mut self, fd: RawFd, interest: Interest);
    fn modify(&mut self, fd: RawFd, interest: Interest);
    fn unregister(&mut self, fd: RawFd);
    /// Block for at most `timeout` (`None` = return immediately), returning
    /// every fd that became ready along with which interests fired.
    fn poll_once(&mut self, timeout: Option<Duration>) -> std::io::Result<Vec<(RawFd, Interest)>>;
}

#[cfg(not(feature = "select-backend"))]
pub type DefaultBackend = NixPollBackend;
#[cfg(feature = "select-backend")]
pub type DefaultBackend = SelectPollBackend;

/// Backend built on `nix::poll` (the `poll(2)` syscall).
#[derive(Default)]
pub struct NixPollBackend {
    registry: HashMap<RawFd, Interest>,
}

impl NixPollBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_pollflags(interest: Interest) -> nix::poll::PollFlags {
        let mut flags = nix::poll::PollFlags::empty();
        if interest.contains(Interest::READABLE) {
            flags |= nix::poll::PollFlags::POLLIN;
        }
        if interest.contains(Interest::WRITABLE) {
            flags |= nix::poll::PollFlags::POLLOUT;
        }
        if interest.contains(Interest::PRIORITY) {
            flags |= nix::poll::PollFlags::POLLPRI;
        }
        flags
    }

    fn from_pollflags(flags: nix::poll::PollFlags) -> Interest {
        let mut interest = Interest(0);
        if flags.contains(nix::poll::PollFlags::POLLIN) {
            interest = interest | Interest::READABLE;
        }
        if flags.contains(nix::poll::PollFlags::POLLOUT) {
            interest = interest | Interest::WRITABLE;
        }
        if flags.contains(nix::poll::PollFlags::POLLPRI) {
            interest = interest | Interest::PRIORITY;
        }
        interest
    }
}

impl PollBackend for NixPollBackend {
    fn register(&mut self, fd: RawFd, interest: Interest) {
        self.registry.insert(fd, interest);
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) {
        self.registry.insert(fd, interest);
    }

    fn unregister(&mut self, fd: RawFd) {
        self.registry.remove(&fd);
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> std::io::Result<Vec<(RawFd, Interest)>> {
        use nix::poll::{PollFd, PollTimeout};
        use std::os::fd::BorrowedFd;

        if self.registry.is_empty() {
            if let Some(d) = timeout {
                std::thread::sleep(d);
            }
            return Ok(Vec::new());
        }

        let fds: Vec<RawFd> = self.registry.keys().copied().collect();
        let borrowed: Vec<BorrowedFd<'_>> = fds
            .iter()
            .map(|&fd| unsafe { BorrowedFd::borrow_raw(fd) })
            .collect();
        let mut pollfds: Vec<PollFd> = fds
            .iter()
            .zip(borrowed.iter())
            .map(|(fd, bfd)| PollFd::new(*bfd, Self::to_pollflags(self.registry[fd])))
            .collect();

        let millis: u16 = timeout
            .map(|d| d.as_millis().min(u16::MAX as u128) as u16)
            .unwrap_or(0);
        let poll_timeout = PollTimeout::from(millis);

        match nix::poll::poll(&mut pollfds, poll_timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(std::io::Error::from(e)),
        }

        let mut ready = Vec::new();
        for (fd, pfd) in fds.iter().zip(pollfds.iter()) {
            if let Some(revents) = pfd.revents() {
                if !revents.is_empty() {
                    ready.push((*fd, Self::from_pollflags(revents)));
                }
            }
        }
        Ok(ready)
    }
}

/// Fallback backend built over `select(2)`, for hosts where the native
/// backend isn't wanted. Maintains three fd sets (read/write/priority,
/// where "priority" maps to `select`'s except-set) the way the original's
/// `PollCompat` converts bitmask register/modify/unregister calls to set
/// membership.
#[derive(Default)]
pub struct SelectPollBackend {
    registry: HashMap<RawFd, Interest>,
}

impl SelectPollBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PollBackend for SelectPollBackend {
    fn register(&mut self, fd: RawFd, interest: Interest) {
        self.registry.insert(fd, interest);
    }

    fn modify(&mut self, fd: RawFd, interest: Interest) {
        self.registry.insert(fd, interest);
    }

    fn unregister(&mut self, fd: RawFd) {
        self.registry.remove(&fd);
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> std::io::Result<Vec<(RawFd, Interest)>> {
        use nix::sys::select::{select, FdSet};
        use nix::sys::time::{TimeVal, TimeValLike};
        use std::os::fd::BorrowedFd;

        if self.registry.is_empty() {
            if let Some(d) = timeout {
                std::thread::sleep(d);
            }
            return Ok(Vec::new());
        }

        let mut read_set = FdSet::new();
        let mut write_set = FdSet::new();
        let mut except_set = FdSet::new();
        let borrowed: Vec<(RawFd, BorrowedFd<'_>)> = self
            .registry
            .keys()
            .map(|&fd| (fd, unsafe { BorrowedFd::borrow_raw(fd) }))
            .collect();

        for (fd, bfd) in &borrowed {
            let interest = self.registry[fd];
            if interest.contains(Interest::READABLE) {
                read_set.insert(*bfd);
            }
            if interest.contains(Interest::WRITABLE) {
                write_set.insert(*bfd);
            }
            if interest.contains(Interest::PRIORITY) {
                except_set.insert(*bfd);
            }
        }

        let mut tv = timeout.map(|d| TimeVal::milliseconds(d.as_millis() as i64));
        match select(
            None,
            Some(&mut read_set),
            Some(&mut write_set),
            Some(&mut except_set),
            tv.as_mut(),
        ) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(Vec::new()),
            Err(e) => return Err(std::io::Error::from(e)),
        }

        let mut ready = Vec::new();
        for (fd, bfd) in &borrowed {
            let mut interest = Interest(0);
            if read_set.contains(*bfd) {
                interest = interest | Interest::READABLE;
            }
            if write_set.contains(*bfd) {
                interest = interest | Interest::WRITABLE;
            }
            if except_set.contains(*bfd) {
                interest = interest | Interest::PRIORITY;
            }
            if interest.0 != 0 {
                ready.push((*fd, interest));
            }
        }
        Ok(ready)
    }
}

/// Interruptible readiness multiplexer. Owns a [`PollBackend`] and
/// implements the two-phase poll contract described in the module docs.
pub struct Poller<B: PollBackend = DefaultBackend> {
    backend: B,
}

impl Poller<DefaultBackend> {
    pub fn new() -> Self {
        Poller {
            backend: DefaultBackend::default(),
        }
    }
}

impl Default for Poller<DefaultBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: PollBackend> Poller<B> {
    pub fn with_backend(backend: B) -> Self {
        Poller { backend }
    }

    pub fn register(&mut self, fd: RawFd, interest: Interest) {
        self.backend.register(fd, interest);
    }

    pub fn modify(&mut self, fd: RawFd, interest: Interest) {
        self.backend.modify(fd, interest);
    }

    pub fn unregister(&mut self, fd: RawFd) {
        self.backend.unregister(fd);
    }

    /// Poll with signal interrupt allowed.
    ///
    /// Phase 1: a very short (1ms), non-interruptible poll to drain
    /// already-ready fds and notice signals already queued.
    ///
    /// Phase 2 (only if phase 1 found nothing): snapshot the relay's
    /// received-signal set, mark the relay interruptible, and enter the
    /// real bounded poll -- unless a signal landed between the snapshot
    /// and arming, in which case skip the real poll and return empty.
    /// `interruptible` is cleared on every exit path.
    ///
    /// Any fd in the ready set that belongs to the relay's self-pipes is
    /// drained here and folded into `sigs_rcvd`; only the remaining
    /// (child) fds are returned to the caller.
    pub fn poll(
        &mut self,
        relay: &SignalRelay,
        timeout: Duration,
    ) -> std::io::Result<Vec<(RawFd, Interest)>> {
        let mut result = self.backend.poll_once(Some(Duration::from_millis(1)))?;
        if result.is_empty() {
            let snapshot = relay.snapshot_received();
            relay.set_interruptible(true);
            result = if snapshot == relay.snapshot_received() {
                self.backend.poll_once(Some(timeout))?
            } else {
                Vec::new()
            };
            relay.set_interruptible(false);
        }
        Ok(relay.filter_and_absorb_signal_fds(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn backend_pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    #[test]
    fn test_nix_backend_reports_readable() {
        let (mut a, b) = backend_pair();
        let mut backend = NixPollBackend::new();
        backend.register(b.as_raw_fd(), Interest::READABLE);
        a.write_all(b"x").unwrap();
        let ready = backend.poll_once(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, b.as_raw_fd());
        assert!(ready[0].1.contains(Interest::READABLE));
    }

    #[test]
    fn test_nix_backend_times_out_with_no_data() {
        let (_a, b) = backend_pair();
        let mut backend = NixPollBackend::new();
        backend.register(b.as_raw_fd(), Interest::READABLE);
        let ready = backend.poll_once(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_select_backend_reports_readable() {
        let (mut a, b) = backend_pair();
        let mut backend = SelectPollBackend::new();
        backend.register(b.as_raw_fd(), Interest::READABLE);
        a.write_all(b"x").unwrap();
        let ready = backend.poll_once(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].1.contains(Interest::READABLE));
    }

    #[test]
    fn test_unregister_stops_reporting() {
        let (mut a, b) = backend_pair();
        let mut backend = NixPollBackend::new();
        let fd = b.as_raw_fd();
        backend.register(fd, Interest::READABLE);
        backend.unregister(fd);
        a.write_all(b"x").unwrap();
        let ready = backend.poll_once(Some(Duration::from_millis(10))).unwrap();
        assert!(ready.is_empty());
        drop(a);
        let _ = b;
        let mut buf = [0u8; 1];
        let _ = std::io::Read::read(&mut &b, &mut buf);
    }

    #[test]
    fn test_poller_with_no_fds_respects_timeout_and_returns_empty() {
        let relay = SignalRelay::new_empty_for_test();
        let mut poller: Poller<NixPollBackend> = Poller::with_backend(NixPollBackend::new());
        let started = std::time::Instant::now();
        let ready = poller.poll(&relay, Duration::from_millis(20)).unwrap();
        assert!(ready.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(1));
    }
}
