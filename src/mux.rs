//! Readiness multiplexer: the one platform-specific piece of the supervisor.
//!
//! Both backends report the same two conditions per registered descriptor:
//! readable (a line is waiting) and hang-up (the child closed its end, which
//! the supervisor treats as the crash/exit signal).

use std::io;
use std::ops::BitOr;
use std::os::fd::{BorrowedFd, RawFd};

#[cfg(target_os = "linux")]
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// What to watch a descriptor for. Hang-up is always reported by the OS
/// facilities regardless, but callers state it explicitly for clarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest {
	bits: u8,
}

impl Interest {
	pub const READABLE: Interest = Interest { bits: 0b01 };
	pub const HANGUP: Interest = Interest { bits: 0b10 };

	pub fn contains(self, other: Interest) -> bool {
		self.bits & other.bits == other.bits
	}
}

impl BitOr for Interest {
	type Output = Interest;

	fn bitor(self, rhs: Interest) -> Interest {
		Interest {
			bits: self.bits | rhs.bits,
		}
	}
}

/// One readiness notification. Readable and hang-up are independent bits and
/// may arrive together in the same event.
#[derive(Clone, Copy, Debug)]
pub struct Event {
	pub fd: RawFd,
	pub readable: bool,
	pub hangup: bool,
}

/// OS readiness facility behind a uniform interface.
///
/// `poll` blocks until at least one registered descriptor has a pending
/// event; an interrupting signal surfaces as `io::ErrorKind::Interrupted`.
pub trait Multiplexer: Send {
	fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()>;
	fn unregister(&mut self, fd: RawFd) -> io::Result<()>;
	fn poll(&mut self) -> io::Result<Vec<Event>>;
}

/// The best backend for the build target: epoll on Linux, poll(2) elsewhere.
pub fn platform_default() -> io::Result<Box<dyn Multiplexer>> {
	#[cfg(target_os = "linux")]
	{
		Ok(Box::new(EpollMux::new()?))
	}
	#[cfg(not(target_os = "linux"))]
	{
		Ok(Box::new(PollMux::new()))
	}
}

fn errno_io(e: nix::Error) -> io::Error {
	io::Error::from_raw_os_error(e as i32)
}

#[cfg(target_os = "linux")]
const MAX_EVENTS: usize = 64;

/// epoll-backed multiplexer. The descriptor value rides along as the event
/// payload so poll results map straight back to registry keys.
#[cfg(target_os = "linux")]
pub struct EpollMux {
	epoll: Epoll,
}

#[cfg(target_os = "linux")]
impl EpollMux {
	pub fn new() -> io::Result<Self> {
		Ok(Self {
			epoll: Epoll::new(EpollCreateFlags::empty()).map_err(errno_io)?,
		})
	}
}

#[cfg(target_os = "linux")]
impl Multiplexer for EpollMux {
	fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
		let mut flags = EpollFlags::empty();
		if interest.contains(Interest::READABLE) {
			flags |= EpollFlags::EPOLLIN;
		}
		// EPOLLHUP needs no flag, the kernel always reports it
		// SAFETY: the registry owns the stream for as long as it stays registered
		let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
		self.epoll
			.add(borrowed, EpollEvent::new(flags, fd as u64))
			.map_err(errno_io)
	}

	fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
		// SAFETY: callers unregister before dropping the stream
		let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
		match self.epoll.delete(borrowed) {
			Ok(()) => Ok(()),
			// already gone: epoll drops closed descriptors on its own
			Err(nix::errno::Errno::ENOENT) | Err(nix::errno::Errno::EBADF) => Ok(()),
			Err(e) => Err(errno_io(e)),
		}
	}

	fn poll(&mut self) -> io::Result<Vec<Event>> {
		let mut buf = vec![EpollEvent::empty(); MAX_EVENTS];
		let n = self.epoll.wait(&mut buf, EpollTimeout::NONE).map_err(errno_io)?;

		Ok(buf[..n]
			.iter()
			.map(|ev| Event {
				fd: ev.data() as RawFd,
				readable: ev.events().contains(EpollFlags::EPOLLIN),
				hangup: ev
					.events()
					.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
			})
			.collect())
	}
}

/// poll(2)-backed multiplexer. Unlike epoll there is no kernel-side interest
/// set, so this backend keeps its own and rebuilds the pollfd array per call;
/// `unregister` is what actually stops a descriptor from being watched.
pub struct PollMux {
	fds: Vec<(RawFd, Interest)>,
}

impl PollMux {
	pub fn new() -> Self {
		Self { fds: Vec::new() }
	}
}

impl Default for PollMux {
	fn default() -> Self {
		Self::new()
	}
}

impl Multiplexer for PollMux {
	fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
		if self.fds.iter().any(|&(registered, _)| registered == fd) {
			return Err(io::Error::new(
				io::ErrorKind::AlreadyExists,
				format!("fd {} already registered", fd),
			));
		}
		self.fds.push((fd, interest));
		Ok(())
	}

	fn unregister(&mut self, fd: RawFd) -> io::Result<()> {
		self.fds.retain(|&(registered, _)| registered != fd);
		Ok(())
	}

	fn poll(&mut self) -> io::Result<Vec<Event>> {
		let mut pollfds: Vec<PollFd> = self
			.fds
			.iter()
			.map(|&(fd, interest)| {
				let mut flags = PollFlags::empty();
				if interest.contains(Interest::READABLE) {
					flags |= PollFlags::POLLIN;
				}
				// SAFETY: the registry owns the stream for as long as it stays registered
				let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
				PollFd::new(borrowed, flags)
			})
			.collect();

		poll(&mut pollfds, PollTimeout::NONE).map_err(errno_io)?;

		let mut events = Vec::new();
		for (slot, &(fd, _)) in pollfds.iter().zip(&self.fds) {
			let revents = slot.revents().unwrap_or(PollFlags::empty());
			if revents.is_empty() {
				continue;
			}
			events.push(Event {
				fd,
				readable: revents.contains(PollFlags::POLLIN),
				hangup: revents
					.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL),
			});
		}
		Ok(events)
	}
}
