//! Bookkeeping for the live fleet: pid to process, descriptor to pid.

use std::collections::HashMap;
use std::os::fd::RawFd;

use crate::error::Error;
use crate::mux::{Interest, Multiplexer};
use crate::process::ManagedProcess;

/// Tracks every live child by pid and by stream descriptor.
///
/// A pid is present in `processes` exactly when its two descriptors are
/// present in the index maps; all three are updated together, only ever from
/// the event-loop thread. Descriptor values may be recycled by the OS after a
/// deregistration, which is why stale poll events must be checked against the
/// index maps before dispatch.
pub struct StreamRegistry {
	processes: HashMap<u32, ManagedProcess>,
	stdout_fds: HashMap<RawFd, u32>,
	stderr_fds: HashMap<RawFd, u32>,
}

impl StreamRegistry {
	pub fn new() -> Self {
		Self {
			processes: HashMap::new(),
			stdout_fds: HashMap::new(),
			stderr_fds: HashMap::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.processes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.processes.is_empty()
	}

	pub fn pids(&self) -> Vec<u32> {
		self.processes.keys().copied().collect()
	}

	/// Insert a spawned process into all three maps and subscribe both of its
	/// streams with the readiness facility.
	pub fn register(
		&mut self,
		process: ManagedProcess,
		mux: &mut dyn Multiplexer,
	) -> Result<(), Error> {
		let (pid, out_fd, err_fd) =
			match (process.pid(), process.stdout_fd(), process.stderr_fd()) {
				(Some(pid), Some(out_fd), Some(err_fd)) => (pid, out_fd, err_fd),
				_ => {
					return Err(Error::NotSpawned {
						label: process.label().to_string(),
					})
				}
			};

		mux.register(out_fd, Interest::READABLE | Interest::HANGUP)
			.map_err(Error::Poll)?;
		if let Err(e) = mux.register(err_fd, Interest::READABLE | Interest::HANGUP) {
			// keep maps and subscriptions in step on the error path too
			let _ = mux.unregister(out_fd);
			return Err(Error::Poll(e));
		}

		self.stdout_fds.insert(out_fd, pid);
		self.stderr_fds.insert(err_fd, pid);
		self.processes.insert(pid, process);
		Ok(())
	}

	/// Remove a process from all three maps and unsubscribe its streams,
	/// handing ownership back to the caller. The streams are still open at
	/// this point; they close when the caller respawns or drops the process.
	pub fn deregister(&mut self, pid: u32, mux: &mut dyn Multiplexer) -> Option<ManagedProcess> {
		let process = self.processes.remove(&pid)?;
		if let Some(fd) = process.stdout_fd() {
			self.stdout_fds.remove(&fd);
			let _ = mux.unregister(fd);
		}
		if let Some(fd) = process.stderr_fd() {
			self.stderr_fds.remove(&fd);
			let _ = mux.unregister(fd);
		}
		Some(process)
	}

	pub fn pid_for_stdout(&self, fd: RawFd) -> Option<u32> {
		self.stdout_fds.get(&fd).copied()
	}

	pub fn pid_for_stderr(&self, fd: RawFd) -> Option<u32> {
		self.stderr_fds.get(&fd).copied()
	}

	pub fn get_mut(&mut self, pid: u32) -> Option<&mut ManagedProcess> {
		self.processes.get_mut(&pid)
	}

	/// Terminate every registered process. Shutdown only; failures are logged
	/// and skipped so one stubborn child cannot strand the rest of the fleet.
	pub fn terminate_all(&mut self, mux: &mut dyn Multiplexer) {
		for (_, mut process) in self.processes.drain() {
			if let Some(fd) = process.stdout_fd() {
				let _ = mux.unregister(fd);
			}
			if let Some(fd) = process.stderr_fd() {
				let _ = mux.unregister(fd);
			}
			if let Err(e) = process.terminate() {
				tracing::error!("{}: failed to terminate: {}", process.label(), e);
			}
		}
		self.stdout_fds.clear();
		self.stderr_fds.clear();
	}
}

impl Default for StreamRegistry {
	fn default() -> Self {
		Self::new()
	}
}
