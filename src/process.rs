//! One supervised child: spawn, signal, wait.

use std::io::{self, BufRead, BufReader};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::Error;
use crate::sink::StreamKind;

/// How long a child gets to exit on its own before SIGKILL.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns one child process and the read ends of its stdout/stderr pipes.
///
/// The identity label survives respawns; the pid and pipe descriptors do not.
/// The label is for log lines only, the registry keys on the pid.
pub struct ManagedProcess {
	label: String,
	program: String,
	args: Vec<String>,
	child: Option<Child>,
	stdout: Option<BufReader<ChildStdout>>,
	stderr: Option<BufReader<ChildStderr>>,
	exit_code: Option<i32>,
}

impl ManagedProcess {
	pub fn new(program: impl Into<String>, args: &[String], label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
			program: program.into(),
			args: args.to_vec(),
			child: None,
			stdout: None,
			stderr: None,
			exit_code: None,
		}
	}

	/// Launch (or relaunch) the program with piped stdout/stderr.
	///
	/// Callable repeatedly on the same instance: a respawn keeps the label and
	/// gets fresh pipes. The new pipes are open before the old ones drop, so a
	/// descriptor value from the previous incarnation is never recycled within
	/// the poll batch that observed its hang-up.
	pub fn spawn(&mut self) -> Result<(), Error> {
		let mut child = Command::new(&self.program)
			.args(&self.args)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|e| Error::Spawn {
				label: self.label.clone(),
				source: e,
			})?;

		let stdout = child.stdout.take().map(BufReader::new);
		let stderr = child.stderr.take().map(BufReader::new);

		tracing::info!("{}: created (PID: {})", self.label, child.id());

		self.stdout = stdout;
		self.stderr = stderr;
		self.child = Some(child);
		self.exit_code = None;
		Ok(())
	}

	/// Ask the child to exit (SIGTERM), escalate to SIGKILL after the grace
	/// period. No-op for a never-spawned or already-reaped child.
	pub fn terminate(&mut self) -> Result<(), Error> {
		if self.child.is_none() {
			return Ok(());
		}
		self.signal(Signal::SIGTERM)?;
		if self.wait_with_grace()?.is_none() {
			tracing::warn!("{}: timeout on terminate, kill", self.label);
			self.signal(Signal::SIGKILL)?;
			self.wait_blocking()?;
		}
		Ok(())
	}

	/// Collect the exit status after a hang-up has been observed.
	///
	/// A hang-up can fire slightly before the OS finalizes the exit status, so
	/// this waits up to the grace period; a child that still refuses to be
	/// reaped gets SIGKILL.
	pub fn reap(&mut self) -> Result<(), Error> {
		if self.wait_with_grace()?.is_none() {
			tracing::warn!("{}: hangs, kill it", self.label);
			self.signal(Signal::SIGKILL)?;
			self.wait_blocking()?;
		}
		Ok(())
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	/// Pid of the current incarnation, `None` before the first spawn.
	pub fn pid(&self) -> Option<u32> {
		self.child.as_ref().map(|c| c.id())
	}

	/// Exit code of the last reaped incarnation. Signal deaths report -1.
	pub fn exit_code(&self) -> Option<i32> {
		self.exit_code
	}

	/// Raw descriptor of the stdout read end; a map key, not an I/O handle.
	pub fn stdout_fd(&self) -> Option<RawFd> {
		self.stdout.as_ref().map(|r| r.get_ref().as_raw_fd())
	}

	/// Raw descriptor of the stderr read end; a map key, not an I/O handle.
	pub fn stderr_fd(&self) -> Option<RawFd> {
		self.stderr.as_ref().map(|r| r.get_ref().as_raw_fd())
	}

	/// Read one line from the given stream, without the trailing newline.
	/// `None` means end of stream (or a stream that was never opened).
	pub fn read_line(&mut self, kind: StreamKind) -> io::Result<Option<String>> {
		match kind {
			StreamKind::Stdout => read_one_line(self.stdout.as_mut()),
			StreamKind::Stderr => read_one_line(self.stderr.as_mut()),
		}
	}

	/// Deliver a signal, absorbing "no such process": an already-dead child is
	/// the expected common case here, not an error.
	fn signal(&self, sig: Signal) -> Result<(), Error> {
		let Some(pid) = self.pid() else {
			return Ok(());
		};
		match kill(Pid::from_raw(pid as i32), sig) {
			Ok(()) | Err(Errno::ESRCH) => Ok(()),
			Err(e) => Err(Error::Kill {
				label: self.label.clone(),
				source: e,
			}),
		}
	}

	/// Wait up to the grace period for an exit status. Returns immediately for
	/// an already-reaped child.
	fn wait_with_grace(&mut self) -> Result<Option<i32>, Error> {
		let Some(child) = self.child.as_mut() else {
			return Ok(self.exit_code);
		};
		let deadline = Instant::now() + GRACE_PERIOD;
		loop {
			let status = child.try_wait().map_err(|e| Error::Wait {
				label: self.label.clone(),
				source: e,
			})?;
			match status {
				Some(status) => {
					let code = status.code().unwrap_or(-1);
					self.exit_code = Some(code);
					return Ok(Some(code));
				}
				None if Instant::now() >= deadline => return Ok(None),
				None => std::thread::sleep(WAIT_POLL_INTERVAL),
			}
		}
	}

	/// Blocking wait, used right after SIGKILL so no zombie is left behind.
	fn wait_blocking(&mut self) -> Result<(), Error> {
		let Some(child) = self.child.as_mut() else {
			return Ok(());
		};
		let status = child.wait().map_err(|e| Error::Wait {
			label: self.label.clone(),
			source: e,
		})?;
		self.exit_code = Some(status.code().unwrap_or(-1));
		Ok(())
	}
}

fn read_one_line<R: BufRead>(reader: Option<&mut R>) -> io::Result<Option<String>> {
	let Some(reader) = reader else {
		return Ok(None);
	};
	let mut line = String::new();
	if reader.read_line(&mut line)? == 0 {
		return Ok(None);
	}
	while line.ends_with('\n') || line.ends_with('\r') {
		line.pop();
	}
	Ok(Some(line))
}
