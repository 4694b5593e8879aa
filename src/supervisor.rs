//! The event loop: poll readiness, forward lines, respawn on hang-up.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Error;
use crate::mux::{self, Event, Multiplexer};
use crate::process::ManagedProcess;
use crate::registry::StreamRegistry;
use crate::sink::{LineSink, StreamKind};

/// Set from the signal handler; observed around the blocking poll.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signal: i32) {
	INTERRUPTED.store(true, Ordering::SeqCst);
}

/// In-process way to ask a running supervisor to shut down, equivalent to an
/// operator interrupt. Cloneable and usable from any thread.
///
/// A request does not itself wake a poll that is already blocked: it is
/// observed at the loop's next wakeup, which is the next stream event or the
/// EINTR from a real SIGINT/SIGTERM. To stop a completely quiet fleet,
/// deliver the signal; the handle is for embedders whose children produce
/// output or who combine it with one.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
	pub fn request(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_requested(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Owns the registry, the readiness multiplexer and the two log sinks, all on
/// one thread. "Concurrency" here is the interleaving of many children's I/O,
/// not threads inside the supervisor; single-thread ownership is what keeps
/// the registry consistent without locks.
pub struct Supervisor {
	registry: StreamRegistry,
	mux: Box<dyn Multiplexer>,
	stdout_sink: Box<dyn LineSink>,
	stderr_sink: Box<dyn LineSink>,
	shutdown: Arc<AtomicBool>,
	next_index: u32,
}

impl Supervisor {
	/// Build a supervisor with the platform's readiness backend. Both sinks
	/// are required up front: a process can only be created through a
	/// supervisor that already has somewhere to send its output.
	pub fn new(
		stdout_sink: Box<dyn LineSink>,
		stderr_sink: Box<dyn LineSink>,
	) -> Result<Self, Error> {
		Ok(Self::with_multiplexer(
			stdout_sink,
			stderr_sink,
			mux::platform_default().map_err(Error::Poll)?,
		))
	}

	pub fn with_multiplexer(
		stdout_sink: Box<dyn LineSink>,
		stderr_sink: Box<dyn LineSink>,
		mux: Box<dyn Multiplexer>,
	) -> Self {
		Self {
			registry: StreamRegistry::new(),
			mux,
			stdout_sink,
			stderr_sink,
			shutdown: Arc::new(AtomicBool::new(false)),
			next_index: 0,
		}
	}

	/// Spawn one replica and register it. `label` defaults to a sequential
	/// `#0`, `#1`, ... and is only ever used in log lines.
	pub fn supervise(
		&mut self,
		program: &str,
		args: &[String],
		label: Option<String>,
	) -> Result<(), Error> {
		let label = label.unwrap_or_else(|| format!("#{}", self.next_index));
		self.next_index += 1;

		let mut process = ManagedProcess::new(program, args, label);
		process.spawn()?;
		self.registry.register(process, self.mux.as_mut())
	}

	/// Number of currently registered replicas.
	pub fn process_count(&self) -> usize {
		self.registry.len()
	}

	/// Pids of the current incarnations.
	pub fn pids(&self) -> Vec<u32> {
		self.registry.pids()
	}

	pub fn shutdown_handle(&self) -> ShutdownHandle {
		ShutdownHandle(Arc::clone(&self.shutdown))
	}

	/// Block until an interrupt (SIGINT/SIGTERM or a `ShutdownHandle`
	/// request) has terminated the whole fleet. A fatal error also tears the
	/// remaining fleet down before it propagates.
	pub fn run(&mut self) -> Result<(), Error> {
		install_interrupt_handler()?;

		loop {
			match self.run_once() {
				Ok(true) => continue,
				Ok(false) => return Ok(()),
				Err(e) => {
					tracing::error!("fatal: {}", e);
					self.registry.terminate_all(self.mux.as_mut());
					return Err(e);
				}
			}
		}
	}

	/// One event-loop iteration: check for interrupt, poll, dispatch every
	/// event. Returns `false` once the fleet has been terminated.
	pub fn run_once(&mut self) -> Result<bool, Error> {
		if self.interrupted() {
			tracing::info!("interrupt, terminating all processes");
			self.registry.terminate_all(self.mux.as_mut());
			return Ok(false);
		}

		// the registry is only ever transiently empty mid-respawn; skip the
		// blocking poll rather than wait on an empty set
		if self.registry.is_empty() {
			return Ok(true);
		}

		let events = match self.mux.poll() {
			Ok(events) => events,
			// a signal landed while blocked; the flag check above handles it
			Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
			Err(e) => return Err(Error::Poll(e)),
		};

		for event in events {
			self.dispatch(event)?;
		}
		Ok(true)
	}

	fn interrupted(&self) -> bool {
		INTERRUPTED.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst)
	}

	fn dispatch(&mut self, event: Event) -> Result<(), Error> {
		if let Some(pid) = self.registry.pid_for_stdout(event.fd) {
			self.handle(pid, event, StreamKind::Stdout)
		} else if let Some(pid) = self.registry.pid_for_stderr(event.fd) {
			self.handle(pid, event, StreamKind::Stderr)
		} else {
			// stale event for a descriptor deregistered earlier in this batch
			Ok(())
		}
	}

	fn handle(&mut self, pid: u32, event: Event, kind: StreamKind) -> Result<(), Error> {
		// hang-up wins over a readable bundled into the same event; the
		// pending last line is dropped and the replacement starts fresh
		if event.hangup {
			self.respawn(pid)
		} else if event.readable {
			self.forward_line(pid, kind);
			Ok(())
		} else {
			Ok(())
		}
	}

	/// Crash path: reap the dead incarnation, then spawn a replacement under
	/// the same identity and re-register it with its new pid and descriptors.
	fn respawn(&mut self, pid: u32) -> Result<(), Error> {
		let Some(mut process) = self.registry.deregister(pid, self.mux.as_mut()) else {
			return Ok(());
		};
		process.reap()?;
		tracing::info!(
			"{}: ended with code {} (PID: {}), respawn",
			process.label(),
			process.exit_code().unwrap_or(-1),
			pid
		);
		process.spawn()?;
		self.registry.register(process, self.mux.as_mut())
	}

	fn forward_line(&mut self, pid: u32, kind: StreamKind) {
		let Some(process) = self.registry.get_mut(pid) else {
			return;
		};
		match process.read_line(kind) {
			Ok(Some(line)) => {
				let sink = match kind {
					StreamKind::Stdout => &mut self.stdout_sink,
					StreamKind::Stderr => &mut self.stderr_sink,
				};
				sink.write_line(&line, kind);
			}
			Ok(None) => {}
			Err(e) => {
				tracing::warn!("{}: read error on {:?}: {}", process.label(), kind, e);
			}
		}
	}
}

/// Route SIGINT and SIGTERM to the interrupt flag. SA_RESTART stays off so
/// the blocking poll returns EINTR and the loop sees the flag promptly.
fn install_interrupt_handler() -> Result<(), Error> {
	INTERRUPTED.store(false, Ordering::SeqCst);
	let action = SigAction::new(
		SigHandler::Handler(on_interrupt),
		SaFlags::empty(),
		SigSet::empty(),
	);
	unsafe {
		sigaction(Signal::SIGINT, &action).map_err(Error::Handler)?;
		sigaction(Signal::SIGTERM, &action).map_err(Error::Handler)?;
	}
	Ok(())
}
