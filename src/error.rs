use std::io;

/// Errors from supervising child processes.
#[derive(Debug)]
pub enum Error {
	/// Child could not be launched (missing or unexecutable program).
	Spawn { label: String, source: io::Error },
	/// Waiting on a child failed unexpectedly.
	Wait { label: String, source: io::Error },
	/// Sending a signal failed for a reason other than "already dead".
	Kill { label: String, source: nix::Error },
	/// A process was handed to the registry before its first spawn.
	NotSpawned { label: String },
	/// The readiness facility failed.
	Poll(io::Error),
	/// Installing the interrupt handler failed.
	Handler(nix::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Spawn { label, source } => write!(f, "{}: spawn failed: {}", label, source),
			Error::Wait { label, source } => write!(f, "{}: wait failed: {}", label, source),
			Error::Kill { label, source } => write!(f, "{}: kill failed: {}", label, source),
			Error::NotSpawned { label } => write!(f, "{}: not spawned", label),
			Error::Poll(e) => write!(f, "readiness poll failed: {}", e),
			Error::Handler(e) => write!(f, "failed to install signal handler: {}", e),
		}
	}
}

impl std::error::Error for Error {}
