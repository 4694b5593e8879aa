use std::fs::File;
use std::io::Write;
use std::path::Path;

use owo_colors::OwoColorize;

/// Which child stream a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
	Stdout,
	Stderr,
}

/// A line-oriented log destination.
///
/// The supervisor hands over fully-formed lines (no trailing newline) tagged
/// with the stream they came from; what happens to them afterwards is the
/// sink's business.
pub trait LineSink: Send {
	fn write_line(&mut self, line: &str, kind: StreamKind);
}

/// Writes lines to the supervisor's own stdout/stderr. Stderr lines are
/// colored so interleaved output stays readable.
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
	fn write_line(&mut self, line: &str, kind: StreamKind) {
		match kind {
			StreamKind::Stdout => println!("{}", line),
			StreamKind::Stderr => eprintln!("{}", line.red()),
		}
	}
}

/// Appends lines to a file, truncated on open.
pub struct FileSink {
	file: File,
}

impl FileSink {
	pub fn create(path: &Path) -> std::io::Result<Self> {
		Ok(Self {
			file: File::create(path)?,
		})
	}
}

impl LineSink for FileSink {
	fn write_line(&mut self, line: &str, _kind: StreamKind) {
		let _ = writeln!(self.file, "{}", line);
	}
}
