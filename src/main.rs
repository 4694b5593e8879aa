use std::path::PathBuf;

use clap::Parser;

use respawn::{ConsoleSink, FileSink, LineSink, Supervisor};

/// Keep N copies of a command running, forward their output, respawn on exit.
#[derive(Parser)]
#[command(version, about)]
struct Args {
	/// Executable to run
	executable: String,

	/// Arguments to pass to the executable
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	arguments: Vec<String>,

	/// Number of copies to keep running
	#[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
	num: u32,

	/// Stdout logging destination (defaults to the console)
	#[arg(long)]
	outlog: Option<PathBuf>,

	/// Stderr logging destination (defaults to the console)
	#[arg(long)]
	errlog: Option<PathBuf>,
}

fn main() {
	tracing_subscriber::fmt().init();
	let args = Args::parse();

	let stdout_sink = match open_sink(args.outlog.as_deref()) {
		Ok(sink) => sink,
		Err(e) => {
			eprintln!("error: cannot open --outlog: {}", e);
			std::process::exit(1);
		}
	};
	let stderr_sink = match open_sink(args.errlog.as_deref()) {
		Ok(sink) => sink,
		Err(e) => {
			eprintln!("error: cannot open --errlog: {}", e);
			std::process::exit(1);
		}
	};

	let mut supervisor = match Supervisor::new(stdout_sink, stderr_sink) {
		Ok(sup) => sup,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	};

	// initial spawns are fail-fast: a bad executable path aborts startup
	for _ in 0..args.num {
		if let Err(e) = supervisor.supervise(&args.executable, &args.arguments, None) {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}

	if let Err(e) = supervisor.run() {
		eprintln!("error: {}", e);
		std::process::exit(1);
	}
}

fn open_sink(path: Option<&std::path::Path>) -> std::io::Result<Box<dyn LineSink>> {
	match path {
		Some(path) => Ok(Box::new(FileSink::create(path)?)),
		None => Ok(Box::new(ConsoleSink)),
	}
}
