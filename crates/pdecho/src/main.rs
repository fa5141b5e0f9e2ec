//
// main.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

//! A minimal standalone host for the Pandia kernel.
//!
//! Embeds the kernel with a trivial scripting engine that echoes whatever
//! code it is given. Useful for driving the kernel from real Jupyter clients
//! without a full host application.

use std::fs::File;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

use pdkernel::{EmbeddedKernel, ExecutionOutcome, Interpreter, ThreadScheduler};
use pdshared::kernel_info::LanguageInfo;

#[derive(Parser)]
#[command(name = "pdecho", about = "Echo host for the Pandia kernel")]
struct Args {
    /// The path to a Jupyter connection file. If omitted, one is generated
    /// and its path printed so a client can connect to it.
    #[arg(short, long)]
    connection_file: Option<PathBuf>,

    /// The interval between kernel poll cycles, in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,

    /// The log level: trace, debug, info, warn, or error
    #[arg(long)]
    log_level: Option<String>,

    /// A file to write logs to, in addition to the terminal
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// A scripting engine that echoes its input: stdout is the code itself.
struct EchoInterpreter;

impl Interpreter for EchoInterpreter {
    fn execute(&mut self, code: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            faulted: false,
            stdout: code.to_string(),
            stderr: String::new(),
        }
    }

    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: String::from("echo"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mimetype: String::from("text/plain"),
            file_extension: String::from(".txt"),
            pygments_lexer: None,
            codemirror_mode: None,
            nbconvert_exporter: None,
        }
    }

    fn banner(&self) -> String {
        String::from("Pandia echo kernel")
    }
}

fn init_logging(args: &Args) {
    let log_level = match &args.log_level {
        Some(level) => level.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| String::from("info")),
    };

    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        other => {
            println!("Invalid log level '{}'; using 'info'", other);
            LevelFilter::Info
        }
    };

    let result = match &args.log_file {
        Some(log_file) => match File::create(log_file) {
            Ok(file) => CombinedLogger::init(vec![
                TermLogger::new(
                    log_level,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(log_level, Config::default(), file),
            ]),
            Err(err) => {
                println!("Failed to create log file: {}", err);
                TermLogger::init(
                    log_level,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                )
            }
        },
        None => TermLogger::init(
            log_level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
    };

    if let Err(err) = result {
        println!("Failed to initialize logging: {}", err);
    }
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    init_logging(&args);

    let connection_path = match &args.connection_file {
        Some(path) => path.clone(),
        None => {
            let file = pdkernel::ConnectionFile::generate(String::from("127.0.0.1"))?;
            let path = std::env::temp_dir().join(format!("pdecho-{}.json", std::process::id()));
            file.to_file(&path)?;
            println!("Connection file written to {}", path.display());
            path
        }
    };

    let (stopped_tx, stopped_rx) = mpsc::channel::<()>();
    let scheduler = ThreadScheduler;
    let kernel = EmbeddedKernel::start(
        &connection_path,
        whoami(),
        Box::new(EchoInterpreter),
        &scheduler,
        Some(Box::new(move || {
            let _ = stopped_tx.send(());
        })),
    )?;
    kernel.set_poll_interval(Duration::from_millis(args.poll_interval_ms));

    log::info!(
        "Echo kernel running; polling every {:?}. Waiting for a shutdown request.",
        kernel.poll_interval()
    );

    // Block until a client shuts the kernel down.
    let _ = stopped_rx.recv();
    log::info!("Kernel stopped; exiting.");
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("kernel"))
}
