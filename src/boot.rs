use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

/// Log to a file and stderr at once; stdout stays free for `--json` output.
struct DualWriter {
    file: std::fs::File,
    stderr: io::Stderr,
}

impl Write for DualWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stderr.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stderr.flush()?;
        Ok(())
    }
}

/// Initialize logging. `AURORA_LOG_FILE` additionally tees every line into that file;
/// `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    match std::env::var("AURORA_LOG_FILE").ok() {
        Some(path) => {
            if let Err(err) = init_dual_logger(&path) {
                eprintln!("Failed to initialize file logger at '{path}': {err}");
                init_stderr_logger();
            }
        }
        None => init_stderr_logger(),
    }
}

fn init_stderr_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Stderr)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn init_dual_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let dual_writer = DualWriter {
        file,
        stderr: io::stderr(),
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(dual_writer)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("Logging to {path} and stderr");

    Ok(())
}
