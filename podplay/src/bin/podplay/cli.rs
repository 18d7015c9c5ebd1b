use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_FILE_ENV: &str = "PODPLAY_LOG_FILE";

/// Options de la ligne de commande
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Options {
    pub feed_url: String,
    pub config_dir: Option<String>,
    pub null_output: bool,
    pub device: Option<String>,
}

pub enum Command {
    Run(Options),
    Help,
    Version,
}

pub fn usage() -> String {
    format!(
        "Usage: podplay [--config-dir DIR] [--null-output] [--device NAME] <FEED_URL>\n\n\
         Options:\n  \
         --config-dir DIR  directory holding config.yaml (default: $PODPLAY_CONFIG, ./.podplay, ~/.podplay)\n  \
         --null-output     decode and pace playback without opening an audio device\n  \
         --device NAME     audio output device name\n  \
         -h, --help        print this help\n  \
         -V, --version     print the version\n\n\
         Logs: RUST_LOG filters, {LOG_FILE_ENV} redirects them to a file."
    )
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command> {
    let mut args = args.into_iter();
    let mut options = Options::default();
    let mut feed_url = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config-dir" => {
                let value = args.next().ok_or_else(|| anyhow!("--config-dir requires a value"))?;
                options.config_dir = Some(value);
            }
            "--device" => {
                let value = args.next().ok_or_else(|| anyhow!("--device requires a value"))?;
                options.device = Some(value);
            }
            "--null-output" => options.null_output = true,
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other => {
                if feed_url.replace(other.to_string()).is_some() {
                    bail!("only one feed URL can be given");
                }
            }
        }
    }

    options.feed_url = feed_url.ok_or_else(|| anyhow!("missing feed URL"))?;
    Ok(Command::Run(options))
}

/// Installe le subscriber : `RUST_LOG` sinon le niveau configuré
pub fn init_tracing(min_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(min_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(log_writer())
        .try_init();
}

fn log_writer() -> BoxMakeWriter {
    if let Ok(path) = env::var(LOG_FILE_ENV) {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let shared = SharedLogWriter::new(file);
                return BoxMakeWriter::new(move || shared.clone());
            }
            Err(err) => {
                eprintln!("Cannot open {path} for logs: {err}. Falling back to stderr");
            }
        }
    }
    BoxMakeWriter::new(io::stderr)
}

#[derive(Clone)]
struct SharedLogWriter {
    inner: Arc<Mutex<File>>,
}

impl SharedLogWriter {
    fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().map_err(|err| io::Error::other(err.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().map_err(|err| io::Error::other(err.to_string()))?;
        guard.flush()
    }
}
