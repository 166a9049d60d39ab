use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

pub struct LogSettings<'a> {
    pub log_dir: &'a Path,
    pub component: &'a str,
    pub debug: bool,
    pub mirror_stdout: bool,
}

/// Installs the global subscriber. Returns `None` when one is already set.
pub fn init_logging(settings: &LogSettings<'_>) -> Option<LogGuard> {
    let level = if settings.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PILOT_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(settings.log_dir, settings.component) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let mirror_stdout = settings.mirror_stdout;
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), mirror_stdout));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

struct MultiWriter {
    stdout: Option<io::Stdout>,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>, mirror_stdout: bool) -> Self {
        Self {
            stdout: mirror_stdout.then(io::stdout),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(stdout) = self.stdout.as_mut() {
            let _ = stdout.write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stdout) = self.stdout.as_mut() {
            let _ = stdout.flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &Path, component: &str) -> io::Result<LogGuard> {
    if log_dir.as_os_str().is_empty() {
        return Ok(LogGuard { file: None });
    }
    if std::fs::create_dir_all(log_dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = log_dir.join(format!("strategy-pilot-{}.log", sanitize_component(component)));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

pub fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
