use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

const CRATES: [&str; 6] = [
    "llmverse",
    "llmverse_agents",
    "llmverse_channels",
    "llmverse_config",
    "llmverse_db",
    "llmverse_common",
];

/// Handle to raise verbosity once the settings file has been read.
pub struct LogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogLevel {
    /// Switch our crates to debug, unless `RUST_LOG` chose the filter.
    pub fn enable_debug(&self) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.handle.reload(default_filter(true)) {
            warn!("failed to raise log level: {e}");
        }
    }
}

fn default_filter(debug: bool) -> EnvFilter {
    if !debug {
        return EnvFilter::new("info");
    }
    let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}=debug")).collect();
    EnvFilter::new(format!("info,{}", directives.join(",")))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `debug`.
pub fn init(debug: bool, json: bool) -> LogLevel {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (default_filter(debug), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(RedactingWriter::stderr())
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(RedactingWriter::stderr())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    LogLevel { handle, from_env }
}

/// A writer that masks credentials before they reach the log output.
pub struct RedactingWriter<W> {
    inner: W,
}

impl RedactingWriter<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            inner: std::io::stderr(),
        }
    }
}

impl<W: std::io::Write> std::io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let original = String::from_utf8_lossy(buf);
        let redacted = redact_secrets(&original);
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter<std::io::Stderr> {
    type Writer = RedactingWriter<std::io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::stderr()
    }
}

/// Replace provider keys, Discord bot tokens and key-bearing query values
/// with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    static SECRETS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?x)
              sk-ant-\S{10,}                                       # Anthropic keys
            | sk-\S{20,}                                           # OpenAI-style keys
            | gsk_\S{20,}                                          # Groq keys
            | [A-Za-z0-9_-]{24,}\.[A-Za-z0-9_-]{6}\.[A-Za-z0-9_-]{27,}  # Discord bot tokens
            ",
        )
        .expect("redaction regex should compile")
    });
    static PARAMS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(appid|api[-_]?key|key)=[^&\s]+")
            .expect("redaction regex should compile")
    });

    let masked = SECRETS.replace_all(input, "[REDACTED]");
    PARAMS.replace_all(&masked, "$1=[REDACTED]").into_owned()
}
