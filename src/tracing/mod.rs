pub(crate) mod shim_macros;
pub mod tracing_subscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(feature = "build-tracing")]
impl Severity {
    pub fn from_tracing_level(level: ::tracing::Level) -> Self {
        match level {
            ::tracing::Level::TRACE => Self::Trace,
            ::tracing::Level::DEBUG => Self::Debug,
            ::tracing::Level::INFO => Self::Info,
            ::tracing::Level::WARN => Self::Warn,
            _ => Self::Error,
        }
    }
    pub fn into_tracing_level(&self) -> ::tracing::Level {
        match self {
            Severity::Trace => ::tracing::Level::TRACE,
            Severity::Debug => ::tracing::Level::DEBUG,
            Severity::Info => ::tracing::Level::INFO,
            Severity::Warn => ::tracing::Level::WARN,
            Severity::Error => ::tracing::Level::ERROR,
        }
    }
}
