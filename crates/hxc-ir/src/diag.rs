//! User-facing diagnostics collected across pipeline stages.

use std::fmt;

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    /// Aborts the pipeline once the current stage completes.
    Error,
    /// Recorded; compilation proceeds with a best-effort fallback.
    Warning,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
        })
    }
}

/// A single diagnostic message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// An ordered log of diagnostics from every stage of one compilation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic at `level`.
    pub fn push(&mut self, level: DiagnosticLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            DiagnosticLevel::Error => log::debug!("error diagnostic: {message}"),
            DiagnosticLevel::Warning => log::warn!("{message}"),
            DiagnosticLevel::Info => log::info!("{message}"),
        }
        self.entries.push(Diagnostic { level, message });
    }

    /// Records an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Error, message);
    }

    /// Records a warning.
    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Warning, message);
    }

    /// Records an informational note.
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(DiagnosticLevel::Info, message);
    }

    /// Returns `true` if any error has been recorded.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error)
    }

    /// Number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
            .count()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded diagnostics.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over diagnostics in the order they were recorded.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.entries.iter()
    }

    /// Consumes the log, returning the recorded diagnostics.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

impl Extend<Diagnostic> for DiagnosticLog {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<'a> IntoIterator for &'a DiagnosticLog {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// One diagnostic per line.
impl fmt::Display for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diag in &self.entries {
            writeln!(f, "{diag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic {
            level: DiagnosticLevel::Warning,
            message: "unrecognized system value input 'SV_Foo'".into(),
        };
        assert_eq!(
            format!("{d}"),
            "[Warning] unrecognized system value input 'SV_Foo'"
        );
    }

    #[test]
    fn log_counts_errors_only() {
        let mut log = DiagnosticLog::new();
        log.warning("w");
        assert!(!log.has_errors());
        log.error("e1");
        log.info("i");
        log.error("e2");
        assert!(log.has_errors());
        assert_eq!(log.error_count(), 2);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn log_display_one_line_per_entry() {
        let mut log = DiagnosticLog::new();
        log.error("shader entry point 'Main' not found");
        log.warning("field 'uv' inherits semantic 'TEXCOORD1'");
        assert_eq!(
            log.to_string(),
            "[Error] shader entry point 'Main' not found\n\
             [Warning] field 'uv' inherits semantic 'TEXCOORD1'\n"
        );
    }
}
