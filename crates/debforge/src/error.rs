use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingCapability,
    StagingConflict,
    DescriptorError,
    BuildStepFailure,
    LayoutError,
    PackagingFailure,
    ArtifactNotFound,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingCapability => "MissingCapability",
            ErrorKind::StagingConflict => "StagingConflict",
            ErrorKind::DescriptorError => "DescriptorError",
            ErrorKind::BuildStepFailure => "BuildStepFailure",
            ErrorKind::LayoutError => "LayoutError",
            ErrorKind::PackagingFailure => "PackagingFailure",
            ErrorKind::ArtifactNotFound => "ArtifactNotFound",
            ErrorKind::Config => "Config",
            ErrorKind::Io => "Io",
        }
    }

    /// Process exit status reported by the binary for this kind. Never zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Config => 2,
            ErrorKind::MissingCapability => 10,
            ErrorKind::StagingConflict => 11,
            ErrorKind::DescriptorError => 12,
            ErrorKind::BuildStepFailure => 13,
            ErrorKind::LayoutError => 14,
            ErrorKind::PackagingFailure => 15,
            ErrorKind::ArtifactNotFound => 16,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("capability '{capability}' is not available: {detail}")]
    MissingCapability { capability: String, detail: String },

    #[error("staging root {} is not empty (rerun with --clean to discard it)", root.display())]
    StagingConflict { root: PathBuf },

    #[error("{detail}")]
    Descriptor { detail: String },

    #[error("build command `{command}` failed ({})", describe_status(*status))]
    BuildStep {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("{detail}")]
    Layout { detail: String },

    #[error("{detail}")]
    Packaging { detail: String, output: String },

    #[error("no archive at expected path {}", expected.display())]
    ArtifactNotFound { expected: PathBuf },

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(String),
}

fn describe_status(status: Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".into(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingCapability { .. } => ErrorKind::MissingCapability,
            Error::StagingConflict { .. } => ErrorKind::StagingConflict,
            Error::Descriptor { .. } => ErrorKind::DescriptorError,
            Error::BuildStep { .. } => ErrorKind::BuildStepFailure,
            Error::Layout { .. } => ErrorKind::LayoutError,
            Error::Packaging { .. } => ErrorKind::PackagingFailure,
            Error::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Captured tool output attached to the error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::BuildStep { output, .. } | Error::Packaging { output, .. } => {
                Some(output.as_str()).filter(|s| !s.trim().is_empty())
            }
            _ => None,
        }
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Error::Config(msg.into())
    }

    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Error::Io(msg.into())
    }

    pub fn descriptor<M: Into<String>>(msg: M) -> Self {
        Error::Descriptor { detail: msg.into() }
    }

    pub fn layout<M: Into<String>>(msg: M) -> Self {
        Error::Layout { detail: msg.into() }
    }

    pub fn packaging<M: Into<String>>(msg: M) -> Self {
        Error::Packaging {
            detail: msg.into(),
            output: String::new(),
        }
    }

    pub fn io_at(action: &str, path: &Path, err: std::io::Error) -> Self {
        Error::Io(format!("failed to {action} {}: {err}", path.display()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let kinds = [
            ErrorKind::MissingCapability,
            ErrorKind::StagingConflict,
            ErrorKind::DescriptorError,
            ErrorKind::BuildStepFailure,
            ErrorKind::LayoutError,
            ErrorKind::PackagingFailure,
            ErrorKind::ArtifactNotFound,
            ErrorKind::Config,
            ErrorKind::Io,
        ];
        let mut seen = std::collections::BTreeSet::new();
        for k in kinds {
            assert_ne!(k.exit_code(), 0, "{k}");
            assert!(seen.insert(k.exit_code()), "duplicate exit code for {k}");
        }
    }

    #[test]
    fn build_step_message_names_command_and_status() {
        let err = Error::BuildStep {
            command: "pybuild --build".into(),
            status: Some(2),
            output: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::BuildStepFailure);
        assert_eq!(
            err.to_string(),
            "build command `pybuild --build` failed (exit status 2)"
        );
        assert_eq!(err.output(), Some("boom"));
    }
}
