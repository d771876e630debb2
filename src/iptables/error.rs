use std::io::Error as IoError;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IptablesError>;

#[derive(Error, Debug)]
pub enum IptablesError {
    #[error("Failed to execute '{program}'")]
    Execution {
        program: String,
        #[source]
        inner: IoError,
    },

    #[error("Invalid UTF-8 output from '{program}'")]
    OutputEncoding {
        program: String,
        #[source]
        inner: FromUtf8Error,
    },

    #[error("'{program} {}' failed with status {exit_code:?}: {stderr}", args.join(" "))]
    CommandFailed {
        program: String,
        args: Vec<String>,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to restore table '{table}': {stderr}")]
    RestoreFailed { table: String, stderr: String },

    #[error("Failed to record iptables invocation: {context}")]
    Record {
        context: String,
        #[source]
        inner: IoError,
    },
}

impl IptablesError {
    pub fn execution(program: impl Into<String>, error: IoError) -> Self {
        Self::Execution {
            program: program.into(),
            inner: error,
        }
    }

    pub fn encoding(program: impl Into<String>, error: FromUtf8Error) -> Self {
        Self::OutputEncoding {
            program: program.into(),
            inner: error,
        }
    }

    pub fn command_failed(
        program: impl Into<String>,
        args: &[String],
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            program: program.into(),
            args: args.to_vec(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn restore_failed(table: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::RestoreFailed {
            table: table.into(),
            stderr: stderr.into(),
        }
    }

    pub fn record(context: impl Into<String>, error: IoError) -> Self {
        Self::Record {
            context: context.into(),
            inner: error,
        }
    }

    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::CommandFailed { stderr, .. } if stderr.contains("Permission denied")
            || stderr.contains("Operation not permitted"))
    }
}
