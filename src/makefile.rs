//! Read variables out of a generated Makefile by asking `make` itself.
//!
//! A one-rule makefile (`print-var:; @echo $(NAME)`) is piped to `make` on stdin ahead of the real
//! Makefile, so make expands the variable with all of the real file's definitions in scope and
//! prints the value. The real Makefile is never modified.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

/// Errors from a makefile variable lookup.
#[derive(Debug, Error)]
pub enum VariableError {
    #[error(
        "Makefile not found at path: {} , maybe you haven't built the Makefile yet or you are in the wrong folder?",
        .0.display()
    )]
    NotFound(PathBuf),

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program} print-var` for {variable} exited with status {}", status_text(.code))]
    NonZeroExit {
        program: String,
        variable: String,
        code: Option<i32>,
    },

    #[error("I/O error talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn status_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Source of build-configuration variables.
///
/// The runner only needs string values; how they are obtained stays behind this trait.
pub trait VariableSource {
    fn variable(&self, name: &str) -> Result<String, VariableError>;
}

/// Variable lookup against a Makefile on disk.
#[derive(Debug, Clone)]
pub struct MakefileVariables {
    makefile: PathBuf,
    program: String,
}

impl MakefileVariables {
    pub fn new(makefile: impl Into<PathBuf>) -> Self {
        Self {
            makefile: makefile.into(),
            program: "make".to_string(),
        }
    }

    /// Use a different make program.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl VariableSource for MakefileVariables {
    fn variable(&self, name: &str) -> Result<String, VariableError> {
        if !self.makefile.is_file() {
            return Err(VariableError::NotFound(self.makefile.clone()));
        }

        // make runs in the Makefile's directory so relative includes resolve; the file is then
        // named relative to that directory.
        let dir = match self.makefile.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = self.makefile.file_name().unwrap_or(self.makefile.as_os_str());

        let mut child = Command::new(&self.program)
            .arg("-f")
            .arg("-")
            .arg("-f")
            .arg(file_name)
            .arg("print-var")
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| VariableError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let io_err = |source| VariableError::Io {
            program: self.program.clone(),
            source,
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("print-var:; @echo $({})", name).as_bytes())
                .map_err(io_err)?;
            // Dropping stdin closes the pipe so make sees EOF.
        }

        let output = child.wait_with_output().map_err(io_err)?;
        if !output.status.success() {
            return Err(VariableError::NonZeroExit {
                program: self.program.clone(),
                variable: name.to_string(),
                code: output.status.code(),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        tracing::debug!(variable = name, value = %value, makefile = %self.makefile.display(), "makefile variable");
        Ok(value)
    }
}
