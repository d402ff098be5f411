use std::error::Error;
use std::fmt::{Display, Formatter};

pub type JobResult<T> = Result<T, SimJobError>;

/// What went wrong while building or running a job from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimJobErrorCategory {
    /// Parameters, settings or command-line arguments were rejected.
    InputValidationError,
    /// A sandbox, input or retrieved file could not be read or written.
    IoSystemError,
}

impl SimJobErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InputValidationError => 2,
            Self::IoSystemError => 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::InputValidationError => "InputValidationError",
            Self::IoSystemError => "IoSystemError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimJobError {
    category: SimJobErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl SimJobError {
    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self {
            category: SimJobErrorCategory::InputValidationError,
            placeholder,
            message: message.into(),
        }
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self {
            category: SimJobErrorCategory::IoSystemError,
            placeholder,
            message: message.into(),
        }
    }

    pub const fn category(&self) -> SimJobErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!("ERROR: [{}] {}", self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}

impl Display for SimJobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.label(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for SimJobError {}
