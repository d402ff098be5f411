use serde::Serialize;
use std::fmt::{Display, Formatter};

/// The single named outcome of a parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
pub enum ExitCode {
    MissingTempFolder,
    StdoutMissing,
    XmlMissing,
    XmlMultiple,
    BothOutputsUnusable,
    StdoutUnreadable,
    StdoutUnparseable,
    StdoutIncomplete,
    XmlUnreadable,
    XmlUnparseable,
    XmlUnsupportedFormat,
    InterruptedByTimeout,
    UnexpectedParserException,
    OutOfWalltime,
}

impl ExitCode {
    pub const ALL: [ExitCode; 14] = [
        Self::MissingTempFolder,
        Self::StdoutMissing,
        Self::XmlMissing,
        Self::XmlMultiple,
        Self::BothOutputsUnusable,
        Self::StdoutUnreadable,
        Self::StdoutUnparseable,
        Self::StdoutIncomplete,
        Self::XmlUnreadable,
        Self::XmlUnparseable,
        Self::XmlUnsupportedFormat,
        Self::InterruptedByTimeout,
        Self::UnexpectedParserException,
        Self::OutOfWalltime,
    ];

    pub const fn status(self) -> u16 {
        match self {
            Self::MissingTempFolder => 301,
            Self::StdoutMissing => 302,
            Self::XmlMissing => 303,
            Self::XmlMultiple => 304,
            Self::BothOutputsUnusable => 305,
            Self::StdoutUnreadable => 310,
            Self::StdoutUnparseable => 311,
            Self::StdoutIncomplete => 312,
            Self::XmlUnreadable => 320,
            Self::XmlUnparseable => 321,
            Self::XmlUnsupportedFormat => 322,
            Self::InterruptedByTimeout => 340,
            Self::UnexpectedParserException => 350,
            Self::OutOfWalltime => 400,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::MissingTempFolder => "ERROR_NO_RETRIEVED_TEMPORARY_FOLDER",
            Self::StdoutMissing => "ERROR_OUTPUT_STDOUT_MISSING",
            Self::XmlMissing => "ERROR_OUTPUT_XML_MISSING",
            Self::XmlMultiple => "ERROR_OUTPUT_XML_MULTIPLE",
            Self::BothOutputsUnusable => "ERROR_OUTPUT_FILES",
            Self::StdoutUnreadable => "ERROR_OUTPUT_STDOUT_READ",
            Self::StdoutUnparseable => "ERROR_OUTPUT_STDOUT_PARSE",
            Self::StdoutIncomplete => "ERROR_OUTPUT_STDOUT_INCOMPLETE",
            Self::XmlUnreadable => "ERROR_OUTPUT_XML_READ",
            Self::XmlUnparseable => "ERROR_OUTPUT_XML_PARSE",
            Self::XmlUnsupportedFormat => "ERROR_OUTPUT_XML_FORMAT",
            Self::InterruptedByTimeout => "ERROR_OUT_OF_WALLTIME_INTERRUPTED",
            Self::UnexpectedParserException => "ERROR_UNEXPECTED_PARSER_EXCEPTION",
            Self::OutOfWalltime => "ERROR_OUT_OF_WALLTIME",
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::MissingTempFolder => "The retrieved temporary folder could not be accessed.",
            Self::StdoutMissing => "The retrieved folder did not contain the required stdout output file.",
            Self::XmlMissing => "The retrieved folder did not contain the required XML file.",
            Self::XmlMultiple => "The retrieved folder contained multiple XML files.",
            Self::BothOutputsUnusable => "Both the stdout and XML output files could not be read or parsed.",
            Self::StdoutUnreadable => "The stdout output file could not be read.",
            Self::StdoutUnparseable => "The stdout output file could not be parsed.",
            Self::StdoutIncomplete => "The stdout output file was incomplete probably because the calculation got interrupted.",
            Self::XmlUnreadable => "The XML output file could not be read.",
            Self::XmlUnparseable => "The XML output file could not be parsed.",
            Self::XmlUnsupportedFormat => "The XML output file has an unsupported format.",
            Self::InterruptedByTimeout => "The calculation stopped prematurely because it ran out of walltime but the job was killed by the scheduler before the files were safely written to disk for a potential restart.",
            Self::UnexpectedParserException => "The parser raised an unexpected exception.",
            Self::OutOfWalltime => "The calculation stopped prematurely because it ran out of walltime.",
        }
    }

    /// Whether the outcome invalidates the parsed result. Running out of
    /// walltime with a cleanly written output can be restarted.
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::OutOfWalltime)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.label() == label)
    }
}

impl From<ExitCode> for u16 {
    fn from(code: ExitCode) -> Self {
        code.status()
    }
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label(), self.status())
    }
}
