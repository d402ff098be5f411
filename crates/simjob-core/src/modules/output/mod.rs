//! Output parsing pipeline.
//!
//! A parse call runs the XML decoder, then the stdout decoder, merges both
//! partial results and classifies the run with a single [`ExitCode`]. Every
//! failure is reported through the returned [`ParseOutcome`]; decoder panics
//! are caught and downgraded to [`ExitCode::UnexpectedParserException`].

mod stdout;
pub mod xml;

pub use stdout::{OUT_OF_WALLTIME_LABEL, STDOUT_INCOMPLETE_LABEL, decode_stdout};
pub use xml::{XmlDecodeError, XmlSchemaGeneration, decode_xml};

use crate::common::CodeProfile;
use crate::domain::{JobResult, Parameters, ResultRecord, SimJobError};
use crate::modules::exit_codes::ExitCode;
use crate::modules::logs::LogContainer;
use crate::modules::retrieved::RetrievedFiles;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Options read from `settings['PARSER_OPTIONS']`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParserOptions {
    /// Log messages that are kept in the outcome but not forwarded to `tracing`.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl ParserOptions {
    pub fn from_value(value: Value) -> JobResult<Self> {
        serde_json::from_value(value).map_err(|source| {
            SimJobError::input_validation(
                "INPUT.PARSER_OPTIONS",
                format!("invalid settings['PARSER_OPTIONS']: {source}"),
            )
        })
    }
}

pub struct ParseRequest<'a> {
    pub retrieved: &'a dyn RetrievedFiles,
    pub temporary: Option<&'a dyn RetrievedFiles>,
    pub requires_temporary: bool,
    pub output_filename: Option<String>,
    pub parameters: Parameters,
    pub parser_options: ParserOptions,
    pub without_xml: bool,
}

impl<'a> ParseRequest<'a> {
    pub fn new(retrieved: &'a dyn RetrievedFiles) -> Self {
        Self {
            retrieved,
            temporary: None,
            requires_temporary: false,
            output_filename: None,
            parameters: Parameters::new(),
            parser_options: ParserOptions::default(),
            without_xml: false,
        }
    }

    pub fn with_temporary(mut self, temporary: &'a dyn RetrievedFiles) -> Self {
        self.temporary = Some(temporary);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub output_parameters: Option<ResultRecord>,
    pub logs: LogContainer,
    pub exit_code: Option<ExitCode>,
}

impl ParseOutcome {
    fn failed(exit_code: ExitCode, logs: LogContainer) -> Self {
        Self {
            output_parameters: None,
            logs,
            exit_code: Some(exit_code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code.is_none()
    }

    pub fn is_fatal(&self) -> bool {
        self.exit_code.is_some_and(ExitCode::is_fatal)
    }
}

/// Both decoders produced the same key with different values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("key '{key}' holds different values in the XML and stdout results")]
pub struct MergeConflict {
    pub key: String,
}

/// Union of the two partial results. Shared keys must agree.
pub fn merge_partial_results(
    xml: ResultRecord,
    stdout: ResultRecord,
) -> Result<ResultRecord, MergeConflict> {
    let mut merged = xml;
    for (key, value) in stdout {
        match merged.get(&key) {
            Some(existing) if existing != &value => return Err(MergeConflict { key }),
            Some(_) => {}
            None => {
                merged.insert(key, value);
            }
        }
    }
    Ok(merged)
}

/// Picks the exit code from the stdout log and the per-stage codes.
pub fn classify(
    stdout_logs: &LogContainer,
    stdout_code: Option<ExitCode>,
    xml_code: Option<ExitCode>,
) -> Option<ExitCode> {
    let out_of_walltime = stdout_logs.has_error(OUT_OF_WALLTIME_LABEL);
    if out_of_walltime && stdout_logs.has_error(STDOUT_INCOMPLETE_LABEL) {
        return Some(ExitCode::InterruptedByTimeout);
    }
    if out_of_walltime {
        return Some(ExitCode::OutOfWalltime);
    }
    match (stdout_code, xml_code) {
        (Some(_), Some(_)) => Some(ExitCode::BothOutputsUnusable),
        (Some(code), None) | (None, Some(code)) => Some(code),
        (None, None) => None,
    }
}

struct StageOutput {
    record: ResultRecord,
    logs: LogContainer,
    exit_code: Option<ExitCode>,
}

impl StageOutput {
    fn empty() -> Self {
        Self {
            record: ResultRecord::new(),
            logs: LogContainer::new(),
            exit_code: None,
        }
    }

    fn failed(exit_code: ExitCode, logs: LogContainer) -> Self {
        Self {
            record: ResultRecord::new(),
            logs,
            exit_code: Some(exit_code),
        }
    }
}

pub fn parse_output(profile: &CodeProfile, request: &ParseRequest<'_>) -> ParseOutcome {
    let span = tracing::info_span!("parse_output", entry_point = %profile.entry_point);
    let _entered = span.enter();

    if request.requires_temporary && request.temporary.is_none() {
        tracing::debug!("temporary folder was requested but not retrieved");
        return ParseOutcome::failed(ExitCode::MissingTempFolder, LogContainer::new());
    }

    let xml = parse_xml_stage(profile, request);
    let stdout = parse_stdout_stage(profile, request, &xml.record);
    let mut exit_code = classify(&stdout.logs, stdout.exit_code, xml.exit_code);

    let mut logs = stdout.logs;
    logs.extend(xml.logs);
    let mut output_parameters = match merge_partial_results(xml.record, stdout.record) {
        Ok(merged) => Some(merged),
        Err(conflict) => {
            logs.critical(conflict.to_string());
            exit_code = Some(ExitCode::UnexpectedParserException);
            None
        }
    };
    logs.emit(&request.parser_options.ignore);

    if exit_code.is_some_and(ExitCode::is_fatal) {
        output_parameters = None;
    }
    tracing::debug!(
        exit_code = exit_code.map(ExitCode::label).unwrap_or("SUCCESS"),
        "classified parse outcome"
    );

    ParseOutcome {
        output_parameters,
        logs,
        exit_code,
    }
}

fn parse_xml_stage(profile: &CodeProfile, request: &ParseRequest<'_>) -> StageOutput {
    let matchers = match xml_matchers(&profile.xml_filenames) {
        Ok(matchers) => matchers,
        Err(source) => {
            let mut logs = LogContainer::new();
            logs.critical(format!("invalid XML filename pattern: {source}"));
            return StageOutput::failed(ExitCode::UnexpectedParserException, logs);
        }
    };
    let candidates: Vec<String> = request
        .retrieved
        .list_object_names()
        .into_iter()
        .filter(|name| matchers.iter().any(|matcher| matcher.is_match(name)))
        .collect();
    tracing::debug!(candidates = candidates.len(), "collected XML candidates");

    let name = match candidates.as_slice() {
        [] if request.without_xml => return StageOutput::empty(),
        [] => return StageOutput::failed(ExitCode::XmlMissing, LogContainer::new()),
        [single] => single,
        _ => return StageOutput::failed(ExitCode::XmlMultiple, LogContainer::new()),
    };

    let bytes = match request.retrieved.read_object(name) {
        Ok(bytes) => bytes,
        Err(source) => {
            let mut logs = LogContainer::new();
            logs.error(format!("failed to read '{name}': {source}"));
            return StageOutput::failed(ExitCode::XmlUnreadable, logs);
        }
    };

    match catch_unwind(AssertUnwindSafe(|| decode_xml(&bytes, request.temporary))) {
        Ok(Ok((record, logs))) => StageOutput {
            record,
            logs,
            exit_code: None,
        },
        Ok(Err(error)) => {
            let mut logs = LogContainer::new();
            let exit_code = match &error {
                XmlDecodeError::Read(_) => ExitCode::XmlUnreadable,
                XmlDecodeError::Parse(_) => ExitCode::XmlUnparseable,
                XmlDecodeError::UnsupportedFormat(_) => ExitCode::XmlUnsupportedFormat,
                XmlDecodeError::Unexpected(_) => ExitCode::UnexpectedParserException,
            };
            if exit_code == ExitCode::UnexpectedParserException {
                logs.critical(format!("decoding '{name}' failed: {error}"));
            } else {
                logs.error(format!("decoding '{name}' failed: {error}"));
            }
            StageOutput::failed(exit_code, logs)
        }
        Err(payload) => {
            let mut logs = LogContainer::new();
            logs.critical(format!(
                "XML decoder panicked on '{name}': {}",
                panic_message(payload.as_ref())
            ));
            StageOutput::failed(ExitCode::UnexpectedParserException, logs)
        }
    }
}

fn parse_stdout_stage(
    profile: &CodeProfile,
    request: &ParseRequest<'_>,
    xml_partial: &ResultRecord,
) -> StageOutput {
    let filename = request
        .output_filename
        .as_deref()
        .unwrap_or(&profile.default_output_filename);

    if !request.retrieved.contains(filename) {
        return StageOutput::failed(ExitCode::StdoutMissing, LogContainer::new());
    }
    let bytes = match request.retrieved.read_object(filename) {
        Ok(bytes) => bytes,
        Err(source) => {
            let mut logs = LogContainer::new();
            logs.error(format!("failed to read '{filename}': {source}"));
            return StageOutput::failed(ExitCode::StdoutUnreadable, logs);
        }
    };
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(source) => {
            let mut logs = LogContainer::new();
            logs.error(format!("'{filename}' is not valid UTF-8: {source}"));
            return StageOutput::failed(ExitCode::StdoutUnparseable, logs);
        }
    };
    tracing::debug!(filename, bytes = text.len(), "decoding stdout");

    let decoded = catch_unwind(AssertUnwindSafe(|| {
        decode_stdout(
            profile.stdout_dialect,
            &text,
            &request.parameters,
            xml_partial,
        )
    }));
    let mut stage = match decoded {
        Ok((record, logs)) => StageOutput {
            record,
            logs,
            exit_code: None,
        },
        Err(payload) => {
            let mut logs = LogContainer::new();
            logs.critical(format!(
                "stdout decoder panicked on '{filename}': {}",
                panic_message(payload.as_ref())
            ));
            StageOutput::failed(ExitCode::UnexpectedParserException, logs)
        }
    };

    if stage.logs.has_error(STDOUT_INCOMPLETE_LABEL) {
        stage.exit_code = Some(ExitCode::StdoutIncomplete);
    }
    stage
}

fn xml_matchers(patterns: &[String]) -> Result<Vec<GlobMatcher>, globset::Error> {
    patterns
        .iter()
        .map(|pattern| Glob::new(pattern).map(|glob| glob.compile_matcher()))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MergeConflict, OUT_OF_WALLTIME_LABEL, ParserOptions, STDOUT_INCOMPLETE_LABEL, classify,
        merge_partial_results, panic_message, xml_matchers,
    };
    use crate::domain::ResultRecord;
    use crate::modules::exit_codes::ExitCode;
    use crate::modules::logs::LogContainer;
    use serde_json::json;

    fn record(entries: &[(&str, serde_json::Value)]) -> ResultRecord {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn merge_is_a_union_that_rejects_disagreement() {
        let merged = merge_partial_results(
            record(&[("fermi_energy", json!(5.1)), ("creator_name", json!("pw"))]),
            record(&[("fermi_energy", json!(5.1)), ("wall_time_seconds", json!(2.0))]),
        )
        .expect("identical shared keys merge");
        assert_eq!(merged.len(), 3);
        assert_eq!(merged["fermi_energy"], json!(5.1));

        let conflict = merge_partial_results(
            record(&[("fermi_energy", json!(5.1))]),
            record(&[("fermi_energy", json!(5.2))]),
        )
        .expect_err("differing shared keys conflict");
        assert_eq!(
            conflict,
            MergeConflict {
                key: "fermi_energy".to_string()
            }
        );
    }

    #[test]
    fn classification_precedence() {
        let mut interrupted = LogContainer::new();
        interrupted.error(OUT_OF_WALLTIME_LABEL);
        interrupted.error(STDOUT_INCOMPLETE_LABEL);
        assert_eq!(
            classify(&interrupted, Some(ExitCode::StdoutIncomplete), None),
            Some(ExitCode::InterruptedByTimeout)
        );

        let mut walltime = LogContainer::new();
        walltime.error(OUT_OF_WALLTIME_LABEL);
        assert_eq!(
            classify(&walltime, None, Some(ExitCode::XmlMissing)),
            Some(ExitCode::OutOfWalltime)
        );

        let clean = LogContainer::new();
        assert_eq!(
            classify(
                &clean,
                Some(ExitCode::StdoutMissing),
                Some(ExitCode::XmlMissing)
            ),
            Some(ExitCode::BothOutputsUnusable)
        );
        assert_eq!(
            classify(&clean, Some(ExitCode::StdoutIncomplete), None),
            Some(ExitCode::StdoutIncomplete)
        );
        assert_eq!(
            classify(&clean, None, Some(ExitCode::XmlMultiple)),
            Some(ExitCode::XmlMultiple)
        );
        assert_eq!(classify(&clean, None, None), None);
    }

    #[test]
    fn parser_options_reject_unknown_fields() {
        let options = ParserOptions::from_value(json!({"ignore": ["Warning: x"]}))
            .expect("known fields are accepted");
        assert_eq!(options.ignore, vec!["Warning: x".to_string()]);

        let error = ParserOptions::from_value(json!({"silence": true}))
            .expect_err("unknown fields are rejected");
        assert_eq!(error.placeholder(), "INPUT.PARSER_OPTIONS");
    }

    #[test]
    fn xml_patterns_match_names_and_globs() {
        let matchers = xml_matchers(&["data-file-schema.xml".to_string(), "*.save/*.xml".to_string()])
            .expect("patterns compile");
        let matches = |name: &str| matchers.iter().any(|matcher| matcher.is_match(name));
        assert!(matches("data-file-schema.xml"));
        assert!(matches("aiida.save/data-file.xml"));
        assert!(!matches("aiida.out"));

        assert!(xml_matchers(&["[".to_string()]).is_err());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let payload = std::panic::catch_unwind(|| panic!("decoder exploded"))
            .expect_err("closure panics");
        assert_eq!(panic_message(payload.as_ref()), "decoder exploded");
    }
}
