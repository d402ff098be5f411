use super::CliError;
use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use simjob_core::common::CodeProfile;
use simjob_core::domain::{Parameters, SimJobError};
use simjob_core::modules::Settings;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub(super) fn load_profile(code: &str) -> Result<CodeProfile, CliError> {
    Ok(CodeProfile::from_entry_point(code)?)
}

pub(super) fn read_json(path: &Path) -> Result<Value, CliError> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse JSON from '{}'", path.display()))?;
    Ok(value)
}

pub(super) fn read_parameters(path: &Path) -> Result<Parameters, CliError> {
    let value = read_json(path)?;
    serde_json::from_value(value).map_err(|source| {
        CliError::Job(SimJobError::input_validation(
            "INPUT.PARAMETERS",
            format!(
                "'{}' must map namelist names to mappings of flags: {source}",
                path.display()
            ),
        ))
    })
}

pub(super) fn read_optional_parameters(path: Option<&Path>) -> Result<Parameters, CliError> {
    path.map(read_parameters)
        .transpose()
        .map(Option::unwrap_or_default)
}

pub(super) fn read_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    match path {
        Some(path) => Ok(Settings::from_value(read_json(path)?)?),
        None => Ok(Settings::new()),
    }
}

pub(super) fn read_object(path: &Path) -> Result<Map<String, Value>, CliError> {
    match read_json(path)? {
        Value::Object(map) => Ok(map),
        _ => Err(CliError::Job(SimJobError::input_validation(
            "INPUT.PARALLELIZATION_VALUE",
            format!("'{}' must hold a JSON object", path.display()),
        ))),
    }
}

/// Reads `name=path` pairs into auxiliary parameter sets.
pub(super) fn read_auxiliary(pairs: &[String]) -> Result<BTreeMap<String, Parameters>, CliError> {
    let mut auxiliary = BTreeMap::new();
    for pair in pairs {
        let Some((name, path)) = pair.split_once('=') else {
            return Err(CliError::Usage(format!(
                "invalid --auxiliary value '{pair}', expected NAME=FILE"
            )));
        };
        let parameters = read_parameters(&PathBuf::from(path))?;
        if auxiliary.insert(name.to_string(), parameters).is_some() {
            return Err(CliError::Usage(format!(
                "auxiliary input '{name}' is given more than once"
            )));
        }
    }
    Ok(auxiliary)
}

pub(super) fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to serialize command output")?;
    println!("{rendered}");
    Ok(())
}
