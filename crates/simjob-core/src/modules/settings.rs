use crate::domain::{JobResult, SimJobError, ValueKind};
use crate::modules::output::ParserOptions;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const NAMELISTS_KEY: &str = "NAMELISTS";
pub const CMDLINE_KEY: &str = "CMDLINE";
pub const PARENT_FOLDER_SYMLINK_KEY: &str = "PARENT_FOLDER_SYMLINK";
pub const ONLY_INITIALIZATION_KEY: &str = "ONLY_INITIALIZATION";
pub const ADDITIONAL_RETRIEVE_LIST_KEY: &str = "ADDITIONAL_RETRIEVE_LIST";
pub const PARSER_OPTIONS_KEY: &str = "PARSER_OPTIONS";

/// The auxiliary `settings` mapping of a job. Keys are upper-cased on
/// construction and consumed with the `take_*` accessors; whatever is left
/// when the job is assembled is rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    entries: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> JobResult<Self> {
        let mut entries = BTreeMap::new();
        let mut duplicates = Vec::new();
        for (key, value) in map {
            let normalized = key.to_uppercase();
            if entries.insert(normalized.clone(), value).is_some() {
                duplicates.push(normalized);
            }
        }

        if !duplicates.is_empty() {
            duplicates.sort();
            duplicates.dedup();
            return Err(SimJobError::input_validation(
                "INPUT.SETTINGS_DUPLICATE_KEY",
                format!(
                    "inside the dictionary 'settings' there are keys that are repeated when compared case-insensitively: {}",
                    duplicates.join(",")
                ),
            ));
        }

        Ok(Self { entries })
    }

    pub fn from_value(value: Value) -> JobResult<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(SimJobError::input_validation(
                "INPUT.SETTINGS_TYPE",
                format!(
                    "settings must be a mapping, got a {}",
                    ValueKind::of(&other)
                ),
            )),
        }
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_uppercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Pops `NAMELISTS`; `None` means "use the automatic list".
    pub fn take_namelists(&mut self) -> JobResult<Option<Vec<String>>> {
        match self.entries.remove(NAMELISTS_KEY) {
            None => Ok(None),
            Some(value) => string_list(&value).map(Some).ok_or_else(|| {
                SimJobError::input_validation(
                    "INPUT.NAMELISTS_TYPE",
                    "the 'NAMELISTS' value, if specified in the settings input, must be a list of strings",
                )
            }),
        }
    }

    pub fn take_string_list(&mut self, key: &str) -> JobResult<Vec<String>> {
        match self.entries.remove(key) {
            None => Ok(Vec::new()),
            Some(value) => string_list(&value).ok_or_else(|| {
                SimJobError::input_validation(
                    "INPUT.SETTINGS_TYPE",
                    format!(
                        "settings['{key}'] must be a list of strings, got a {}",
                        ValueKind::of(&value)
                    ),
                )
            }),
        }
    }

    pub fn take_bool(&mut self, key: &str) -> JobResult<Option<bool>> {
        match self.entries.remove(key) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(flag)),
            Some(other) => Err(SimJobError::input_validation(
                "INPUT.SETTINGS_TYPE",
                format!(
                    "settings['{key}'] must be a bool, got a {}",
                    ValueKind::of(&other)
                ),
            )),
        }
    }

    pub fn take_parser_options(&mut self) -> JobResult<Option<ParserOptions>> {
        match self.entries.remove(PARSER_OPTIONS_KEY) {
            None => Ok(None),
            Some(value) => ParserOptions::from_value(value).map(Some),
        }
    }

    /// Reads the parser options without consuming them.
    pub fn parser_options(&self) -> JobResult<ParserOptions> {
        match self.entries.get(PARSER_OPTIONS_KEY) {
            None => Ok(ParserOptions::default()),
            Some(value) => ParserOptions::from_value(value.clone()),
        }
    }

    pub fn ensure_consumed(&self) -> JobResult<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        let unknown_keys = self.keys().collect::<Vec<_>>().join(", ");
        Err(SimJobError::input_validation(
            "INPUT.SETTINGS_UNEXPECTED_KEYS",
            format!("`settings` contained unexpected keys: {unknown_keys}"),
        ))
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{CMDLINE_KEY, ONLY_INITIALIZATION_KEY, Settings};
    use serde_json::json;

    fn settings(value: serde_json::Value) -> Settings {
        Settings::from_value(value).expect("settings should be valid")
    }

    #[test]
    fn keys_are_normalized_to_upper_case() {
        let settings = settings(json!({"cmdline": ["-nk", "2"], "Only_Initialization": true}));
        assert_eq!(
            settings.keys().collect::<Vec<_>>(),
            vec![CMDLINE_KEY, ONLY_INITIALIZATION_KEY]
        );
    }

    #[test]
    fn case_insensitive_duplicates_are_rejected() {
        let error = Settings::from_value(json!({"cmdline": [], "CMDLINE": []}))
            .expect_err("duplicate keys should fail");
        assert_eq!(error.placeholder(), "INPUT.SETTINGS_DUPLICATE_KEY");
        assert!(error.message().contains("CMDLINE"));
    }

    #[test]
    fn non_mapping_settings_are_rejected() {
        let error = Settings::from_value(json!(["NAMELISTS"])).expect_err("list should fail");
        assert_eq!(error.placeholder(), "INPUT.SETTINGS_TYPE");
    }

    #[test]
    fn namelists_must_be_a_list_of_strings() {
        let mut valid = settings(json!({"NAMELISTS": ["METHOD", "MODEL"]}));
        assert_eq!(
            valid.take_namelists().expect("namelists"),
            Some(vec!["METHOD".to_string(), "MODEL".to_string()])
        );
        assert!(valid.is_empty());

        let mut invalid = settings(json!({"NAMELISTS": "METHOD"}));
        let error = invalid
            .take_namelists()
            .expect_err("string namelists should fail");
        assert_eq!(error.placeholder(), "INPUT.NAMELISTS_TYPE");
    }

    #[test]
    fn typed_accessors_validate_value_types() {
        let mut settings = settings(json!({"PARENT_FOLDER_SYMLINK": "yes"}));
        let error = settings
            .take_bool("PARENT_FOLDER_SYMLINK")
            .expect_err("string flag should fail");
        assert_eq!(error.placeholder(), "INPUT.SETTINGS_TYPE");
        assert_eq!(settings.take_bool("PARENT_FOLDER_SYMLINK").expect("gone"), None);
    }

    #[test]
    fn leftover_keys_are_reported() {
        let mut settings = settings(json!({"CMDLINE": [], "FIXED_COORDS": [], "EXTRA": 1}));
        settings.take_string_list(CMDLINE_KEY).expect("cmdline");
        let error = settings
            .ensure_consumed()
            .expect_err("leftover keys should fail");
        assert_eq!(error.placeholder(), "INPUT.SETTINGS_UNEXPECTED_KEYS");
        assert_eq!(
            error.message(),
            "`settings` contained unexpected keys: EXTRA, FIXED_COORDS"
        );
    }

    #[test]
    fn parser_options_are_read_without_being_consumed() {
        let settings = settings(json!({"parser_options": {"ignore": ["Warning: x"]}}));
        let options = settings.parser_options().expect("options");
        assert_eq!(options.ignore, vec!["Warning: x".to_string()]);
        assert!(!settings.is_empty());
    }
}
