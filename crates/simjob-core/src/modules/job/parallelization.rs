use crate::common::{CodeProfile, ParallelizationFlag};
use crate::domain::{JobResult, SimJobError, ValueKind};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Validated `parallelization` input: enabled flag to its integer value.
pub type Parallelization = BTreeMap<ParallelizationFlag, i64>;

pub fn validate_parallelization(
    profile: &CodeProfile,
    value: &Map<String, Value>,
) -> JobResult<Parallelization> {
    let unknown_flags: Vec<&str> = value
        .keys()
        .filter(|name| {
            ParallelizationFlag::from_name(name)
                .is_none_or(|flag| !profile.enabled_parallelization_flags.contains(&flag))
        })
        .map(String::as_str)
        .collect();
    if !unknown_flags.is_empty() {
        let allowed = profile
            .enabled_parallelization_flags
            .iter()
            .map(|flag| flag.name())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SimJobError::input_validation(
            "INPUT.PARALLELIZATION_UNKNOWN_FLAG",
            format!(
                "unknown flags in 'parallelization': {}, allowed flags are [{allowed}]",
                unknown_flags.join(", ")
            ),
        ));
    }

    let mut parallelization = Parallelization::new();
    let mut invalid_values = Vec::new();
    for (name, flag_value) in value {
        match (ParallelizationFlag::from_name(name), flag_value.as_i64()) {
            (Some(flag), Some(count)) => {
                parallelization.insert(flag, count);
            }
            _ => invalid_values.push(format!("{name}={flag_value} ({})", ValueKind::of(flag_value))),
        }
    }
    if !invalid_values.is_empty() {
        return Err(SimJobError::input_validation(
            "INPUT.PARALLELIZATION_VALUE",
            format!(
                "parallelization values must be integers; got invalid values {}",
                invalid_values.join(", ")
            ),
        ));
    }

    Ok(parallelization)
}

/// Appends structured parallelization flags to the raw command-line tokens.
///
/// A flag may come from the raw tokens (under any one alias) or from the
/// structured input, never from both.
pub fn add_parallelization_flags(
    profile: &CodeProfile,
    cmdline_params: &[String],
    parallelization: &Parallelization,
) -> JobResult<Vec<String>> {
    let mut result = cmdline_params.to_vec();
    let normalized: Vec<&str> = cmdline_params
        .iter()
        .flat_map(|param| param.split_whitespace())
        .collect();

    for flag in &profile.enabled_parallelization_flags {
        let aliases_in_cmdline: Vec<&str> = flag
            .aliases()
            .iter()
            .copied()
            .chain(std::iter::once(flag.name()))
            .filter(|alias| {
                normalized
                    .iter()
                    .any(|token| token.strip_prefix('-') == Some(*alias))
            })
            .collect();

        if !aliases_in_cmdline.is_empty() {
            if aliases_in_cmdline.len() > 1 {
                return Err(SimJobError::input_validation(
                    "INPUT.PARALLELIZATION_ALIASES",
                    format!(
                        "conflicting parallelization flags [{}] in settings['CMDLINE']",
                        aliases_in_cmdline.join(", ")
                    ),
                ));
            }
            if parallelization.contains_key(flag) {
                return Err(SimJobError::input_validation(
                    "INPUT.PARALLELIZATION_CONFLICT",
                    format!(
                        "parallelization flag '{}' specified in settings['CMDLINE'] conflicts with '{}' in the 'parallelization' input",
                        aliases_in_cmdline[0],
                        flag.name()
                    ),
                ));
            }
            warn!(
                alias = aliases_in_cmdline[0],
                "specifying the parallelization flags through settings['CMDLINE'] is deprecated, use the 'parallelization' input instead"
            );
            continue;
        }

        if let Some(count) = parallelization.get(flag) {
            result.push(format!("-{}", flag.name()));
            result.push(count.to_string());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::{Parallelization, add_parallelization_flags, validate_parallelization};
    use crate::common::{CodeProfile, ParallelizationFlag};
    use serde_json::{Map, Value, json};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("fixture should be a mapping")
    }

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn structured_flags_follow_definition_order() {
        let profile = CodeProfile::mpet_run();
        let parallelization =
            validate_parallelization(&profile, &map(json!({"ndiag": 4, "npool": 2})))
                .expect("valid parallelization");
        let cmdline = add_parallelization_flags(&profile, &tokens(&["-v"]), &parallelization)
            .expect("flags should be added");
        assert_eq!(cmdline, tokens(&["-v", "-npool", "2", "-ndiag", "4"]));
    }

    #[test]
    fn disabled_or_unknown_flags_are_rejected() {
        let profile = CodeProfile::mpet_run();
        let error = validate_parallelization(&profile, &map(json!({"nimage": 2, "bogus": 1})))
            .expect_err("flags outside the enabled set should fail");
        assert_eq!(error.placeholder(), "INPUT.PARALLELIZATION_UNKNOWN_FLAG");
        assert!(error.message().contains("bogus, nimage"));
        assert!(error.message().contains("[npool, nband, ntg, ndiag]"));
    }

    #[test]
    fn non_integer_values_are_rejected() {
        let profile = CodeProfile::mpet_run();
        let error = validate_parallelization(&profile, &map(json!({"npool": 2.5})))
            .expect_err("float value should fail");
        assert_eq!(error.placeholder(), "INPUT.PARALLELIZATION_VALUE");
    }

    #[test]
    fn two_aliases_in_cmdline_conflict() {
        let profile = CodeProfile::mpet_run();
        for pair in [["-nk 2", "-npools 2"], ["-nk", "-npool"], ["-nb 2", "-nbgrp 2"]] {
            let error =
                add_parallelization_flags(&profile, &tokens(&pair), &Parallelization::new())
                    .expect_err("two aliases should fail");
            assert_eq!(error.placeholder(), "INPUT.PARALLELIZATION_ALIASES");
        }
    }

    #[test]
    fn alias_plus_structured_input_conflict_names_both() {
        let profile = CodeProfile::mpet_run();
        let mut parallelization = Parallelization::new();
        parallelization.insert(ParallelizationFlag::Npool, 4);
        let error =
            add_parallelization_flags(&profile, &tokens(&["-nk", "2"]), &parallelization)
                .expect_err("alias and structured flag should conflict");
        assert_eq!(error.placeholder(), "INPUT.PARALLELIZATION_CONFLICT");
        assert!(error.message().contains("'nk'"));
        assert!(error.message().contains("'npool'"));
    }

    #[test]
    fn single_cmdline_alias_is_kept_verbatim() {
        let profile = CodeProfile::mpet_run();
        let cmdline =
            add_parallelization_flags(&profile, &tokens(&["-nk 2"]), &Parallelization::new())
                .expect("deprecated alias should be accepted");
        assert_eq!(cmdline, tokens(&["-nk 2"]));
    }
}
