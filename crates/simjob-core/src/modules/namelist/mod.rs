mod encoding;
mod parser;

pub use encoding::{encode_value, format_float, namelist_entry, quote};
pub use parser::read_namelist_input;

use crate::common::CodeProfile;
use crate::domain::{JobResult, Parameters, SimJobError};
use tracing::debug;

/// Produces the main input file of a job.
///
/// `namelists` is the explicit `NAMELISTS` override; without it the list is
/// looked up from the profile by calculation type. Blocked keywords are
/// enforced before anything is rendered.
pub fn generate_input(
    profile: &CodeProfile,
    parameters: &Parameters,
    namelists: Option<&[String]>,
) -> JobResult<String> {
    let mut input_params = parameters.clone();
    apply_blocked_keywords(profile, &mut input_params)?;

    let namelists_toprint: Vec<String> = match namelists {
        Some(names) => names.to_vec(),
        None => {
            let calculation_type = profile.calculation_type.resolve(&input_params)?;
            profile
                .automatic_namelists_for(&calculation_type)
                .map(<[String]>::to_vec)
                .ok_or_else(|| {
                    SimJobError::input_validation(
                        "INPUT.CALCULATION_TYPE",
                        format!(
                            "unknown calculation type '{calculation_type}'; specify the list of namelists using NAMELISTS in the settings"
                        ),
                    )
                })?
        }
    };

    format_namelists(input_params, &namelists_toprint)
}

/// Renders the requested namelists in order and fails if `parameters` holds
/// any namelist that was not requested.
pub fn format_namelists(mut parameters: Parameters, namelists: &[String]) -> JobResult<String> {
    let mut inputfile = String::new();
    for namelist_name in namelists {
        inputfile.push_str(namelist_name);
        inputfile.push('\n');

        // a requested namelist that was not provided is written empty
        let namelist = parameters.remove(namelist_name).unwrap_or_default();
        debug!(namelist = %namelist_name, entries = namelist.len(), "writing namelist");
        for (key, value) in &namelist {
            inputfile.push_str(&namelist_entry(key, value)?);
        }
        inputfile.push('\n');
    }

    if !parameters.is_empty() {
        let leftover = parameters.keys().cloned().collect::<Vec<_>>().join(",");
        return Err(SimJobError::input_validation(
            "INPUT.UNKNOWN_NAMELIST",
            format!(
                "the following namelists are specified in the parameters, but are not valid namelists for the current type of calculation: {leftover}"
            ),
        ));
    }

    Ok(inputfile)
}

fn apply_blocked_keywords(profile: &CodeProfile, parameters: &mut Parameters) -> JobResult<()> {
    for blocked in &profile.blocked_keywords {
        if let Some(namelist) = parameters.get(&blocked.namelist) {
            if namelist
                .keys()
                .any(|key| strip_index(key) == blocked.flag)
            {
                return Err(SimJobError::input_validation(
                    "INPUT.BLOCKED_KEYWORD",
                    format!(
                        "you cannot specify explicitly the '{}' flag in the '{}' namelist or card",
                        blocked.flag, blocked.namelist
                    ),
                ));
            }
        }

        if let Some(default) = &blocked.default {
            parameters
                .entry(blocked.namelist.clone())
                .or_default()
                .insert(blocked.flag.clone(), default.clone());
        }
    }
    Ok(())
}

/// Removes blocked keywords from parameters read from an existing input file,
/// so that they can be handed back to [`generate_input`].
pub fn strip_blocked_keywords(profile: &CodeProfile, parameters: &mut Parameters) -> Vec<String> {
    let mut removed = Vec::new();
    for blocked in &profile.blocked_keywords {
        let Some(namelist) = parameters.get_mut(&blocked.namelist) else {
            continue;
        };
        let keys: Vec<String> = namelist
            .keys()
            .filter(|key| strip_index(key) == blocked.flag)
            .cloned()
            .collect();
        for key in keys {
            namelist.remove(&key);
            removed.push(format!("{}.{}", blocked.namelist, key));
        }
    }
    removed
}

/// `celldm(1)` and `celldm` name the same flag.
fn strip_index(key: &str) -> String {
    key.chars()
        .filter(|character| !matches!(character, '(' | ')' | '0'..='9'))
        .collect()
}
