use crate::domain::{JobResult, ParamValue, SimJobError, ValueKind};
use serde_json::Number;

pub(crate) const ENTRY_INDENT: &str = "    ";

/// Renders one `key = value` line of a namelist block.
pub fn namelist_entry(key: &str, value: &ParamValue) -> JobResult<String> {
    let encoded = encode_value(key, value)?;
    if encoded.is_empty() {
        Ok(format!("{ENTRY_INDENT}{key} =\n"))
    } else {
        Ok(format!("{ENTRY_INDENT}{key} = {encoded}\n"))
    }
}

pub fn encode_value(key: &str, value: &ParamValue) -> JobResult<String> {
    match value {
        ParamValue::Array(items) => {
            let encoded = items
                .iter()
                .map(|item| encode_scalar(key, item))
                .collect::<JobResult<Vec<_>>>()?;
            Ok(encoded.join(" "))
        }
        scalar => encode_scalar(key, scalar),
    }
}

fn encode_scalar(key: &str, value: &ParamValue) -> JobResult<String> {
    match value {
        ParamValue::Bool(true) => Ok(".true.".to_string()),
        ParamValue::Bool(false) => Ok(".false.".to_string()),
        ParamValue::Number(number) => Ok(encode_number(number)),
        ParamValue::String(text) => Ok(quote(text)),
        other => Err(SimJobError::input_validation(
            "INPUT.UNSUPPORTED_VALUE",
            format!(
                "flag '{key}' has a {} value, which cannot be written to a namelist",
                ValueKind::of(other)
            ),
        )),
    }
}

fn encode_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    // serde_json numbers are always finite
    format_float(number.as_f64().unwrap_or_default())
}

/// Shortest round-trippable float text that still reads back as a float.
pub fn format_float(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude == 0.0 || (1.0e-4..1.0e15).contains(&magnitude) {
        let text = format!("{value}");
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        format!("{value:e}")
    }
}

pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::{format_float, namelist_entry, quote};
    use serde_json::json;

    #[test]
    fn scalars_use_fixed_encoding() {
        assert_eq!(
            namelist_entry("prevDir", &json!(false)).expect("bool"),
            "    prevDir = .false.\n"
        );
        assert_eq!(
            namelist_entry("tsteps", &json!(200)).expect("int"),
            "    tsteps = 200\n"
        );
        assert_eq!(
            namelist_entry("profileType", &json!("CC")).expect("string"),
            "    profileType = 'CC'\n"
        );
    }

    #[test]
    fn floats_always_read_back_as_floats() {
        assert_eq!(format_float(298.0), "298.0");
        assert_eq!(format_float(0.12), "0.12");
        assert_eq!(format_float(1.0e-6), "1e-6");
        assert_eq!(format_float(1.3793e28), "1.3793e28");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(-0.5), "-0.5");
    }

    #[test]
    fn lists_render_on_one_line() {
        assert_eq!(
            namelist_entry("list_of_points", &json!([0.00734987, 0.008])).expect("list"),
            "    list_of_points = 0.00734987 0.008\n"
        );
        assert_eq!(
            namelist_entry("keywords", &json!(["tabular_data"])).expect("list"),
            "    keywords = 'tabular_data'\n"
        );
        assert_eq!(
            namelist_entry("keywords", &json!([])).expect("empty list"),
            "    keywords =\n"
        );
    }

    #[test]
    fn nested_values_are_rejected() {
        let error = namelist_entry("segments", &json!([[0.3, 0.4]]))
            .expect_err("nested list should fail");
        assert_eq!(error.placeholder(), "INPUT.UNSUPPORTED_VALUE");

        let error = namelist_entry("bad", &json!({"a": 1})).expect_err("mapping should fail");
        assert!(error.message().contains("mapping"));
    }

    #[test]
    fn quotes_inside_strings_are_doubled() {
        assert_eq!(quote("it's"), "'it''s'");
    }
}
