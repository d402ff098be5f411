use crate::domain::{JobResult, ParamValue, Parameters, SimJobError, number};

/// Reads a formatted namelist input file back into a configuration mapping.
///
/// A block starts with an unindented header line and runs until the next
/// blank line; indented `key = value` lines belong to the open block. A value
/// with a single token reads back as a scalar, several tokens as a list.
pub fn read_namelist_input(source: &str) -> JobResult<Parameters> {
    let mut parameters = Parameters::new();
    let mut current: Option<String> = None;

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            current = None;
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            let name = line.trim().to_string();
            parameters.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some(namelist) = current.as_ref() else {
            return Err(syntax_error(
                line_number,
                "entry appears outside of a namelist block",
            ));
        };
        let Some((key, value)) = line.trim().split_once('=') else {
            return Err(syntax_error(line_number, "expected 'key = value'"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(syntax_error(line_number, "missing flag name before '='"));
        }

        let tokens = tokenize(value).map_err(|message| syntax_error(line_number, message))?;
        let mut values: Vec<ParamValue> = tokens.into_iter().map(decode_token).collect();
        let decoded = if values.len() == 1 {
            values.remove(0)
        } else {
            ParamValue::Array(values)
        };

        parameters
            .entry(namelist.clone())
            .or_default()
            .insert(key.to_string(), decoded);
    }

    Ok(parameters)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(source: &str) -> Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&next) = chars.peek() {
        if next.is_whitespace() {
            chars.next();
            continue;
        }

        if next == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(character) = chars.next() {
                if character == '\'' {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        text.push('\'');
                        continue;
                    }
                    closed = true;
                    break;
                }
                text.push(character);
            }
            if !closed {
                return Err("unterminated quoted string");
            }
            tokens.push(Token { text, quoted: true });
            continue;
        }

        let mut text = String::new();
        while let Some(&character) = chars.peek() {
            if character.is_whitespace() {
                break;
            }
            text.push(character);
            chars.next();
        }
        tokens.push(Token {
            text,
            quoted: false,
        });
    }

    Ok(tokens)
}

fn decode_token(token: Token) -> ParamValue {
    if token.quoted {
        return ParamValue::String(token.text);
    }

    match token.text.to_ascii_lowercase().as_str() {
        ".true." | ".t." => return ParamValue::Bool(true),
        ".false." | ".f." => return ParamValue::Bool(false),
        _ => {}
    }

    if let Ok(integer) = token.text.parse::<i64>() {
        return ParamValue::from(integer);
    }

    let looks_numeric = token
        .text
        .starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if looks_numeric {
        let fortran_exponent = token.text.replace(['d', 'D'], "e");
        if let Ok(float) = fortran_exponent.parse::<f64>() {
            return number(float);
        }
    }

    ParamValue::String(token.text)
}

fn syntax_error(line_number: usize, message: &str) -> SimJobError {
    SimJobError::input_validation(
        "INPUT.NAMELIST_SYNTAX",
        format!("line {line_number}: {message}"),
    )
}
