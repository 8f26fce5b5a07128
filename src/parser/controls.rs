// Parser for the secondary view controls
//
// Format: country: "Perú", modes: ["Aéreo", "Marítimo"], department: "Bogotá"
// Every entry is optional and entries may come in any order.

use super::lexer::{identifier, string_literal, ws};
use nom::{
    character::complete::char,
    combinator::{eof, map},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, terminated},
    IResult,
};

/// Secondary selections applied upstream of aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controls {
    /// Country single-select. `None` picks the first country alphabetically.
    pub country: Option<String>,
    /// Transport-mode multi-select. `None` keeps every mode.
    pub transport_modes: Option<Vec<String>>,
    /// Department single-select. `None` picks the first department alphabetically.
    pub department: Option<String>,
}

#[derive(Debug)]
enum Entry {
    Country(String),
    Modes(Vec<String>),
    Department(String),
}

fn parse_string_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), ws(string_literal)),
        ws(char(']')),
    )(input)
}

fn parse_entry(input: &str) -> IResult<&str, Entry> {
    let (input, key) = terminated(ws(identifier), ws(char(':')))(input)?;
    match key.as_str() {
        "country" => map(ws(string_literal), Entry::Country)(input),
        "modes" => map(parse_string_list, Entry::Modes)(input),
        "department" => map(ws(string_literal), Entry::Department)(input),
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    }
}

/// Parse a complete controls string. Later entries override earlier ones.
pub fn parse_controls(input: &str) -> IResult<&str, Controls> {
    let (input, entries) = separated_list0(ws(char(',')), parse_entry)(input)?;
    let (input, _) = ws(eof)(input)?;

    let mut controls = Controls::default();
    for entry in entries {
        match entry {
            Entry::Country(c) => controls.country = Some(c),
            Entry::Modes(m) => controls.transport_modes = Some(m),
            Entry::Department(d) => controls.department = Some(d),
        }
    }

    Ok((input, controls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_controls() {
        let (_, controls) =
            parse_controls(r#"country: "Perú", modes: ["Aéreo", "Marítimo"], department: "Bogotá""#).unwrap();
        assert_eq!(controls.country, Some("Perú".to_string()));
        assert_eq!(
            controls.transport_modes,
            Some(vec!["Aéreo".to_string(), "Marítimo".to_string()])
        );
        assert_eq!(controls.department, Some("Bogotá".to_string()));
    }

    #[test]
    fn test_parse_empty_controls() {
        let (_, controls) = parse_controls("   ").unwrap();
        assert_eq!(controls, Controls::default());
    }

    #[test]
    fn test_parse_any_order() {
        let (_, controls) = parse_controls(r#"department: "Cali" , country: "Chile""#).unwrap();
        assert_eq!(controls.country, Some("Chile".to_string()));
        assert_eq!(controls.department, Some("Cali".to_string()));
        assert_eq!(controls.transport_modes, None);
    }

    #[test]
    fn test_parse_empty_mode_list() {
        let (_, controls) = parse_controls("modes: []").unwrap();
        assert_eq!(controls.transport_modes, Some(vec![]));
    }

    #[test]
    fn test_parse_unknown_key() {
        assert!(parse_controls(r#"region: "Andina""#).is_err());
    }

    #[test]
    fn test_parse_trailing_garbage() {
        assert!(parse_controls(r#"country: "Perú" extra"#).is_err());
    }
}
