pub mod run;
pub mod validate;

use color_eyre::eyre::{bail, Result};
use indexmap::IndexMap;

/// Parse repeated `NAME=VALUE` flags.
pub fn parse_pairs(pairs: &[String], flag: &str) -> Result<IndexMap<String, String>> {
    let mut values = IndexMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                values.insert(name.to_string(), value.to_string());
            }
            _ => bail!("Invalid {} format '{}'. Expected NAME=VALUE", flag, pair),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let pairs = vec!["A=1".to_string(), "B=x=y".to_string()];
        let values = parse_pairs(&pairs, "--var").unwrap();
        assert_eq!(values.get("A").map(String::as_str), Some("1"));
        assert_eq!(values.get("B").map(String::as_str), Some("x=y"));

        assert!(parse_pairs(&["novalue".to_string()], "--var").is_err());
        assert!(parse_pairs(&["=1".to_string()], "--var").is_err());
    }
}
