//! Named colours for the `-c` flag.

use wisp_core::{Error, Result};

use crate::screen::Color;

/// Resolve a colour name from the command line.
///
/// Accepts the 16 ANSI palette names (with `bright-` prefixes), `grey`/`gray`
/// aliases, and `default`. Unknown names are a startup error.
pub fn resolve(name: &str) -> Result<Color> {
    let normalized = name.to_ascii_lowercase();
    match normalized.as_str() {
        "default" => Ok(Color::Default),
        "black" => Ok(Color::Indexed(0)),
        "red" => Ok(Color::Indexed(1)),
        "green" => Ok(Color::Indexed(2)),
        "yellow" => Ok(Color::Indexed(3)),
        "blue" => Ok(Color::Indexed(4)),
        "magenta" => Ok(Color::Indexed(5)),
        "cyan" => Ok(Color::Indexed(6)),
        "white" => Ok(Color::Indexed(7)),
        "grey" | "gray" | "bright-black" => Ok(Color::Indexed(8)),
        "bright-red" => Ok(Color::Indexed(9)),
        "bright-green" => Ok(Color::Indexed(10)),
        "bright-yellow" => Ok(Color::Indexed(11)),
        "bright-blue" => Ok(Color::Indexed(12)),
        "bright-magenta" => Ok(Color::Indexed(13)),
        "bright-cyan" => Ok(Color::Indexed(14)),
        "bright-white" => Ok(Color::Indexed(15)),
        _ => Err(Error::UnknownColor(name.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ansi_names() {
        assert_eq!(resolve("cyan").unwrap(), Color::Indexed(6));
        assert_eq!(resolve("bright-red").unwrap(), Color::Indexed(9));
    }

    #[test]
    fn resolution_is_case_insensitive() {
        assert_eq!(resolve("Cyan").unwrap(), Color::Indexed(6));
        assert_eq!(resolve("GREY").unwrap(), Color::Indexed(8));
    }

    #[test]
    fn grey_aliases_agree() {
        assert_eq!(resolve("grey").unwrap(), resolve("gray").unwrap());
        assert_eq!(resolve("grey").unwrap(), resolve("bright-black").unwrap());
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(matches!(resolve("mauve"), Err(Error::UnknownColor(_))));
    }
}
