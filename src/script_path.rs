//! Mapping between script identifiers and the files they are materialized as.
//!
//! Identifiers are opaque strings chosen by the remote host, so they are
//! encoded before becoming file names. Characters that are invalid on some
//! filesystems, path separators and periods are written as `%NAME%` tokens, a
//! literal `%` is escaped as `%%`, and leading or trailing spaces become
//! `%SPACE%`. The encoding is reversible, which lets the watch loop recover
//! the identifier from nothing but a notified path.
//!
//! Construction and parsing both live here so that they cannot drift apart.

use std::path::{Path, PathBuf};

/// Extension given to every materialized script.
pub const SCRIPT_EXTENSION: &str = "lua";

const CHAR_ENCODINGS: &[(char, &str)] = &[
    ('.', "DOT"),
    ('<', "LT"),
    ('>', "GT"),
    (':', "COLON"),
    ('"', "QUOTE"),
    ('/', "SLASH"),
    ('\\', "BACKSLASH"),
    ('|', "PIPE"),
    ('?', "QUESTION"),
    ('*', "STAR"),
];

const SPACE_TOKEN: &str = "%SPACE%";

/// Returns the file name a script with this identifier is stored under.
pub fn script_file_name(identifier: &str) -> String {
    format!("{}.{}", encode_identifier(identifier), SCRIPT_EXTENSION)
}

/// Returns the full path of the script with this identifier inside `dir`.
pub fn script_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(script_file_name(identifier))
}

/// Recovers the identifier from a script path. Returns `None` for anything
/// that is not a script file name.
pub fn identifier_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(SCRIPT_EXTENSION)?
        .strip_suffix('.')?;

    if stem.is_empty() {
        return None;
    }

    Some(decode_identifier(stem))
}

fn encode_identifier(identifier: &str) -> String {
    let leading = identifier.len() - identifier.trim_start_matches(' ').len();
    let trimmed = identifier.trim_start_matches(' ');
    let trailing = trimmed.len() - trimmed.trim_end_matches(' ').len();
    let middle = trimmed.trim_end_matches(' ');

    let mut encoded = SPACE_TOKEN.repeat(leading);

    for c in middle.chars() {
        if c == '%' {
            encoded.push_str("%%");
        } else if let Some((_, name)) = CHAR_ENCODINGS.iter().find(|(from, _)| *from == c) {
            encoded.push('%');
            encoded.push_str(name);
            encoded.push('%');
        } else {
            encoded.push(c);
        }
    }

    encoded.push_str(&SPACE_TOKEN.repeat(trailing));
    encoded
}

/// Parses left to right so that `%%` escapes are honoured before tokens.
fn decode_identifier(encoded: &str) -> String {
    let mut output = String::with_capacity(encoded.len());
    let mut rest = encoded;

    while let Some(index) = rest.find('%') {
        output.push_str(&rest[..index]);
        rest = &rest[index..];

        if let Some(after) = rest.strip_prefix("%%") {
            output.push('%');
            rest = after;
            continue;
        }

        match decode_token(rest) {
            Some((decoded, consumed)) => {
                output.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                output.push('%');
                rest = &rest[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

/// Decodes a `%NAME%` token at the start of `input`, returning the character
/// and the number of bytes consumed.
fn decode_token(input: &str) -> Option<(char, usize)> {
    let body = input.strip_prefix('%')?;
    let end = body.find('%')?;
    let name = &body[..end];

    let decoded = if name == "SPACE" {
        ' '
    } else {
        CHAR_ENCODINGS
            .iter()
            .find(|(_, token)| *token == name)
            .map(|(c, _)| *c)?
    };

    Some((decoded, end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifiers_are_untouched() {
        assert_eq!(
            script_file_name("6f1c9a52-0d0b-4e8e-9a7e-1c2f0e5b7d11"),
            "6f1c9a52-0d0b-4e8e-9a7e-1c2f0e5b7d11.lua"
        );
        assert_eq!(script_file_name("a1"), "a1.lua");
    }

    #[test]
    fn separators_cannot_escape_the_directory() {
        let dir = Path::new("/tmp/extedit");
        let path = script_path(dir, "../../etc/passwd");

        assert_eq!(path.parent(), Some(dir));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "%DOT%%DOT%%SLASH%%DOT%%DOT%%SLASH%etc%SLASH%passwd.lua"
        );
    }

    #[test]
    fn percent_and_spaces_are_escaped() {
        assert_eq!(script_file_name("50%"), "50%%.lua");
        assert_eq!(script_file_name(" a b "), "%SPACE%a b%SPACE%.lua");
        assert_eq!(script_file_name("%DOT%"), "%%DOT%%.lua");
    }

    #[test]
    fn identifier_is_recovered_from_path() {
        let dir = Path::new("/tmp/extedit");
        for identifier in [
            "a1",
            "Workspace.Script",
            "what?",
            "50%",
            "%DOT%",
            "  padded  ",
            "a:b|c*d<e>f\"g\\h/i",
            "%%%",
            "%UNKNOWN%",
        ] {
            let path = script_path(dir, identifier);
            assert_eq!(
                identifier_from_path(&path).as_deref(),
                Some(identifier),
                "identifier {:?} stored as {}",
                identifier,
                path.display()
            );
        }
    }

    #[test]
    fn foreign_files_have_no_identifier() {
        assert_eq!(identifier_from_path(Path::new("/tmp/extedit/a1.txt")), None);
        assert_eq!(identifier_from_path(Path::new("/tmp/extedit/a1lua")), None);
        assert_eq!(identifier_from_path(Path::new("/tmp/extedit/.lua")), None);
        assert_eq!(identifier_from_path(Path::new("/tmp/extedit")), None);
    }

    #[test]
    fn unknown_tokens_decode_literally() {
        assert_eq!(
            identifier_from_path(Path::new("/x/%NOPE%.lua")).as_deref(),
            Some("%NOPE%")
        );
        assert_eq!(
            identifier_from_path(Path::new("/x/trailing%.lua")).as_deref(),
            Some("trailing%")
        );
    }
}
