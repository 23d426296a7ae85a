//! Filename-glob expansion of argv tokens, enabled per-command via
//! [`crate::Command::glob`].

use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Expands one argv token against `cwd` (the command's working directory, if
/// set). Dash-prefixed tokens (`-l`, `--color=auto`) are never expanded, to
/// avoid clobbering flags that happen to contain glob metacharacters.
/// Non-UTF-8 tokens, and tokens without metacharacters, or whose pattern
/// matches nothing, pass through unchanged -- matching the shell convention
/// that a glob with no matches expands to itself.
pub(crate) fn expand_token(tok: &OsStr, cwd: Option<&Path>) -> Vec<OsString> {
    let Some(s) = tok.to_str() else {
        return vec![tok.to_owned()];
    };
    if s.starts_with('-') || !has_glob_metachars(s) {
        return vec![tok.to_owned()];
    }

    let pattern = match cwd {
        Some(dir) => dir.join(s).to_string_lossy().into_owned(),
        None => s.to_owned(),
    };

    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let paths = match glob::glob_with(&pattern, options) {
        Ok(paths) => paths,
        Err(_) => return vec![tok.to_owned()],
    };

    let prefix_len = cwd.map(|dir| dir.to_string_lossy().len() + 1).unwrap_or(0);
    let mut matches: Vec<OsString> = paths
        .filter_map(|entry| entry.ok())
        .map(|p| {
            let full = p.to_string_lossy().into_owned();
            OsString::from(full[prefix_len.min(full.len())..].to_owned())
        })
        .collect();

    if matches.is_empty() {
        return vec![tok.to_owned()];
    }
    matches.sort();
    matches
}

fn has_glob_metachars(s: &str) -> bool {
    s.chars().any(|c| matches!(c, '*' | '?' | '['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_prefixed_tokens_pass_through() {
        assert_eq!(
            expand_token(OsStr::new("-l*"), None),
            vec![OsString::from("-l*")]
        );
    }

    #[test]
    fn plain_tokens_pass_through() {
        assert_eq!(
            expand_token(OsStr::new("plain.txt"), None),
            vec![OsString::from("plain.txt")]
        );
    }

    #[test]
    fn no_matches_falls_back_to_literal() {
        let tok = OsStr::new("no-such-file-*.nonexistent");
        assert_eq!(expand_token(tok, None), vec![tok.to_owned()]);
    }
}
