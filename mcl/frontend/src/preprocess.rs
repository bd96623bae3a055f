//! Textual preprocessor, run before the lexer.
//!
//! Supported directives:
//!
//! ```text
//! #include "path/to/file.mcl"   // splice file contents in-place
//! #define NAME                  // define a flag (no value)
//! #define NAME value            // whole-word text substitution
//! #undef  NAME
//! #ifdef  NAME / #ifndef NAME / #else / #endif
//! ```
//!
//! Every directive line is replaced by a blank line so that lexer-reported
//! line numbers stay accurate. Defines are substituted whole-word only and
//! never re-expanded. Includes share the defines table, so a `#define`
//! inside an included file is visible to the includer after that point.

use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A preprocessor-level error.
#[derive(Debug, Error)]
#[error("{path}:{line}: {message}")]
pub struct PreprocessError {
    /// File the directive came from (`<input>` for the top level).
    pub path: String,
    /// 1-based line of the offending directive.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl PreprocessError {
    fn new(path: &Path, line: usize, message: impl Into<String>) -> Self {
        Self {
            path: path.display().to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Preprocess source text, resolving `#include` against `base_dir` via the
/// filesystem.
pub fn preprocess(source: &str, base_dir: &Path) -> Result<String, PreprocessError> {
    preprocess_with(source, base_dir, &mut |path| std::fs::read_to_string(path))
}

/// Preprocess with a caller-supplied file loader, so tests and embedders
/// can resolve includes without touching the filesystem.
pub fn preprocess_with(
    source: &str,
    base_dir: &Path,
    load: &mut dyn FnMut(&Path) -> std::io::Result<String>,
) -> Result<String, PreprocessError> {
    let mut defines = HashMap::new();
    let mut stack = Vec::new();
    expand(
        source,
        base_dir,
        Path::new("<input>"),
        &mut defines,
        &mut stack,
        load,
    )
}

fn expand(
    source: &str,
    base_dir: &Path,
    current: &Path,
    defines: &mut HashMap<String, Option<String>>,
    include_stack: &mut Vec<PathBuf>,
    load: &mut dyn FnMut(&Path) -> std::io::Result<String>,
) -> Result<String, PreprocessError> {
    // One bool per open conditional block; a line is active when all are.
    let mut conditions: Vec<bool> = Vec::new();
    let mut output = String::new();

    for (idx, line) in source.lines().enumerate() {
        let lineno = idx + 1;
        let active = conditions.iter().all(|&c| c);

        let Some((directive, rest)) = parse_directive(line) else {
            if active {
                output.push_str(&substitute(line, defines));
            }
            output.push('\n');
            continue;
        };

        // Directive lines always collapse to a blank line in the output.
        output.push('\n');

        match directive.as_str() {
            "include" if active => {
                let target = rest
                    .strip_prefix('"')
                    .and_then(|r| r.strip_suffix('"'))
                    .ok_or_else(|| {
                        PreprocessError::new(current, lineno, "expected #include \"path\"")
                    })?;
                let resolved = base_dir.join(target);
                if include_stack.iter().any(|p| p == &resolved) {
                    return Err(PreprocessError::new(
                        current,
                        lineno,
                        format!("circular include of '{target}'"),
                    ));
                }
                let text = load(&resolved).map_err(|e| {
                    PreprocessError::new(current, lineno, format!("cannot include '{target}': {e}"))
                })?;
                debug!("including '{}' from {}", resolved.display(), current.display());
                include_stack.push(resolved.clone());
                let parent = resolved.parent().unwrap_or(base_dir).to_path_buf();
                let expanded = expand(&text, &parent, &resolved, defines, include_stack, load)?;
                include_stack.pop();
                output.push_str(&expanded);
            }
            "define" if active => {
                let mut parts = rest.splitn(2, char::is_whitespace);
                let name = parts.next().unwrap_or("");
                if name.is_empty() {
                    return Err(PreprocessError::new(current, lineno, "#define needs a name"));
                }
                let value = parts.next().map(|v| v.trim().to_string());
                defines.insert(name.to_string(), value);
            }
            "undef" if active => {
                defines.remove(rest);
            }
            "ifdef" => conditions.push(defines.contains_key(rest)),
            "ifndef" => conditions.push(!defines.contains_key(rest)),
            "else" => match conditions.last_mut() {
                Some(top) => *top = !*top,
                None => {
                    return Err(PreprocessError::new(current, lineno, "#else without #ifdef"))
                }
            },
            "endif" => {
                if conditions.pop().is_none() {
                    return Err(PreprocessError::new(current, lineno, "#endif without #ifdef"));
                }
            }
            // Inactive include/define/undef: structural directives above are
            // still tracked to keep nesting depth right.
            "include" | "define" | "undef" => {}
            other => {
                return Err(PreprocessError::new(
                    current,
                    lineno,
                    format!("unknown directive '#{other}'"),
                ))
            }
        }
    }

    if !conditions.is_empty() {
        return Err(PreprocessError::new(
            current,
            source.lines().count(),
            "unterminated #ifdef block",
        ));
    }
    Ok(output)
}

/// Returns `(name, remainder)` for `#name remainder` lines.
fn parse_directive(line: &str) -> Option<(String, &str)> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix('#')?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), rest[end..].trim()))
}

/// Whole-word macro substitution for every define that has a value.
fn substitute(line: &str, defines: &HashMap<String, Option<String>>) -> String {
    let mut out = String::with_capacity(line.len());
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() {
                let c = bytes[i] as char;
                if c.is_ascii_alphanumeric() || c == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            let word = &line[start..i];
            match defines.get(word) {
                Some(Some(value)) => out.push_str(value),
                _ => out.push_str(word),
            }
        } else {
            out.push(c);
            i += c.len_utf8();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        preprocess_with(source, Path::new("."), &mut |_| {
            Err(std::io::Error::other("no files"))
        })
        .unwrap()
    }

    #[test]
    fn defines_substitute_whole_words() {
        let out = run("#define SIZE 32\nvar x = SIZE; var y = MAXSIZE;\n");
        assert_eq!(out, "\nvar x = 32; var y = MAXSIZE;\n");
    }

    #[test]
    fn ifdef_blocks() {
        let out = run(
            "#define DEBUG\n\
             #ifdef DEBUG\nA\n#else\nB\n#endif\n\
             #ifndef DEBUG\nC\n#endif\n",
        );
        assert!(out.contains("A\n"));
        assert!(!out.contains("B\n"));
        assert!(!out.contains("C\n"));
    }

    #[test]
    fn directive_lines_become_blank_lines() {
        let out = run("#define X 1\nX\n");
        // Line 1 stays line 1 for the lexer.
        assert_eq!(out.lines().count(), 2);
        assert_eq!(out.lines().nth(1), Some("1"));
    }

    #[test]
    fn includes_splice_and_share_defines() {
        let mut load = |path: &Path| {
            if path.ends_with("lib.mcl") {
                Ok("#define ANSWER 42\nfunction lib() { return ANSWER; }\n".to_string())
            } else {
                Err(std::io::Error::other("missing"))
            }
        };
        let out = preprocess_with(
            "#include \"lib.mcl\"\nfunction main() { return ANSWER; }\n",
            Path::new("."),
            &mut load,
        )
        .unwrap();
        assert!(out.contains("function lib() { return 42; }"));
        assert!(out.contains("function main() { return 42; }"));
    }

    #[test]
    fn circular_include_is_an_error() {
        let mut load = |_: &Path| Ok("#include \"a.mcl\"\n".to_string());
        let err = preprocess_with("#include \"a.mcl\"\n", Path::new("."), &mut load).unwrap_err();
        assert!(err.message.contains("circular include"));
    }

    #[test]
    fn unterminated_ifdef_is_an_error() {
        let err = preprocess_with("#ifdef X\n", Path::new("."), &mut |_| {
            Err(std::io::Error::other("no files"))
        })
        .unwrap_err();
        assert!(err.message.contains("unterminated"));
    }
}
