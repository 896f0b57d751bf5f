//! # Shell-like Lexing Utilities
//!
//! Splits a resolved command line into the argument vector a container
//! runtime expects, following the usual POSIX shell word rules.

/// Split a command line into arguments.
///
/// Whitespace separates words unless quoted. Single quotes preserve their
/// contents literally; double quotes allow backslash escapes. Outside quotes a
/// backslash escapes the next character. Adjacent quoted and unquoted segments
/// join into one word, and quotes themselves are removed.
///
/// # Example
/// ```rust
/// use dockhand_util::shell_lexing::split_command_line;
///
/// let args = split_command_line("run.sh --label 'MR 1' \"a\"'b'c");
/// assert_eq!(args, vec!["run.sh", "--label", "MR 1", "abc"]);
/// ```
pub fn split_command_line(input: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_single_quotes = false;
    let mut in_double_quotes = false;
    let mut characters = input.chars().peekable();

    while let Some(character) = characters.next() {
        if in_single_quotes {
            if character == '\'' {
                in_single_quotes = false;
            } else {
                current.push(character);
            }
            continue;
        }

        match character {
            '\\' => {
                in_word = true;
                match characters.next() {
                    // Inside double quotes only quote, backslash and dollar are escapable.
                    Some(next) if in_double_quotes && !matches!(next, '"' | '\\' | '$') => {
                        current.push('\\');
                        current.push(next);
                    }
                    Some(next) => current.push(next),
                    None => current.push('\\'),
                }
            }
            '\'' if !in_double_quotes => {
                in_word = true;
                in_single_quotes = true;
            }
            '"' => {
                in_word = true;
                in_double_quotes = !in_double_quotes;
            }
            whitespace if whitespace.is_whitespace() && !in_double_quotes => {
                if in_word {
                    arguments.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        arguments.push(current);
    }
    arguments
}
