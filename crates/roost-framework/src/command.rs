//! Chat command parsing with clap.
//!
//! Message bodies are split into arguments with shell-like quoting and handed
//! to a [`clap::Command`].  Parse errors and `--help` output are rendered to
//! plain text so they can be sent back to the room as-is.

use clap::{ArgMatches, Command};

/// Simple shell-like argument splitting for plain text.
///
/// Handles:
/// - Space-separated arguments
/// - Quoted strings (single and double quotes)
/// - Escape sequences within double quotes
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;
    let mut quoted = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => {
                escape_next = true;
            }
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

/// Parses `args` against `command`, using the command's own name as argv[0].
///
/// On failure the rendered clap message (usage, error or help) is returned.
pub fn parse_args(command: Command, args: &str) -> Result<ArgMatches, String> {
    let bin = command.get_name().to_string();
    command
        .try_get_matches_from(std::iter::once(bin).chain(shell_split(args)))
        .map_err(|e| e.render().to_string().trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Arg;

    #[test]
    fn test_shell_split_simple() {
        let args = shell_split("activate echo");
        assert_eq!(args, vec!["activate", "echo"]);
    }

    #[test]
    fn test_shell_split_quoted() {
        let args = shell_split(r#"plugin echo "hello world" test"#);
        assert_eq!(args, vec!["plugin", "echo", "hello world", "test"]);
    }

    #[test]
    fn test_shell_split_mixed_quotes() {
        let args = shell_split(r#"cmd "double's quote" 'single"s quote'"#);
        assert_eq!(args, vec!["cmd", "double's quote", r#"single"s quote"#]);
    }

    #[test]
    fn test_shell_split_empty_quotes_kept() {
        let args = shell_split(r#"set greeting """#);
        assert_eq!(args, vec!["set", "greeting", ""]);
    }

    #[test]
    fn test_shell_split_whitespace_only() {
        assert!(shell_split("   \t  ").is_empty());
    }

    #[test]
    fn test_parse_args_reports_errors() {
        let command = Command::new("demo").arg(Arg::new("name").required(true));
        let matches = parse_args(command.clone(), "alice").unwrap();
        assert_eq!(matches.get_one::<String>("name").unwrap(), "alice");

        let err = parse_args(command, "").unwrap_err();
        assert!(err.contains("required"));
    }
}
