//! Command-line rendering
//!
//! On argv platforms the OS receives the argument vector untouched and the
//! rendered line is only used for logging. Windows hands every process a
//! single string, so rendering must follow the parsing rules of the native
//! parser: arguments with whitespace or quotes are wrapped in double quotes,
//! a quote is escaped with a backslash, and a run of backslashes is doubled
//! when (and only when) a quote follows it.

/// Strategy for turning an argument vector into one command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandLineSyntax {
    /// Let the platform do what it natively does: pass argv through on
    /// Unix, apply the Windows rules on Windows.
    #[default]
    Platform,
    /// Force the Windows rendering, whatever the host platform.
    Windows,
}

impl CommandLineSyntax {
    /// Renders `arguments` into a single command-line string.
    pub fn render(&self, arguments: &[String]) -> String {
        let quoted: Vec<String> = arguments.iter().map(|arg| quote_argument(arg)).collect();
        quoted.join(" ")
    }

    /// The full line as launched, for logging.
    pub(crate) fn display_line(&self, program: &str, arguments: &[String]) -> String {
        if arguments.is_empty() {
            return quote_argument(program);
        }
        format!("{} {}", quote_argument(program), self.render(arguments))
    }
}

/// Quotes one argument per the Windows parsing rules.
pub fn quote_argument(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut chars = arg.chars();
    let mut run = 0usize;
    loop {
        match chars.next() {
            Some('\\') => run += 1,
            Some('"') => {
                // Backslashes before a quote double, plus one to escape the
                // quote itself.
                out.extend(std::iter::repeat('\\').take(run * 2 + 1));
                out.push('"');
                run = 0;
            }
            Some(c) => {
                out.extend(std::iter::repeat('\\').take(run));
                out.push(c);
                run = 0;
            }
            None => {
                // Trailing backslashes double so the closing quote survives.
                out.extend(std::iter::repeat('\\').take(run * 2));
                break;
            }
        }
    }
    out.push('"');
    out
}

/// Splits a command line with the same rules [`quote_argument`] renders for.
/// This is the documented behavior of the Windows argument parser for
/// backslash runs and quotes.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(' ' | '\t')) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut arg = String::new();
        let mut in_quotes = false;
        loop {
            let mut run = 0usize;
            while matches!(chars.peek(), Some('\\')) {
                chars.next();
                run += 1;
            }
            match chars.peek().copied() {
                Some('"') => {
                    arg.extend(std::iter::repeat('\\').take(run / 2));
                    if run % 2 == 1 {
                        // Escaped quote: literal.
                        chars.next();
                        arg.push('"');
                    } else {
                        chars.next();
                        in_quotes = !in_quotes;
                    }
                }
                Some(c) if !in_quotes && (c == ' ' || c == '\t') => {
                    arg.extend(std::iter::repeat('\\').take(run));
                    break;
                }
                Some(c) => {
                    arg.extend(std::iter::repeat('\\').take(run));
                    chars.next();
                    arg.push(c);
                }
                None => {
                    arg.extend(std::iter::repeat('\\').take(run));
                    break;
                }
            }
        }
        args.push(arg);
    }
    args
}
