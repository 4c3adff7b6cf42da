//! Command lines for the remote shell.
//!
//! The remote side of an ssh session hands the command to a shell, so every
//! argument is escaped on its own as it is appended. Arguments that cannot
//! be escaped safely are rejected and the session never starts.

use crate::error::{PagesyncError, Result};

/// Quoting rules of the shell that will parse the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlavor {
    /// `sh` and compatible shells.
    Posix,
    /// `cmd.exe`.
    Windows,
}

impl ShellFlavor {
    /// The flavor of the platform this binary runs on.
    pub const fn native() -> Self {
        if cfg!(windows) {
            ShellFlavor::Windows
        } else {
            ShellFlavor::Posix
        }
    }

    /// Prefix that keeps a filename beginning with `-` from being read as
    /// an option.
    fn dash_guard(self) -> &'static str {
        match self {
            ShellFlavor::Posix => "./",
            ShellFlavor::Windows => ".\\",
        }
    }

    fn needs_escape(self, c: char) -> bool {
        if !c.is_ascii() {
            return true;
        }
        match self {
            ShellFlavor::Posix => " !\"#$%&'()*;<>?[\\]^`{|}".contains(c),
            ShellFlavor::Windows => " \"#$%&'()*;<>?[]^`{|}".contains(c),
        }
    }
}

impl Default for ShellFlavor {
    fn default() -> Self {
        Self::native()
    }
}

/// Escape one argument.
///
/// With `is_filename`, an argument beginning with `-` is prefixed so the
/// receiving program does not take it for an option.
pub fn escape_arg(flavor: ShellFlavor, arg: &str, is_filename: bool) -> Result<String> {
    if let Some(c) = arg.chars().find(|c| c.is_control() && c.is_ascii()) {
        return Err(PagesyncError::Escape {
            arg: arg.to_string(),
            reason: if c == '\n' || c == '\r' || c == '\t' {
                "line breaks and tabs are not allowed"
            } else {
                "control characters are not allowed"
            },
        });
    }
    let guard = if is_filename && arg.starts_with('-') {
        flavor.dash_guard()
    } else {
        ""
    };

    if arg.is_empty() {
        return Ok(match flavor {
            ShellFlavor::Posix => "''".to_string(),
            ShellFlavor::Windows => "\"\"".to_string(),
        });
    }
    if !arg.chars().any(|c| flavor.needs_escape(c)) {
        return Ok(format!("{guard}{arg}"));
    }

    let mut out = String::with_capacity(arg.len() + 8);
    match flavor {
        ShellFlavor::Posix if arg.contains('\'') => {
            out.push_str(guard);
            for c in arg.chars() {
                if flavor.needs_escape(c) {
                    out.push('\\');
                }
                out.push(c);
            }
        }
        ShellFlavor::Posix => {
            out.push('\'');
            out.push_str(guard);
            out.push_str(arg);
            out.push('\'');
        }
        ShellFlavor::Windows => {
            out.push('"');
            if !guard.is_empty() {
                out.push_str(guard);
            } else if arg.starts_with('/') {
                out.push('.');
            }
            for c in arg.chars() {
                out.push(c);
                match c {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    '%' if is_filename => out.push_str("%cd:~,%"),
                    _ => {}
                }
            }
            out.push('"');
        }
    }
    Ok(out)
}

/// Builds a command line one argument at a time.
///
/// Alongside the escaped line the builder keeps the argument vector as the
/// program will receive it, for launching without a shell.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    flavor: ShellFlavor,
    line: String,
    words: Vec<String>,
}

impl CommandBuilder {
    /// Start an empty command line.
    pub fn new(flavor: ShellFlavor) -> Self {
        Self {
            flavor,
            line: String::new(),
            words: Vec::new(),
        }
    }

    /// Append an option or other fixed argument.
    pub fn arg(self, arg: &str) -> Result<Self> {
        self.push(arg, false)
    }

    /// Append a filename or program path.
    pub fn file_arg(self, arg: &str) -> Result<Self> {
        self.push(arg, true)
    }

    fn push(mut self, arg: &str, is_filename: bool) -> Result<Self> {
        let escaped = escape_arg(self.flavor, arg, is_filename)?;
        if !self.line.is_empty() {
            self.line.push(' ');
        }
        self.line.push_str(&escaped);
        let word = if is_filename && arg.starts_with('-') {
            format!("{}{}", self.flavor.dash_guard(), arg)
        } else {
            arg.to_string()
        };
        self.words.push(word);
        Ok(self)
    }

    /// The escaped command line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The arguments as the program receives them.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn into_parts(self) -> (String, Vec<String>) {
        (self.line, self.words)
    }
}
