//! Endpoint parsing.
//!
//! An endpoint is either a local path or `[user@]host:path`. A `:` makes
//! the endpoint remote unless a `/` or `\` appears before it, so
//! `./a:b.db` and `/tmp/x:y` stay local. With Windows rules, a drive
//! letter path such as `C:\data\x.db` is local too.

use std::fmt;

/// One side of a sync, as named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A database file on this machine.
    Local(String),
    /// A database file reached over the remote shell.
    Remote {
        /// `host` or `user@host`.
        host: String,
        /// Path on the remote host.
        path: String,
    },
}

impl Endpoint {
    /// Parse with the rules of the platform this binary runs on.
    pub fn parse(spec: &str) -> Self {
        Self::parse_with(spec, cfg!(windows))
    }

    /// Parse, optionally recognizing Windows drive letters.
    pub fn parse_with(spec: &str, windows: bool) -> Self {
        match host_separator(spec, windows) {
            Some(at) => Endpoint::Remote {
                host: spec[..at].to_string(),
                path: spec[at + 1..].to_string(),
            },
            None => Endpoint::Local(spec.to_string()),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote { .. })
    }

    /// The remote host, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Local(_) => None,
            Endpoint::Remote { host, .. } => Some(host),
        }
    }

    /// The database path on whichever machine holds it.
    pub fn path(&self) -> &str {
        match self {
            Endpoint::Local(path) => path,
            Endpoint::Remote { path, .. } => path,
        }
    }

    /// Last component of the path.
    pub fn file_tail(&self) -> &str {
        file_tail(self.path())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local(path) => f.write_str(path),
            Endpoint::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}

/// Byte offset of the `:` separating host from path, if `spec` is remote.
fn host_separator(spec: &str, windows: bool) -> Option<usize> {
    let colon = spec.find(':')?;
    if windows {
        let bytes = spec.as_bytes();
        if colon == 1
            && bytes[0].is_ascii_alphabetic()
            && matches!(bytes.get(2), Some(b'/') | Some(b'\\'))
        {
            return None;
        }
    }
    if spec[..colon].contains(['/', '\\']) {
        return None;
    }
    Some(colon)
}

/// The last `/`-separated component of `path`.
pub fn file_tail(path: &str) -> &str {
    match path.rfind('/') {
        Some(slash) => &path[slash + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_paths() {
        for spec in ["x.db", "/tmp/x.db", "./a:b.db", "dir/host:x", r"dir\h:x", ""] {
            assert_eq!(
                Endpoint::parse_with(spec, false),
                Endpoint::Local(spec.to_string()),
                "{spec}"
            );
        }
    }

    #[test]
    fn test_remote_specs() {
        assert_eq!(
            Endpoint::parse_with("host:/srv/x.db", false),
            Endpoint::Remote {
                host: "host".into(),
                path: "/srv/x.db".into()
            }
        );
        let ep = Endpoint::parse_with("alice@db1:data/x.db", false);
        assert_eq!(ep.host(), Some("alice@db1"));
        assert_eq!(ep.path(), "data/x.db");
        assert_eq!(ep.file_tail(), "x.db");
        assert_eq!(ep.to_string(), "alice@db1:data/x.db");
    }

    #[test]
    fn test_only_first_colon_separates() {
        let ep = Endpoint::parse_with("h:a:b", false);
        assert_eq!(ep.host(), Some("h"));
        assert_eq!(ep.path(), "a:b");
    }

    #[test]
    fn test_windows_drive_letters() {
        assert!(!Endpoint::parse_with(r"C:\data\x.db", true).is_remote());
        assert!(!Endpoint::parse_with("d:/data/x.db", true).is_remote());
        // Without a separator after the colon it is still a host name.
        assert!(Endpoint::parse_with("C:x.db", true).is_remote());
        // Unix rules treat a one-letter host like any other.
        assert!(Endpoint::parse_with("C:/data/x.db", false).is_remote());
    }

    #[test]
    fn test_file_tail() {
        assert_eq!(file_tail("/a/b/c.d"), "c.d");
        assert_eq!(file_tail("c.d"), "c.d");
        assert_eq!(file_tail("dir/"), "");
    }
}
