//! Logical path syntax
//!
//! Items are addressed by plain path strings. Local and archive paths use the
//! host separator; FTP paths carry a scheme and authority. The helpers here
//! are pure string functions so that classification never touches I/O.

/// Host path separator used when building logical paths
pub const SEPARATOR: char = std::path::MAIN_SEPARATOR;

pub fn is_separator(c: char) -> bool {
    std::path::is_separator(c)
}

/// Strip trailing separators, keeping a lone root separator intact.
pub fn trim_trailing_separators(path: &str) -> &str {
    let trimmed = path.trim_end_matches(is_separator);
    if trimmed.is_empty() && !path.is_empty() {
        &path[..1]
    } else {
        trimmed
    }
}

/// Last segment of `path`, or `""` for a root.
pub fn file_name(path: &str) -> &str {
    let trimmed = trim_trailing_separators(path);
    if trimmed.len() == 1 && trimmed.starts_with(is_separator) {
        return "";
    }
    match trimmed.rfind(is_separator) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent of `path`, or `None` for a root or a bare name.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = trim_trailing_separators(path);
    let idx = trimmed.rfind(is_separator)?;
    if idx + 1 == trimmed.len() {
        return None;
    }
    let parent = trim_trailing_separators(&trimmed[..=idx]);
    Some(if idx == 0 { &trimmed[..1] } else { parent })
}

/// Append `name` to `base` with exactly one separator between them.
pub fn join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches(is_separator);
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with(is_separator) {
        format!("{base}{name}")
    } else {
        format!("{base}{SEPARATOR}{name}")
    }
}

/// True when `name` is usable as a single path segment.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\' || c == '\0')
}

/// Archive path syntax: `<prefix>.<ext>[SEP<entry>]`
pub mod archive {
    use super::is_separator;

    pub const DEFAULT_EXTENSIONS: &[&str] = &[".zip"];

    /// A path split at its container boundary
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchivePath<'a> {
        /// Path of the container file itself
        pub container: &'a str,
        /// Entry path inside the container, host separators, `""` for the root
        pub entry: &'a str,
    }

    impl ArchivePath<'_> {
        pub fn is_root(&self) -> bool {
            self.entry.is_empty()
        }
    }

    /// Split `path` at the first `.<ext>` (case-insensitive) that is followed by
    /// a separator or the end of the string.
    pub fn split<'a, S: AsRef<str>>(path: &'a str, extensions: &[S]) -> Option<ArchivePath<'a>> {
        let lower = path.to_ascii_lowercase();
        let mut boundary: Option<usize> = None;

        for ext in extensions {
            let ext = normalize_extension(ext.as_ref());
            if ext.len() < 2 {
                continue;
            }
            let hit = lower.match_indices(ext.as_str()).map(|(idx, _)| idx + ext.len()).find(|&end| {
                lower[end..].chars().next().map_or(true, is_separator)
            });
            if let Some(end) = hit {
                boundary = Some(boundary.map_or(end, |b| b.min(end)));
            }
        }

        let end = boundary?;
        let entry = path[end..].trim_matches(is_separator);
        Some(ArchivePath { container: &path[..end], entry })
    }

    pub fn normalize_extension(ext: &str) -> String {
        let ext = ext.trim().to_ascii_lowercase();
        if ext.starts_with('.') {
            ext
        } else {
            format!(".{ext}")
        }
    }

    /// Entry path with host separators → zip entry name (`/`-separated).
    pub fn to_entry_name(entry: &str) -> String {
        entry
            .split(|c: char| is_separator(c) || c == '/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Normalize a raw zip entry name. Returns `None` for names that would
    /// escape the container (`..`, absolute or drive-qualified paths).
    pub fn normalize_entry_name(raw: &str) -> Option<String> {
        if raw.starts_with('/') || raw.starts_with('\\') {
            return None;
        }
        let mut segments = Vec::new();
        for segment in raw.split(|c| c == '/' || c == '\\') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                s if s.contains(':') => return None,
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }

    /// Logical path of a normalized entry name inside `container`.
    pub fn logical_path(container: &str, entry_name: &str) -> String {
        if entry_name.is_empty() {
            return container.to_string();
        }
        let sep = super::SEPARATOR.to_string();
        format!("{container}{sep}{}", entry_name.replace('/', &sep))
    }
}

/// FTP path syntax: `scheme://[user@]host[:port]/remote` or `\\host\remote`
pub mod ftp {
    use serde::{Deserialize, Serialize};

    fn is_ftp_separator(c: char) -> bool {
        c == '/' || c == '\\'
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum FtpScheme {
        Ftp,
        /// Implicit TLS
        Ftps,
        /// Explicit TLS upgrade
        Ftpes,
    }

    impl FtpScheme {
        pub fn parse(scheme: &str) -> Option<Self> {
            match scheme.to_ascii_lowercase().as_str() {
                "ftp" => Some(FtpScheme::Ftp),
                "ftps" => Some(FtpScheme::Ftps),
                "ftpes" => Some(FtpScheme::Ftpes),
                _ => None,
            }
        }

        pub fn as_str(&self) -> &'static str {
            match self {
                FtpScheme::Ftp => "ftp",
                FtpScheme::Ftps => "ftps",
                FtpScheme::Ftpes => "ftpes",
            }
        }

        pub fn default_port(&self) -> u16 {
            match self {
                FtpScheme::Ftps => 990,
                FtpScheme::Ftp | FtpScheme::Ftpes => 21,
            }
        }
    }

    /// Parsed FTP path
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FtpLocation {
        pub scheme: FtpScheme,
        pub user: Option<String>,
        pub host: String,
        pub port: u16,
        pub remote_path: String,
    }

    pub fn is_ftp_path(path: &str) -> bool {
        path.split_once("://")
            .map_or(false, |(scheme, _)| FtpScheme::parse(scheme).is_some())
    }

    /// `scheme://authority` or `\\host`, without the trailing separator.
    pub fn authority_prefix(path: &str) -> &str {
        let start = match path.find("://") {
            Some(idx) => idx + 3,
            None => path.len() - path.trim_start_matches(is_ftp_separator).len(),
        };
        let end = path[start..]
            .find(is_ftp_separator)
            .map_or(path.len(), |idx| start + idx);
        &path[..end]
    }

    /// Remote path on the server: `ftp://h/pub/a.txt` and `\\h\pub\a.txt`
    /// both become `/pub/a.txt`.
    pub fn to_remote_path(path: &str) -> String {
        let rest = &path[authority_prefix(path).len()..];
        if rest.trim_matches(is_ftp_separator).is_empty() {
            "/".to_string()
        } else {
            rest.replace('\\', "/")
        }
    }

    /// Inverse of [`to_remote_path`] for the given authority prefix.
    pub fn from_remote_path(prefix: &str, remote: &str) -> String {
        if remote.trim_matches('/').is_empty() {
            return prefix.to_string();
        }
        let sep = if prefix.contains("://") {
            '/'
        } else {
            prefix.chars().next().filter(|c| is_ftp_separator(*c)).unwrap_or('\\')
        };
        let mut out = String::with_capacity(prefix.len() + remote.len() + 1);
        out.push_str(prefix);
        if !remote.starts_with('/') {
            out.push(sep);
        }
        out.extend(remote.chars().map(|c| if c == '/' { sep } else { c }));
        out
    }

    /// Parent of a remote path, `None` at the root.
    pub fn remote_parent(remote: &str) -> Option<String> {
        let trimmed = remote.trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.rfind('/') {
            Some(0) | None => Some("/".to_string()),
            Some(idx) => Some(trimmed[..idx].to_string()),
        }
    }

    pub fn remote_join(dir: &str, name: &str) -> String {
        if dir.ends_with('/') {
            format!("{dir}{name}")
        } else {
            format!("{dir}/{name}")
        }
    }

    /// Parse an FTP path. `\\host\remote` paths are plain FTP. Returns
    /// `None` when the scheme is not FTP or the authority is malformed.
    pub fn parse(path: &str) -> Option<FtpLocation> {
        let prefix = authority_prefix(path);
        let (scheme, authority) = match path.split_once("://") {
            Some((scheme, _)) => {
                let scheme = FtpScheme::parse(scheme)?;
                (scheme, &prefix[scheme.as_str().len() + 3..])
            }
            None if path.starts_with("\\\\") => (FtpScheme::Ftp, &prefix[2..]),
            None => return None,
        };

        let (user, host_port) = match authority.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return None,
            None => (None, authority),
        };

        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            let (host, rest) = bracketed.split_once(']')?;
            let port = match rest.strip_prefix(':') {
                Some(port) => port.parse().ok()?,
                None if rest.is_empty() => scheme.default_port(),
                None => return None,
            };
            (host, port)
        } else {
            match host_port.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().ok()?),
                None => (host_port, scheme.default_port()),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return None;
        }

        Some(FtpLocation {
            scheme,
            user,
            host: host.to_string(),
            port,
            remote_path: to_remote_path(path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_file_name_and_parent() {
        assert_eq!(file_name("/home/user/a.txt"), "a.txt");
        assert_eq!(file_name("/home/user/"), "user");
        assert_eq!(file_name("/"), "");
        assert_eq!(parent("/home/user/a.txt"), Some("/home/user"));
        assert_eq!(parent("/home"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(parent("a.txt"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_join() {
        assert_eq!(join("/home/user", "a.txt"), "/home/user/a.txt");
        assert_eq!(join("/home/user/", "a.txt"), "/home/user/a.txt");
        assert_eq!(join("/", "tmp"), "/tmp");
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("a.txt"));
        assert!(is_valid_name("a (2).txt"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a\\b"));
    }

    mod archive_paths {
        use super::super::archive::*;
        use super::super::SEPARATOR;

        fn p(parts: &[&str]) -> String {
            parts.join(&SEPARATOR.to_string())
        }

        #[test]
        fn test_split_root_and_entry() {
            let path = p(&["", "data", "lib.zip"]);
            let parts = split(&path, DEFAULT_EXTENSIONS).unwrap();
            assert_eq!(parts.container, path);
            assert!(parts.is_root());

            let path = p(&["", "data", "lib.zip", "docs", "b.txt"]);
            let parts = split(&path, DEFAULT_EXTENSIONS).unwrap();
            assert_eq!(parts.container, p(&["", "data", "lib.zip"]));
            assert_eq!(parts.entry, p(&["docs", "b.txt"]));
        }

        #[test]
        fn test_split_is_case_insensitive_and_takes_first_marker() {
            let path = p(&["", "x", "Outer.ZIP", "inner.zip", "a.txt"]);
            let parts = split(&path, DEFAULT_EXTENSIONS).unwrap();
            assert_eq!(parts.container, p(&["", "x", "Outer.ZIP"]));
            assert_eq!(parts.entry, p(&["inner.zip", "a.txt"]));
        }

        #[test]
        fn test_split_requires_boundary() {
            let path = p(&["", "x", "notes.zipper", "a.txt"]);
            assert!(split(&path, DEFAULT_EXTENSIONS).is_none());
            assert!(split(&p(&["", "x", "plain.txt"]), DEFAULT_EXTENSIONS).is_none());

            // the first marker with a boundary wins, even after a false start
            let path = p(&["", "a.zipx", "b.zip"]);
            let parts = split(&path, DEFAULT_EXTENSIONS).unwrap();
            assert_eq!(parts.container, path);
        }

        #[test]
        fn test_split_with_custom_extensions() {
            let path = p(&["", "x", "app.jar", "META-INF"]);
            assert!(split(&path, DEFAULT_EXTENSIONS).is_none());
            let parts = split(&path, &["zip", ".JAR"]).unwrap();
            assert_eq!(parts.entry, "META-INF");
        }

        #[test]
        fn test_entry_name_round_trip() {
            let entry = p(&["docs", "b.txt"]);
            assert_eq!(to_entry_name(&entry), "docs/b.txt");
            assert_eq!(logical_path("lib.zip", "docs/b.txt"), p(&["lib.zip", "docs", "b.txt"]));
            assert_eq!(logical_path("lib.zip", ""), "lib.zip");
        }

        #[test]
        fn test_normalize_entry_name() {
            assert_eq!(normalize_entry_name("docs/").as_deref(), Some("docs"));
            assert_eq!(normalize_entry_name("docs\\b.txt").as_deref(), Some("docs/b.txt"));
            assert_eq!(normalize_entry_name("./a//b").as_deref(), Some("a/b"));
            assert!(normalize_entry_name("../evil").is_none());
            assert!(normalize_entry_name("/etc/passwd").is_none());
            assert!(normalize_entry_name("C:/x").is_none());
            assert!(normalize_entry_name("/").is_none());
        }
    }

    mod ftp_paths {
        use super::super::ftp::*;

        #[test]
        fn test_is_ftp_path() {
            assert!(is_ftp_path("ftp://host/pub"));
            assert!(is_ftp_path("FTPS://host"));
            assert!(is_ftp_path("ftpes://host:2121/a"));
            assert!(!is_ftp_path("http://host/pub"));
            assert!(!is_ftp_path("/home/ftp://x"));
            assert!(!is_ftp_path("\\\\host\\pub"));
        }

        #[test]
        fn test_to_remote_path() {
            assert_eq!(to_remote_path("\\\\host\\pub\\file.txt"), "/pub/file.txt");
            assert_eq!(to_remote_path("ftp://host/pub/file.txt"), "/pub/file.txt");
            assert_eq!(to_remote_path("ftp://host:2121/a"), "/a");
            assert_eq!(to_remote_path("ftp://host"), "/");
            assert_eq!(to_remote_path("ftp://host/"), "/");
        }

        #[test]
        fn test_transform_is_reversible() {
            for path in [
                "\\\\host\\pub\\file.txt",
                "ftp://host/pub/file.txt",
                "ftp://user@host:2121/a/b/c.bin",
                "ftps://host",
                "//host/pub/x",
            ] {
                let prefix = authority_prefix(path);
                assert_eq!(from_remote_path(prefix, &to_remote_path(path)), path);
            }
        }

        #[test]
        fn test_transform_is_pure() {
            let path = "ftp://host/pub/file.txt";
            assert_eq!(to_remote_path(path), to_remote_path(path));
            assert_eq!(authority_prefix(path), "ftp://host");
        }

        #[test]
        fn test_parse() {
            let loc = parse("ftp://alice@files.example.com:2121/pub/a.txt").unwrap();
            assert_eq!(loc.scheme, FtpScheme::Ftp);
            assert_eq!(loc.user.as_deref(), Some("alice"));
            assert_eq!(loc.host, "files.example.com");
            assert_eq!(loc.port, 2121);
            assert_eq!(loc.remote_path, "/pub/a.txt");

            let loc = parse("ftps://host").unwrap();
            assert_eq!(loc.port, 990);
            assert_eq!(loc.remote_path, "/");

            let loc = parse("ftp://[::1]:21/x").unwrap();
            assert_eq!(loc.host, "::1");

            let loc = parse("\\\\host\\pub\\file.txt").unwrap();
            assert_eq!(loc.scheme, FtpScheme::Ftp);
            assert_eq!(loc.host, "host");
            assert_eq!(loc.port, 21);
            assert_eq!(loc.remote_path, "/pub/file.txt");

            assert!(parse("ftp://host:notaport/x").is_none());
            assert!(parse("/srv/ftp/x").is_none());
            assert!(parse("ftp:///x").is_none());
            assert!(parse("http://host/x").is_none());
        }

        #[test]
        fn test_remote_parent_and_join() {
            assert_eq!(remote_parent("/pub/a.txt").as_deref(), Some("/pub"));
            assert_eq!(remote_parent("/pub").as_deref(), Some("/"));
            assert_eq!(remote_parent("/"), None);
            assert_eq!(remote_join("/", "a"), "/a");
            assert_eq!(remote_join("/pub", "a"), "/pub/a");
        }
    }
}
