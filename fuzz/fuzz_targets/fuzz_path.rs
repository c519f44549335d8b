// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for archive and FTP path classification

#![no_main]

use libfuzzer_sys::fuzz_target;
use vstore_core::path::{self as vpath, archive, ftp};

/// No trailing separator, no empty segments, one separator style.
fn well_formed(path: &str) -> bool {
    let rest = &path[ftp::authority_prefix(path).len()..];
    let (sep, other) = if path.contains("://") { ('/', '\\') } else { ('\\', '/') };
    !rest.contains(other) && !rest.ends_with(sep) && !rest.split(sep).skip(1).any(str::is_empty)
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(parts) = archive::split(input, archive::DEFAULT_EXTENSIONS) {
        assert!(input.starts_with(parts.container));
        let _ = archive::to_entry_name(parts.entry);
    }
    if let Some(name) = archive::normalize_entry_name(input) {
        assert!(!name.starts_with('/'));
    }

    let _ = vpath::file_name(input);
    let _ = vpath::parent(input);

    if let Some(location) = ftp::parse(input) {
        assert!(location.remote_path.starts_with('/'));
        if well_formed(input) {
            let prefix = ftp::authority_prefix(input);
            let remote = ftp::to_remote_path(input);
            assert_eq!(ftp::from_remote_path(prefix, &remote), input);
        }
        let _ = ftp::remote_parent(&location.remote_path);
    }
});
