//! Operation options and name-collision resolution

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Upper bound on `name (N).ext` probes before giving up
pub const MAX_UNIQUE_NAME_ATTEMPTS: u32 = 10_000;

/// What to do when the requested name is already taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    #[default]
    FailIfExists,
    ReplaceExisting,
    GenerateUniqueName,
    Skip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Permanent,
    /// Send to the platform recycle bin
    Recycle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Start from empty content
    #[default]
    Truncate,
    /// Keep existing content; writes overlay it
    Update,
}

/// Outcome of applying a [`CollisionPolicy`] to a desired name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    /// The name is free
    Create(String),
    /// The name is taken and the occupant must be replaced
    Replace(String),
    /// The name is taken and the occupant is kept as-is
    UseExisting(String),
}

impl NameResolution {
    pub fn name(&self) -> &str {
        match self {
            NameResolution::Create(name)
            | NameResolution::Replace(name)
            | NameResolution::UseExisting(name) => name,
        }
    }
}

/// Candidate names `stem (2).ext`, `stem (3).ext`, ...
pub fn unique_name_candidates(desired: &str) -> impl Iterator<Item = String> + '_ {
    let (stem, ext) = split_extension(desired);
    (2..=MAX_UNIQUE_NAME_ATTEMPTS + 1).map(move |n| match ext {
        Some(ext) => format!("{stem} ({n}).{ext}"),
        None => format!("{stem} ({n})"),
    })
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

/// Apply `policy` to `desired`, probing occupancy with `exists`.
pub async fn resolve_name<F, Fut>(
    desired: &str,
    policy: CollisionPolicy,
    mut exists: F,
) -> StorageResult<NameResolution>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = StorageResult<bool>>,
{
    if !exists(desired.to_string()).await? {
        return Ok(NameResolution::Create(desired.to_string()));
    }

    match policy {
        CollisionPolicy::FailIfExists => Err(StorageError::CollisionConflict(desired.to_string())),
        CollisionPolicy::ReplaceExisting => Ok(NameResolution::Replace(desired.to_string())),
        CollisionPolicy::Skip => Ok(NameResolution::UseExisting(desired.to_string())),
        CollisionPolicy::GenerateUniqueName => {
            for candidate in unique_name_candidates(desired) {
                if !exists(candidate.clone()).await? {
                    return Ok(NameResolution::Create(candidate));
                }
            }
            Err(StorageError::CollisionConflict(format!(
                "{desired}: no free name after {MAX_UNIQUE_NAME_ATTEMPTS} attempts"
            )))
        }
    }
}
