//! Profile identifiers
//!
//! A profile is addressed as `scope/name` (scope optional) with an optional
//! full semantic version: `starwars/character-information@1.0.2`. Both scope
//! and name follow the document-name grammar `[a-z][a-z0-9_-]*`.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Full semantic version of a profile (`major.minor.patch[-label]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileVersion {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
    /// Optional prerelease label
    pub label: Option<String>,
}

impl ProfileVersion {
    /// Construct a version without a label.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            label: None,
        }
    }
}

impl fmt::Display for ProfileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.label {
            write!(f, "-{label}")?;
        }
        Ok(())
    }
}

impl FromStr for ProfileVersion {
    type Err = Error;

    /// Parse a full `major.minor.patch[-label]` version.
    ///
    /// Partial versions (`1`, `1.0`) are rejected; the SDK never guesses
    /// missing components.
    fn from_str(s: &str) -> Result<Self> {
        let (numbers, label) = match s.split_once('-') {
            Some((numbers, label)) if !label.is_empty() => (numbers, Some(label.to_string())),
            Some(_) => {
                return Err(Error::unexpected(format!(
                    "Invalid profile version '{s}': empty prerelease label"
                )));
            }
            None => (s, None),
        };

        let mut components = numbers.split('.');
        let (major, minor, patch) = match (components.next(), components.next(), components.next())
        {
            (Some(major), Some(minor), Some(patch)) if components.next().is_none() => {
                (major, minor, patch)
            }
            _ => {
                return Err(Error::unexpected(format!(
                    "Invalid profile version '{s}': expected major.minor.patch"
                )));
            }
        };

        let parse = |component: &str| -> Result<u64> {
            component.parse().map_err(|_| {
                Error::unexpected(format!(
                    "Invalid profile version '{s}': '{component}' is not a number"
                ))
            })
        };

        Ok(Self {
            major: parse(major)?,
            minor: parse(minor)?,
            patch: parse(patch)?,
            label,
        })
    }
}

/// Parsed profile identifier: optional scope, name, optional version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileId {
    /// Optional scope (`starwars` in `starwars/character-information`)
    pub scope: Option<String>,
    /// Profile name
    pub name: String,
    /// Optional pinned version
    pub version: Option<ProfileVersion>,
}

impl ProfileId {
    /// The id without its version (`scope/name`).
    pub fn without_version(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Return a copy with the version replaced.
    #[must_use]
    pub fn with_version(&self, version: ProfileVersion) -> Self {
        Self {
            scope: self.scope.clone(),
            name: self.name.clone(),
            version: Some(version),
        }
    }

    /// Relative path of this profile inside a grid or cache directory
    /// (`scope/name` becomes a nested directory).
    pub fn as_path(&self) -> String {
        self.without_version()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.without_version())?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

impl FromStr for ProfileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (id, version) = match s.split_once('@') {
            Some((id, version)) => (id, Some(version.parse()?)),
            None => (s, None),
        };

        let (scope, name) = match id.split_once('/') {
            Some((scope, name)) => (Some(scope), name),
            None => (None, id),
        };

        if let Some(scope) = scope {
            check_document_name(scope, "scope")?;
        }
        check_document_name(name, "name")?;

        Ok(Self {
            scope: scope.map(str::to_string),
            name: name.to_string(),
            version,
        })
    }
}

/// Validate the document-name grammar `[a-z][a-z0-9_-]*`.
fn check_document_name(value: &str, part: &str) -> Result<()> {
    let valid = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::unexpected(format!(
            "Invalid profile {part} '{value}': must match [a-z][a-z0-9_-]*"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scoped_id_with_version() {
        let id: ProfileId = "starwars/character-information@1.0.2".parse().unwrap();

        assert_eq!(id.scope.as_deref(), Some("starwars"));
        assert_eq!(id.name, "character-information");
        assert_eq!(id.version, Some(ProfileVersion::new(1, 0, 2)));
        assert_eq!(id.to_string(), "starwars/character-information@1.0.2");
    }

    #[test]
    fn parses_unscoped_id() {
        let id: ProfileId = "send-email".parse().unwrap();

        assert_eq!(id.scope, None);
        assert_eq!(id.without_version(), "send-email");
    }

    #[test]
    fn parses_prerelease_label() {
        let version: ProfileVersion = "2.1.0-beta.3".parse().unwrap();
        assert_eq!(version.label.as_deref(), Some("beta.3"));
        assert_eq!(version.to_string(), "2.1.0-beta.3");
    }

    #[test]
    fn rejects_partial_versions() {
        assert!("profile@1".parse::<ProfileId>().is_err());
        assert!("profile@1.0".parse::<ProfileId>().is_err());
        assert!("1.x.0".parse::<ProfileVersion>().is_err());
    }

    #[test]
    fn rejects_bad_document_names() {
        assert!("Bad/name".parse::<ProfileId>().is_err());
        assert!("scope/UPPER".parse::<ProfileId>().is_err());
        assert!("9starts-with-digit".parse::<ProfileId>().is_err());
        assert!("ok_name-2".parse::<ProfileId>().is_ok());
    }
}
