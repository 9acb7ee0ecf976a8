//! Name validation and the macro defining typed names.

/// Maximum length of an operator-chosen name, in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// Maximum length of an id assigned by a remote controller, in bytes.
pub const MAX_REMOTE_ID_LEN: usize = 255;

/// Validate an operator-chosen name against the DNS-label-like alphabet.
#[doc(hidden)]
pub fn validate_name(kind: &'static str, s: &str) -> Result<(), crate::NameError> {
    if s.is_empty() {
        return Err(crate::NameError::Empty { kind });
    }

    if s.len() > MAX_NAME_LEN {
        return Err(crate::NameError::TooLong {
            kind,
            name: s.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    let mut chars = s.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            return Err(crate::NameError::InvalidStart {
                kind,
                name: s.to_string(),
            });
        }
    }

    for ch in chars {
        let allowed =
            ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.');
        if !allowed {
            return Err(crate::NameError::InvalidChar {
                kind,
                name: s.to_string(),
                ch,
            });
        }
    }

    Ok(())
}

/// Validate an id assigned by a remote controller.
///
/// Such ids are opaque (`KieServerBaseIntegrationTest@2016-01-01`): any
/// printable text except whitespace and `/`, since they end up as URL path
/// segments.
#[doc(hidden)]
pub fn validate_remote_id(kind: &'static str, s: &str) -> Result<(), crate::NameError> {
    if s.is_empty() {
        return Err(crate::NameError::Empty { kind });
    }

    if s.len() > MAX_REMOTE_ID_LEN {
        return Err(crate::NameError::TooLong {
            kind,
            name: s.to_string(),
            max: MAX_REMOTE_ID_LEN,
        });
    }

    if let Some(ch) = s
        .chars()
        .find(|ch| ch.is_whitespace() || ch.is_control() || *ch == '/')
    {
        return Err(crate::NameError::InvalidChar {
            kind,
            name: s.to_string(),
            ch,
        });
    }

    Ok(())
}

/// Macro to define a validated name.
///
/// The validator defaults to [`validate_name`]; ids assigned elsewhere pass
/// [`validate_remote_id`] instead.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` running the validator
/// - `as_str()`, `Display` and `FromStr`
/// - `Serialize` and validating `Deserialize`
///
/// # Example
///
/// ```ignore
/// define_name!(NodeRole, "node role");
/// define_name!(TemplateId, "server template", validate_remote_id);
///
/// let role: NodeRole = "secondary".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal) => {
        $crate::define_name!($name, $kind, validate_name);
    };
    ($name:ident, $kind:literal, $validate:ident) => {
        /// A validated name for this resource type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Human-readable kind used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::NameError> {
                $crate::$validate(Self::KIND, s)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the name as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
