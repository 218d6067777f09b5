use serde::{Deserialize, Serialize};

/// Declares a transparent UUID newtype usable as an API parameter and as a
/// typed key throughout the services.
#[macro_export]
macro_rules! newtype_uuid {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
            poem_openapi::NewType,
        )]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s)
                    .map_err(|err| format!("Invalid {}: {err}", stringify!($name)))?;
                Ok(Self(uuid))
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

newtype_uuid!(UserId);
newtype_uuid!(WorkerId);
newtype_uuid!(RepositoryId);
newtype_uuid!(PlanId);
newtype_uuid!(RunId);
newtype_uuid!(RunGroupId);

/// An opaque bearer credential. The debug representation is redacted so the
/// value cannot end up in logs via derived formatting.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret {
    pub value: String,
}

impl TokenSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenSecret(****)")
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;
    use std::str::FromStr;

    #[test]
    fn newtype_uuid_round_trips_through_display() {
        let id = WorkerId::new_v4();
        let parsed = WorkerId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn token_secret_debug_is_redacted() {
        let secret = TokenSecret::new("definitely-not-public");
        assert_eq!(format!("{secret:?}"), "TokenSecret(****)");
    }
}
