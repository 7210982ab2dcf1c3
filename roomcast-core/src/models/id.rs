use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Room key chosen by clients (opaque, never generated server-side)
    RoomId
);

string_id!(
    /// Connection-scoped client identity (12-char nanoid)
    ClientId
);

string_id!(
    /// Media-plane transport identifier issued by the media engine
    TransportId
);

string_id!(
    /// Producer identifier issued by the media engine
    ProducerId
);

string_id!(
    /// Consumer identifier issued by the media engine
    ConsumerId
);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}
