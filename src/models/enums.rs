use serde::{Deserialize, Serialize};

use super::InvalidEnum;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnum;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Provenance {
    Retail => "retail",
    Institutional => "institutional",
});

str_enum!(RecordCategory {
    Fact => "FACT",
    Principle => "PRINCIPLE",
    Opinion => "OPINION",
});

str_enum!(SelectionStrategy {
    RoundRobin => "round-robin",
    Random => "random",
});

str_enum!(IdScheme {
    Deterministic => "deterministic",
    Random => "random",
});

impl Provenance {
    pub const ALL: [Provenance; 2] = [Provenance::Retail, Provenance::Institutional];
}

impl RecordCategory {
    /// Models answer in whatever case they like; accept ` fact `, `Fact`, etc.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        raw.trim().to_ascii_uppercase().parse().ok()
    }
}
