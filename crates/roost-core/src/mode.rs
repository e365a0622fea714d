//! Room purpose classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a room is used for.
///
/// The mode is decided once, on the first setup of a room, and persisted.
/// An unclassified room is represented by the absence of a stored mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// Tracked, but no plugins run here.
    Disabled,
    /// Administrative commands for linked interaction rooms.
    Config,
    /// End-user facing plugins run here.
    Interaction,
    /// Both of the above.
    ConfigAndInteraction,
}

impl RoomMode {
    /// Storage key under which the mode is kept in `room_data`.
    pub const STORAGE_KEY: &'static str = "room_mode";

    /// Returns `true` if the room accepts configuration commands.
    pub fn is_config(self) -> bool {
        matches!(self, Self::Config | Self::ConfigAndInteraction)
    }

    /// Returns `true` if end-user plugins run in the room.
    pub fn is_interaction(self) -> bool {
        matches!(self, Self::Interaction | Self::ConfigAndInteraction)
    }

    /// Stable string form used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Config => "config",
            Self::Interaction => "interaction",
            Self::ConfigAndInteraction => "config+interaction",
        }
    }
}

impl fmt::Display for RoomMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "config" => Ok(Self::Config),
            "interaction" => Ok(Self::Interaction),
            "config+interaction" => Ok(Self::ConfigAndInteraction),
            other => Err(format!("unknown room mode '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flags() {
        assert!(RoomMode::Config.is_config());
        assert!(!RoomMode::Config.is_interaction());
        assert!(RoomMode::ConfigAndInteraction.is_config());
        assert!(RoomMode::ConfigAndInteraction.is_interaction());
        assert!(!RoomMode::Disabled.is_config() && !RoomMode::Disabled.is_interaction());
    }

    #[test]
    fn test_mode_parse() {
        for mode in [
            RoomMode::Disabled,
            RoomMode::Config,
            RoomMode::Interaction,
            RoomMode::ConfigAndInteraction,
        ] {
            assert_eq!(mode.as_str().parse::<RoomMode>(), Ok(mode));
        }
        assert!("3".parse::<RoomMode>().is_err());
    }
}
