//! Moods, gestures, and focus levels.

use std::fmt;
use std::str::FromStr;

use mochi_common::error::MochiError;
use serde::{Deserialize, Serialize};

/// The pet's mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    /// Nothing observed yet.
    #[default]
    Idle,
    /// The user is focused.
    Happy,
    /// The user has been highly focused for a long stretch.
    Excited,
    /// The user is present but distracted.
    Sad,
    /// The user has left.
    Sleepy,
    /// Reacting to a gesture.
    Interact,
}

impl Mood {
    pub const ALL: [Mood; 6] = [
        Mood::Idle,
        Mood::Happy,
        Mood::Excited,
        Mood::Sad,
        Mood::Sleepy,
        Mood::Interact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Idle => "idle",
            Mood::Happy => "happy",
            Mood::Excited => "excited",
            Mood::Sad => "sad",
            Mood::Sleepy => "sleepy",
            Mood::Interact => "interact",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = MochiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| MochiError::invalid_input(format!("Unknown mood: {s}")))
    }
}

/// A discrete gesture event. Recognition itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    Wave,
    Heart,
    Ok,
    #[serde(alias = "thumbs_up")]
    ThumbsUp,
}

impl Gesture {
    pub fn as_str(self) -> &'static str {
        match self {
            Gesture::Wave => "wave",
            Gesture::Heart => "heart",
            Gesture::Ok => "ok",
            Gesture::ThumbsUp => "thumbsup",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gesture {
    type Err = MochiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wave" => Ok(Gesture::Wave),
            "heart" => Ok(Gesture::Heart),
            "ok" => Ok(Gesture::Ok),
            "thumbsup" | "thumbs_up" | "thumbs-up" => Ok(Gesture::ThumbsUp),
            _ => Err(MochiError::invalid_input(format!("Unknown gesture: {s}"))),
        }
    }
}

/// Coarse attention level of the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusLevel {
    #[default]
    Away,
    Distracted,
    Focused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gestures_parse_case_insensitively() {
        assert_eq!("Wave".parse::<Gesture>().unwrap(), Gesture::Wave);
        assert_eq!("thumbs_up".parse::<Gesture>().unwrap(), Gesture::ThumbsUp);
        assert_eq!("THUMBSUP".parse::<Gesture>().unwrap(), Gesture::ThumbsUp);
        let err = "salute".parse::<Gesture>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: Unknown gesture: salute");
    }

    #[test]
    fn moods_round_trip_through_strings() {
        for mood in Mood::ALL {
            assert_eq!(mood.to_string().parse::<Mood>().unwrap(), mood);
        }
        assert!("grumpy".parse::<Mood>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Mood::Sleepy).unwrap(), "\"sleepy\"");
        assert_eq!(serde_json::to_string(&Gesture::ThumbsUp).unwrap(), "\"thumbsup\"");
        let parsed: Gesture = serde_json::from_str("\"thumbs_up\"").unwrap();
        assert_eq!(parsed, Gesture::ThumbsUp);
        assert_eq!(serde_json::to_string(&FocusLevel::Distracted).unwrap(), "\"distracted\"");
    }
}
