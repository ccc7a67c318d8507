use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A named partition of records sharing one `id` namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "dreams")]
    Dreams,
    #[serde(rename = "goals")]
    Goals,
    #[serde(rename = "voiceNotes")]
    VoiceNotes,
    #[serde(rename = "autocomplete")]
    Autocomplete,
}

impl Collection {
    /// Every collection, in schema order.
    pub const ALL: [Collection; 4] = [
        Collection::Dreams,
        Collection::Goals,
        Collection::VoiceNotes,
        Collection::Autocomplete,
    ];

    /// Storage name of the collection.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dreams => "dreams",
            Self::Goals => "goals",
            Self::VoiceNotes => "voiceNotes",
            Self::Autocomplete => "autocomplete",
        }
    }

    /// Collections holding binary payloads. These never fall back to the
    /// flat key-value tier and are never enveloped.
    pub const fn is_blob(&self) -> bool {
        matches!(self, Self::VoiceNotes)
    }

    /// Collections whose records are enveloped while encryption is enabled.
    pub const fn is_encryptable(&self) -> bool {
        matches!(self, Self::Dreams | Self::Goals)
    }

    /// Key under which the flat key-value tier stores this collection as a
    /// serialized array. The first three are also the legacy keys consumed
    /// by the schema migrator.
    pub const fn kv_key(&self) -> &'static str {
        match self {
            Self::Dreams => "dreamJournalEntries",
            Self::Goals => "dreamJournalGoals",
            Self::VoiceNotes => "dreamJournalVoiceNotes",
            Self::Autocomplete => "dreamJournalAutocomplete",
        }
    }

    /// Legacy flat-storage key predating the structured store, if any.
    pub const fn legacy_key(&self) -> Option<&'static str> {
        match self {
            Self::Dreams | Self::Goals | Self::VoiceNotes => Some(self.kv_key()),
            Self::Autocomplete => None,
        }
    }

    /// Schema version that introduced the collection.
    pub const fn introduced_in(&self) -> u32 {
        match self {
            Self::Dreams | Self::VoiceNotes => 1,
            Self::Goals => 2,
            Self::Autocomplete => 3,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dreams" => Ok(Self::Dreams),
            "goals" => Ok(Self::Goals),
            "voiceNotes" | "voice-notes" | "voice_notes" => Ok(Self::VoiceNotes),
            "autocomplete" => Ok(Self::Autocomplete),
            other => Err(TypeError::UnknownCollection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for c in Collection::ALL {
            assert_eq!(c.as_str().parse::<Collection>().unwrap(), c);
        }
    }

    #[test]
    fn serde_uses_storage_names() {
        let json = serde_json::to_string(&Collection::VoiceNotes).unwrap();
        assert_eq!(json, "\"voiceNotes\"");
    }

    #[test]
    fn unknown_name_rejected() {
        let err = "tips".parse::<Collection>().unwrap_err();
        assert_eq!(err, TypeError::UnknownCollection("tips".into()));
    }

    #[test]
    fn blob_collections_are_never_encryptable() {
        for c in Collection::ALL {
            assert!(!(c.is_blob() && c.is_encryptable()));
        }
    }

    #[test]
    fn legacy_keys_only_for_original_collections() {
        assert_eq!(Collection::Dreams.legacy_key(), Some("dreamJournalEntries"));
        assert!(Collection::Autocomplete.legacy_key().is_none());
    }
}
