use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Interaction state of one field.
///
/// `is_dirty` only ever goes from false to true. `is_touched` is set by a
/// committed blur and likewise never reverts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UiState {
    pub is_dirty: bool,
    pub is_focused: bool,
    pub is_touched: bool,
}

/// When a field's first error message is displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShowError {
    #[default]
    Never,
    Always,
    IfDirty,
    IfTouched,
    IfDirtyAndTouched,
}

impl ShowError {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "never" => Some(ShowError::Never),
            "always" => Some(ShowError::Always),
            "dirty" | "if-dirty" => Some(ShowError::IfDirty),
            "touched" | "if-touched" => Some(ShowError::IfTouched),
            "dirty+touched" | "if-dirty-and-touched" => Some(ShowError::IfDirtyAndTouched),
            _ => None,
        }
    }

    pub fn allows(&self, ui: &UiState) -> bool {
        match self {
            ShowError::Never => false,
            ShowError::Always => true,
            ShowError::IfDirty => ui.is_dirty,
            ShowError::IfTouched => ui.is_touched,
            ShowError::IfDirtyAndTouched => ui.is_dirty && ui.is_touched,
        }
    }
}

impl<'de> Deserialize<'de> for ShowError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Policy(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(ShowError::Always),
            Raw::Flag(false) => Ok(ShowError::Never),
            Raw::Policy(s) => ShowError::parse(&s)
                .ok_or_else(|| de::Error::custom(format!("unknown showError policy '{s}'"))),
        }
    }
}
