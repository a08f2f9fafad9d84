//! Response shape selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ExportError;

/// What a caller gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// JSON with face boxes only.
    #[default]
    Json,
    /// The anonymized image bytes, nothing else.
    Image,
    /// JSON with face boxes and the anonymized image as base64.
    JsonImage,
}

impl OutputMode {
    /// All modes, in declaration order.
    pub const ALL: [Self; 3] = [Self::Json, Self::Image, Self::JsonImage];

    /// Whether the pipeline must blur and encode an image for this mode.
    #[must_use]
    pub const fn needs_image(self) -> bool {
        matches!(self, Self::Image | Self::JsonImage)
    }

    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Image => "image",
            Self::JsonImage => "json_image",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ExportError::UnknownOutputMode(s.to_owned()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_wire_name() {
        for mode in OutputMode::ALL {
            assert_eq!(mode.as_str().parse::<OutputMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), mode.as_str());
        }
    }

    #[test]
    fn parsing_ignores_case_and_whitespace() {
        assert_eq!(
            " JSON_IMAGE\n".parse::<OutputMode>().unwrap(),
            OutputMode::JsonImage
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = "svg".parse::<OutputMode>().unwrap_err();
        assert!(matches!(err, ExportError::UnknownOutputMode(ref s) if s == "svg"));
        assert!(err.to_string().contains("json_image"));
    }

    #[test]
    fn only_image_modes_need_an_image() {
        assert!(!OutputMode::Json.needs_image());
        assert!(OutputMode::Image.needs_image());
        assert!(OutputMode::JsonImage.needs_image());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&OutputMode::JsonImage).unwrap();
        assert_eq!(json, "\"json_image\"");
    }
}
