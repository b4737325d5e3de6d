//! Status colors and alert classification.
//!
//! The severity ordering matters: sweeps, flap suppression and modifier
//! overrides all compare colors by severity, so the enum discriminants
//! encode the ordering directly (green least severe, red most).

use serde::{Deserialize, Serialize};

/// The color of a status log.
///
/// `None` is an internal sentinel for a log that has not yet received
/// its first report; it never appears on the wire as a submitted color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    None = -1,
    Green = 0,
    Clear = 1,
    Blue = 2,
    Purple = 3,
    Yellow = 4,
    Red = 5,
}

impl Color {
    /// Parse a color token, case-insensitively. `None` is not accepted
    /// from the wire.
    pub fn parse(token: &str) -> Option<Color> {
        match token.to_ascii_lowercase().as_str() {
            "green" => Some(Color::Green),
            "clear" => Some(Color::Clear),
            "blue" => Some(Color::Blue),
            "purple" => Some(Color::Purple),
            "yellow" => Some(Color::Yellow),
            "red" => Some(Color::Red),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::None => "none",
            Color::Green => "green",
            Color::Clear => "clear",
            Color::Blue => "blue",
            Color::Purple => "purple",
            Color::Yellow => "yellow",
            Color::Red => "red",
        }
    }

    /// The more severe of two colors.
    pub fn worst(self, other: Color) -> Color {
        if self >= other {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-way alert classification of a color.
///
/// Computed once per color from the configured sets, never
/// reconstructed ad hoc from the color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertClass {
    Ok,
    Alert,
    Undecided,
}

/// Which colors count as "alerting" and which as "OK".
///
/// By default red, yellow and purple page and the rest are OK. A
/// color configured into neither set classifies as `Undecided`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorPolicy {
    #[serde(default = "default_alert_colors")]
    pub alert_colors: Vec<Color>,
    #[serde(default = "default_ok_colors")]
    pub ok_colors: Vec<Color>,
}

fn default_alert_colors() -> Vec<Color> {
    vec![Color::Red, Color::Yellow, Color::Purple]
}

fn default_ok_colors() -> Vec<Color> {
    vec![Color::Green, Color::Clear, Color::Blue]
}

impl Default for ColorPolicy {
    fn default() -> Self {
        Self {
            alert_colors: default_alert_colors(),
            ok_colors: default_ok_colors(),
        }
    }
}

impl ColorPolicy {
    pub fn classify(&self, color: Color) -> AlertClass {
        if self.alert_colors.contains(&color) {
            AlertClass::Alert
        } else if self.ok_colors.contains(&color) {
            AlertClass::Ok
        } else {
            AlertClass::Undecided
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Color::Red > Color::Yellow);
        assert!(Color::Yellow > Color::Purple);
        assert!(Color::Purple > Color::Blue);
        assert!(Color::Blue > Color::Clear);
        assert!(Color::Clear > Color::Green);
        assert_eq!(Color::Green.worst(Color::Red), Color::Red);
        assert_eq!(Color::Red.worst(Color::Blue), Color::Red);
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(Color::parse("RED"), Some(Color::Red));
        assert_eq!(Color::parse("Green"), Some(Color::Green));
        assert_eq!(Color::parse("none"), None);
        assert_eq!(Color::parse("mauve"), None);
    }

    #[test]
    fn test_default_classification() {
        let policy = ColorPolicy::default();
        assert_eq!(policy.classify(Color::Red), AlertClass::Alert);
        assert_eq!(policy.classify(Color::Purple), AlertClass::Alert);
        assert_eq!(policy.classify(Color::Green), AlertClass::Ok);
        assert_eq!(policy.classify(Color::Blue), AlertClass::Ok);
    }

    #[test]
    fn test_unconfigured_color_is_undecided() {
        let policy = ColorPolicy {
            alert_colors: vec![Color::Red],
            ok_colors: vec![Color::Green],
        };
        assert_eq!(policy.classify(Color::Yellow), AlertClass::Undecided);
    }
}
