use std::fmt;

/// A single keyed element derived from one press duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Short press (duration at or below the dot threshold)
    Dot,
    /// Long press (duration strictly above the dot threshold)
    Dash,
}

impl Signal {
    /// Classify a press duration against the dot threshold (pure, testable)
    ///
    /// A duration equal to `dot_max_ms` is still a dot.
    #[must_use]
    pub const fn from_duration(duration_ms: u64, dot_max_ms: u64) -> Self {
        if duration_ms > dot_max_ms {
            Self::Dash
        } else {
            Self::Dot
        }
    }

    /// Character used in code strings and snapshots
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Dash => '-',
        }
    }

    /// Parse a single code character
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Self::Dot),
            '-' => Some(Self::Dash),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Render a signal sequence as a code string of '.' and '-'
#[must_use]
pub fn render(signals: &[Signal]) -> String {
    signals.iter().map(|s| s.as_char()).collect()
}

/// Parse a code string into signals, `None` if it contains anything but '.' and '-'
#[must_use]
pub fn parse(code: &str) -> Option<Vec<Signal>> {
    code.chars().map(Signal::from_char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_boundary_is_dot() {
        assert_eq!(Signal::from_duration(150, 150), Signal::Dot);
        assert_eq!(Signal::from_duration(151, 150), Signal::Dash);
        assert_eq!(Signal::from_duration(0, 150), Signal::Dot);
    }

    #[test]
    fn test_render_and_parse() {
        let signals = vec![Signal::Dash, Signal::Dot, Signal::Dash];
        assert_eq!(render(&signals), "-.-");
        assert_eq!(parse("-.-"), Some(signals));
        assert_eq!(parse(""), Some(vec![]));
        assert_eq!(parse(".x-"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Signal::Dot.to_string(), ".");
        assert_eq!(Signal::Dash.to_string(), "-");
    }
}
