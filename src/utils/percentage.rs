use std::{fmt::Display, ops::Deref};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Share of `part` in `whole`. An empty whole has no shares, so it's 0%.
pub fn share(part: i64, whole: i64) -> Percentage {
    if whole <= 0 {
        return Percentage(0.);
    }
    Percentage(part.max(0) as f64 / whole as f64 * 100.)
}

#[cfg(test)]
mod tests {
    use super::share;

    #[test]
    fn test_share() {
        assert_eq!(share(3600, 5400).to_string(), "66.7%");
        assert_eq!(*share(1, 1), 100.);
        assert_eq!(*share(10, 0), 0.);
    }
}
