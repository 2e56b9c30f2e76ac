//! Duration-category / content-type rotation.
//!
//! The rotation order is an ordered list of tokens, each either one of the
//! four duration categories or a content type code. The controller holds a
//! pointer that only advances after a non-featured item is placed (or when a
//! category yields nothing, to avoid getting stuck).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Duration buckets assigned at analysis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationCategory {
    Id,
    Spots,
    ShortForm,
    LongForm,
}

impl DurationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Spots => "spots",
            Self::ShortForm => "short_form",
            Self::LongForm => "long_form",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "id" => Some(Self::Id),
            "spots" => Some(Self::Spots),
            "short_form" => Some(Self::ShortForm),
            "long_form" => Some(Self::LongForm),
            _ => None,
        }
    }

    /// Classify a duration in seconds into its category.
    pub fn classify(duration_seconds: f64) -> Self {
        if duration_seconds < 16.0 {
            Self::Id
        } else if duration_seconds < 120.0 {
            Self::Spots
        } else if duration_seconds < 1200.0 {
            Self::ShortForm
        } else {
            Self::LongForm
        }
    }

    /// Whether this category counts as short-form for theme separation
    /// (everything but long_form).
    pub fn is_short_form(self) -> bool {
        !matches!(self, Self::LongForm)
    }
}

impl fmt::Display for DurationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rotation slot request: either a duration category or a content type.
///
/// The variant decides which column the candidate query filters on and which
/// default-delay table applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RotationToken {
    Category(DurationCategory),
    /// Content type code, stored lower-cased (`an`, `bmp`, `psa`, ...).
    ContentType(String),
}

impl RotationToken {
    /// Parse a config token: the four category names map to categories,
    /// anything else is treated as a content type.
    pub fn parse(token: &str) -> Self {
        match DurationCategory::parse(token) {
            Some(category) => Self::Category(category),
            None => Self::ContentType(token.to_lowercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Category(category) => category.as_str(),
            Self::ContentType(ty) => ty.as_str(),
        }
    }

    pub fn category(&self) -> Option<DurationCategory> {
        match self {
            Self::Category(category) => Some(*category),
            Self::ContentType(_) => None,
        }
    }
}

impl fmt::Display for RotationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cyclic pointer over the configured rotation order.
#[derive(Debug, Clone)]
pub struct RotationController {
    order: Vec<RotationToken>,
    index: usize,
}

impl RotationController {
    pub fn new(order: &[String]) -> Self {
        let order: Vec<RotationToken> = order.iter().map(|t| RotationToken::parse(t)).collect();
        debug_assert!(!order.is_empty());
        Self { order, index: 0 }
    }

    /// The token at the pointer, without advancing.
    pub fn current(&self) -> &RotationToken {
        &self.order[self.index]
    }

    /// Move the pointer to the next token, wrapping.
    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.order.len();
    }

    /// Rewind to the start of the order. Called at each new day boundary.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// True when the pointer sits at the start of the order, i.e. a full
    /// cycle has just completed.
    pub fn at_cycle_start(&self) -> bool {
        self.index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(DurationCategory::classify(0.0), DurationCategory::Id);
        assert_eq!(DurationCategory::classify(15.9), DurationCategory::Id);
        assert_eq!(DurationCategory::classify(16.0), DurationCategory::Spots);
        assert_eq!(DurationCategory::classify(119.9), DurationCategory::Spots);
        assert_eq!(DurationCategory::classify(120.0), DurationCategory::ShortForm);
        assert_eq!(DurationCategory::classify(1199.0), DurationCategory::ShortForm);
        assert_eq!(DurationCategory::classify(1200.0), DurationCategory::LongForm);
    }

    #[test]
    fn test_token_parse() {
        assert_eq!(
            RotationToken::parse("spots"),
            RotationToken::Category(DurationCategory::Spots)
        );
        assert_eq!(
            RotationToken::parse("BMP"),
            RotationToken::ContentType("bmp".to_owned())
        );
    }

    #[test]
    fn test_rotation_cycle() {
        let order = vec![
            "id".to_owned(),
            "short_form".to_owned(),
            "long_form".to_owned(),
            "spots".to_owned(),
        ];
        let mut rotation = RotationController::new(&order);
        assert_eq!(rotation.current().as_str(), "id");
        // current() does not advance
        assert_eq!(rotation.current().as_str(), "id");
        rotation.advance();
        assert_eq!(rotation.current().as_str(), "short_form");
        rotation.advance();
        rotation.advance();
        assert_eq!(rotation.current().as_str(), "spots");
        assert!(!rotation.at_cycle_start());
        rotation.advance();
        assert!(rotation.at_cycle_start());
        rotation.advance();
        rotation.reset();
        assert_eq!(rotation.current().as_str(), "id");
    }
}
