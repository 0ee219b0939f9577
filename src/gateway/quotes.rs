//! Quote-pairing integrity between a source paragraph and its translation.
//!
//! Quote styles are interchangeable: `「…」` in the source may become `“…”` or
//! `"…"` in the translation. What is not allowed is a translation with fewer
//! opening or closing quotes than its source.

use std::fmt;

use serde::Serialize;

const OPENING: &[char] = &['“', '「', '『', '«', '〝', '﹁', '﹃'];
const CLOSING: &[char] = &['”', '」', '』', '»', '〞', '〟', '﹂', '﹄'];
// Straight quotes alternate: the first opens, the next closes.
const NEUTRAL: &[char] = &['"', '＂'];

/// Opening and closing quote marks found in a text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteCounts {
    pub opening: usize,
    pub closing: usize,
}

impl QuoteCounts {
    fn get(&self, side: QuoteSide) -> usize {
        match side {
            QuoteSide::Opening => self.opening,
            QuoteSide::Closing => self.closing,
        }
    }
}

/// Counts quote marks by side. Straight quotes alternate between opening and closing.
pub fn count_quotes(text: &str) -> QuoteCounts {
    let mut counts = QuoteCounts::default();
    let mut neutral_open = false;
    for c in text.chars() {
        if OPENING.contains(&c) {
            counts.opening += 1;
        } else if CLOSING.contains(&c) {
            counts.closing += 1;
        } else if NEUTRAL.contains(&c) {
            if neutral_open {
                counts.closing += 1;
            } else {
                counts.opening += 1;
            }
            neutral_open = !neutral_open;
        }
    }
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSide {
    Opening,
    Closing,
}

impl fmt::Display for QuoteSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSide::Opening => write!(f, "opening"),
            QuoteSide::Closing => write!(f, "closing"),
        }
    }
}

/// A quote side the translation has fewer of than the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteShortfall {
    pub side: QuoteSide,
    /// Count in the source.
    pub expected: usize,
    /// Count in the translation.
    pub found: usize,
}

/// First quote side, opening before closing, that the translation under-counts.
pub fn missing_quote_side(source: &str, translation: &str) -> Option<QuoteShortfall> {
    let src = count_quotes(source);
    let dst = count_quotes(translation);
    [QuoteSide::Opening, QuoteSide::Closing]
        .into_iter()
        .find(|side| dst.get(*side) < src.get(*side))
        .map(|side| QuoteShortfall {
            side,
            expected: src.get(side),
            found: dst.get(side),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(source: &str, translation: &str) -> Option<QuoteSide> {
        missing_quote_side(source, translation).map(|s| s.side)
    }

    #[test]
    fn counts_each_class() {
        assert_eq!(
            count_quotes("「你好」他说，『好』"),
            QuoteCounts {
                opening: 2,
                closing: 2
            }
        );
        assert_eq!(
            count_quotes(r#"He said "hi". "Bye"."#),
            QuoteCounts {
                opening: 2,
                closing: 2
            }
        );
    }

    #[test]
    fn straight_quotes_alternate() {
        assert_eq!(
            count_quotes("\"Let's go"),
            QuoteCounts {
                opening: 1,
                closing: 0
            }
        );
        assert_eq!(side("「走吧」", "\"Let's go"), Some(QuoteSide::Closing));
    }

    #[test]
    fn style_substitution_is_fine() {
        assert_eq!(side("「走吧」", "“Let's go”"), None);
        assert_eq!(side("「走吧」", "\"Let's go\""), None);
        assert_eq!(side("“走吧”", "「行く」"), None);
        // Extra quotes in the translation are allowed.
        assert_eq!(side("走吧", "“Let's go”"), None);
    }

    #[test]
    fn dropped_sides_are_reported() {
        assert_eq!(side("「走吧」", "Let's go"), Some(QuoteSide::Opening));
        assert_eq!(side("「走吧」", "“Let's go"), Some(QuoteSide::Closing));
    }

    #[test]
    fn fewer_quote_pairs_than_the_source_are_reported() {
        assert_eq!(
            missing_quote_side("「走吧」「好」", "“Let's go” Fine."),
            Some(QuoteShortfall {
                side: QuoteSide::Opening,
                expected: 2,
                found: 1,
            })
        );
    }

    #[test]
    fn apostrophes_do_not_count() {
        assert_eq!(count_quotes("it’s John’s"), QuoteCounts::default());
        assert_eq!(side("没有引号", "It’s fine"), None);
    }
}
