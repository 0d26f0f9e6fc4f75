//! Fuzzy string scoring on a 0–100 scale.
//!
//! The scorers follow the usual family of fuzzy ratios: a plain indel
//! ratio, a best-substring ratio, and token-based variants that ignore word
//! order (`token_sort_ratio`) or word order and repetition
//! (`token_set_ratio`).
//!
//! The core [`ratio`] is the indel similarity `2 * LCS / (len(a) + len(b))`,
//! where insertions and deletions cost 1 and there is no substitution. A
//! substitution therefore costs two edits, which keeps scores on the same
//! scale as the 75/85/90 thresholds the directory search is tuned for.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DirectoryError;

/// Similarity score between 0 and 100.
pub type Score = u8;

/// Available scoring functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scorer {
    /// Whole-string indel ratio.
    Ratio,
    /// Best ratio of the shorter string against same-length windows of the longer.
    PartialRatio,
    /// Ratio after sorting tokens.
    TokenSortRatio,
    /// Ratio over token intersection and differences; ignores order and repeats.
    #[default]
    TokenSetRatio,
    /// Weighted combination picking the most suitable of the above.
    WRatio,
}

impl Scorer {
    /// Scores `a` against `b`.
    pub fn score(&self, a: &str, b: &str) -> Score {
        match self {
            Scorer::Ratio => ratio(a, b),
            Scorer::PartialRatio => partial_ratio(a, b),
            Scorer::TokenSortRatio => token_sort_ratio(a, b),
            Scorer::TokenSetRatio => token_set_ratio(a, b),
            Scorer::WRatio => w_ratio(a, b),
        }
    }

    /// Kebab-case name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Scorer::Ratio => "ratio",
            Scorer::PartialRatio => "partial-ratio",
            Scorer::TokenSortRatio => "token-sort-ratio",
            Scorer::TokenSetRatio => "token-set-ratio",
            Scorer::WRatio => "w-ratio",
        }
    }
}

impl fmt::Display for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scorer {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "ratio" => Ok(Scorer::Ratio),
            "partial-ratio" => Ok(Scorer::PartialRatio),
            "token-sort-ratio" => Ok(Scorer::TokenSortRatio),
            "token-set-ratio" => Ok(Scorer::TokenSetRatio),
            "w-ratio" | "wratio" => Ok(Scorer::WRatio),
            other => Err(DirectoryError::Config(format!("Unknown scorer '{}'", other))),
        }
    }
}

/// Lower-cases, replaces non-alphanumerics with spaces, and collapses whitespace.
pub fn full_process(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Indel similarity of the raw strings.
///
/// An empty side always scores 0.
pub fn ratio(a: &str, b: &str) -> Score {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let common = lcs_len(&a, &b);
    to_score((2 * common) as f64 / (a.len() + b.len()) as f64)
}

/// Length of the longest common subsequence, one DP row at a time.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diagonal = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Best [`ratio`] of the shorter string against any equally long window of the longer.
pub fn partial_ratio(a: &str, b: &str) -> Score {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    if short_len == 0 {
        return 0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    if long_chars.len() == short_len {
        return ratio(short, long);
    }

    let mut best = 0;
    for window in long_chars.windows(short_len) {
        let candidate: String = window.iter().collect();
        best = best.max(ratio(short, &candidate));
        if best == 100 {
            break;
        }
    }
    best
}

/// Ratio of the processed strings with their tokens sorted.
pub fn token_sort_ratio(a: &str, b: &str) -> Score {
    token_sort(a, b, false)
}

/// Token-set ratio: order-independent, ignores repeated tokens.
///
/// Tokens are split into the shared set and each side's leftovers. The score
/// is the best ratio among "shared" vs "shared + leftovers" on either side and
/// the two combined strings against each other, so a string whose tokens are
/// a subset of the other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> Score {
    token_set(a, b, false)
}

/// Weighted ratio picking between whole-string, partial and token scorers
/// depending on how different the string lengths are.
pub fn w_ratio(a: &str, b: &str) -> Score {
    let p1 = full_process(a);
    let p2 = full_process(b);
    if p1.is_empty() || p2.is_empty() {
        return 0;
    }

    const UNBASE_SCALE: f64 = 0.95;
    let base = f64::from(ratio(&p1, &p2));

    let (len1, len2) = (p1.chars().count() as f64, p2.chars().count() as f64);
    let len_ratio = len1.max(len2) / len1.min(len2);

    if len_ratio < 1.5 {
        let sort = f64::from(token_sort(&p1, &p2, false)) * UNBASE_SCALE;
        let set = f64::from(token_set(&p1, &p2, false)) * UNBASE_SCALE;
        return base.max(sort).max(set).round() as Score;
    }

    let partial_scale = if len_ratio > 8.0 { 0.6 } else { 0.9 };
    let partial = f64::from(partial_ratio(&p1, &p2)) * partial_scale;
    let sort = f64::from(token_sort(&p1, &p2, true)) * UNBASE_SCALE * partial_scale;
    let set = f64::from(token_set(&p1, &p2, true)) * UNBASE_SCALE * partial_scale;
    base.max(partial).max(sort).max(set).round() as Score
}

fn token_sort(a: &str, b: &str, partial: bool) -> Score {
    let sorted_a = sorted_tokens(&full_process(a));
    let sorted_b = sorted_tokens(&full_process(b));
    compare(&sorted_a, &sorted_b, partial)
}

fn token_set(a: &str, b: &str, partial: bool) -> Score {
    let p1 = full_process(a);
    let p2 = full_process(b);
    if p1.is_empty() || p2.is_empty() {
        return 0;
    }

    let tokens_a: BTreeSet<&str> = p1.split(' ').collect();
    let tokens_b: BTreeSet<&str> = p2.split(' ').collect();

    let shared = join(tokens_a.intersection(&tokens_b));
    let only_a = join(tokens_a.difference(&tokens_b));
    let only_b = join(tokens_b.difference(&tokens_a));

    let combined_a = format!("{} {}", shared, only_a).trim().to_string();
    let combined_b = format!("{} {}", shared, only_b).trim().to_string();

    [
        compare(&shared, &combined_a, partial),
        compare(&shared, &combined_b, partial),
        compare(&combined_a, &combined_b, partial),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

fn compare(a: &str, b: &str, partial: bool) -> Score {
    if partial {
        partial_ratio(a, b)
    } else {
        ratio(a, b)
    }
}

fn sorted_tokens(processed: &str) -> String {
    let mut tokens: Vec<&str> = processed.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join<'a>(tokens: impl Iterator<Item = &'a &'a str>) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn to_score(similarity: f64) -> Score {
    (similarity.clamp(0.0, 1.0) * 100.0).round() as Score
}
