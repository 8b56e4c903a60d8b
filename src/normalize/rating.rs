//! Star ratings, review scores and review counts

use regex::Regex;
use std::sync::OnceLock;

static RE_NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
static RE_FRACTION: OnceLock<Option<Regex>> = OnceLock::new();
static RE_COUNT: OnceLock<Option<Regex>> = OnceLock::new();

const STAR_GLYPHS: &[char] = &['★', '⭐'];
const HALF_STAR_GLYPH: char = '½';

/// Canonical upper bound of both scales
pub const CANONICAL_SCALE: f64 = 5.0;

fn number_re() -> Option<&'static Regex> {
    RE_NUMBER
        .get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").ok())
        .as_ref()
}

fn fraction_re() -> Option<&'static Regex> {
    RE_FRACTION
        .get_or_init(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*(?:/|out of)\s*(\d+(?:[.,]\d+)?)").ok())
        .as_ref()
}

fn count_re() -> Option<&'static Regex> {
    RE_COUNT
        .get_or_init(|| Regex::new(r"\d[\d,.\x{a0}\x{202f} ]*").ok())
        .as_ref()
}

/// First decimal number in the text; a decimal comma is accepted
pub fn first_number(text: &str) -> Option<f64> {
    let m = number_re()?.find(text)?;
    m.as_str().replace(',', ".").parse::<f64>().ok()
}

fn parse_decimal(text: &str) -> Option<f64> {
    text.replace(',', ".").parse::<f64>().ok()
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse a star rating: a number ("4", "4.5", "3★", "3½ stars") or star
/// glyphs alone ("★★★★").
///
/// Glyphs are counted only when the literal has no digits. Anything outside
/// 0-5 is treated as absent.
pub fn parse_star_rating(raw: &str) -> Option<f32> {
    let half = if raw.contains(HALF_STAR_GLYPH) { 0.5 } else { 0.0 };
    let value = if raw.chars().any(|c| c.is_ascii_digit()) {
        let number = first_number(raw)?;
        if number.fract() == 0.0 {
            number + half
        } else {
            number
        }
    } else {
        let glyphs = raw.chars().filter(|c| STAR_GLYPHS.contains(c)).count();
        if glyphs == 0 {
            return None;
        }
        glyphs as f64 + half
    };

    if value.is_finite() && (0.0..=CANONICAL_SCALE).contains(&value) {
        Some(((value * 10.0).round() / 10.0) as f32)
    } else {
        None
    }
}

/// Smallest conventional scale that holds the score
fn infer_scale(score: f64) -> Option<f64> {
    [5.0, 10.0, 100.0].into_iter().find(|scale| score <= *scale)
}

/// Rescale a review score onto 0-5.
///
/// The scale comes from `scale_field` when given, then from an "x/y" literal
/// in the score itself, then from the smallest of 5, 10 or 100 that holds the
/// score. Result is rounded to two decimals; a missing or out-of-range score
/// is None.
pub fn rescale_review_score(score_field: &str, scale_field: Option<&str>) -> Option<f64> {
    let (score, literal_scale) = match fraction_re().and_then(|re| re.captures(score_field)) {
        Some(caps) => (
            parse_decimal(caps.get(1)?.as_str())?,
            parse_decimal(caps.get(2)?.as_str()),
        ),
        None => (first_number(score_field)?, None),
    };

    let scale = scale_field
        .and_then(first_number)
        .or(literal_scale)
        .or_else(|| infer_scale(score))?;

    if !score.is_finite() || !scale.is_finite() || scale <= 0.0 || score < 0.0 || score > scale {
        return None;
    }

    Some(round2(score * CANONICAL_SCALE / scale))
}

/// Parse a review count such as "1,234 reviews" or "2.301 avaliações"
pub fn parse_review_count(raw: &str) -> Option<u32> {
    let m = count_re()?.find(raw)?;
    let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().ok()
}
