//! Price literal parsing and conversion
//!
//! A literal yields a structured price only when both an amount and a
//! currency are determined; otherwise the amount and code are null and the
//! literal is kept verbatim.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::rating::round2;
use crate::types::Price;

static RE_AMOUNT: OnceLock<Option<Regex>> = OnceLock::new();
static RE_LETTERS: OnceLock<Option<Regex>> = OnceLock::new();

/// ISO 4217 codes recognised in literals
const ISO_CODES: &[&str] = &[
    "AED", "ARS", "AUD", "BRL", "CAD", "CHF", "CLP", "CNY", "COP", "CZK", "DKK", "EGP", "EUR",
    "GBP", "HKD", "HUF", "IDR", "ILS", "INR", "ISK", "JPY", "KRW", "MAD", "MXN", "MYR", "NOK",
    "NZD", "PEN", "PHP", "PLN", "QAR", "RON", "RUB", "SAR", "SEK", "SGD", "THB", "TRY", "TWD",
    "UAH", "USD", "VND", "ZAR",
];

/// Currency symbols, multi-character prefixes before the bare ones they contain
const SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("AU$", "AUD"),
    ("CA$", "CAD"),
    ("HK$", "HKD"),
    ("NZ$", "NZD"),
    ("MX$", "MXN"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("S$", "SGD"),
    ("R$", "BRL"),
    ("zł", "PLN"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("₩", "KRW"),
    ("₺", "TRY"),
    ("₽", "RUB"),
    ("₪", "ILS"),
    ("฿", "THB"),
    ("₫", "VND"),
    ("$", "USD"),
];

/// Characters that may group thousands inside a number
const GROUP_SEPARATORS: &[char] = &[' ', '\'', '\u{a0}', '\u{202f}'];

fn amount_re() -> Option<&'static Regex> {
    RE_AMOUNT
        .get_or_init(|| Regex::new(r"\d+(?:[.,' \x{a0}\x{202f}]\d+)*").ok())
        .as_ref()
}

fn letters_re() -> Option<&'static Regex> {
    RE_LETTERS
        .get_or_init(|| Regex::new(r"[A-Za-z]+").ok())
        .as_ref()
}

/// Currency named in a literal and where it sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    code: &'static str,
    start: usize,
    end: usize,
}

fn iso_code(run: &str) -> Option<&'static str> {
    ISO_CODES.iter().find(|code| code.eq_ignore_ascii_case(run)).copied()
}

fn touches_digit(literal: &str, start: usize, end: usize) -> bool {
    let before = literal[..start].trim_end().chars().next_back();
    let after = literal[end..].trim_start().chars().next();
    matches!(before, Some(c) if c.is_ascii_digit()) || matches!(after, Some(c) if c.is_ascii_digit())
}

/// Uppercase ISO codes first, then symbols, then codes in any case that sit
/// next to a number ("eur 99", "99eur").
fn find_marker(literal: &str) -> Option<Marker> {
    let runs: Vec<_> = letters_re()
        .map(|re| re.find_iter(literal).filter(|m| m.as_str().len() == 3).collect())
        .unwrap_or_default();
    let marker = |m: &regex::Match<'_>| {
        iso_code(m.as_str()).map(|code| Marker {
            code,
            start: m.start(),
            end: m.end(),
        })
    };

    let upper = runs
        .iter()
        .filter(|m| m.as_str().bytes().all(|b| b.is_ascii_uppercase()))
        .find_map(marker);

    upper
        .or_else(|| {
            SYMBOLS.iter().find_map(|&(symbol, code)| {
                literal.find(symbol).map(|start| Marker {
                    code,
                    start,
                    end: start + symbol.len(),
                })
            })
        })
        .or_else(|| {
            runs.iter()
                .filter(|m| touches_digit(literal, m.start(), m.end()))
                .find_map(marker)
        })
}

/// ISO code named in the literal, else the code of its symbol
pub fn detect_currency(literal: &str) -> Option<&'static str> {
    find_marker(literal).map(|m| m.code)
}

/// Byte ranges of the separate numbers in a literal.
///
/// A space or apostrophe joins two digit runs only as a thousands group: one
/// to three digits before it and exactly three after. "1 234,50" is one
/// number, "120 1" is two.
fn numbers(literal: &str) -> Vec<(usize, usize)> {
    let Some(re) = amount_re() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    for m in re.find_iter(literal) {
        let run = m.as_str();
        let mut start = 0;
        for (idx, sep) in run.match_indices(GROUP_SEPARATORS) {
            let before = run[..idx].chars().rev().take_while(|c| c.is_ascii_digit()).count();
            let after = run[idx + sep.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .count();
            if !((1..=3).contains(&before) && after == 3) {
                ranges.push((m.start() + start, m.start() + idx));
                start = idx + sep.len();
            }
        }
        ranges.push((m.start() + start, m.end()));
    }
    ranges
}

/// Resolve thousands and decimal separators in a numeric token.
///
/// With both `,` and `.` present the later one is the decimal mark. A lone
/// comma followed by one or two digits is a decimal comma; a lone dot
/// followed by exactly three digits is a thousands separator.
pub fn parse_amount(token: &str) -> Option<f64> {
    let compact: String = token
        .chars()
        .filter(|c| !matches!(c, ' ' | '\'' | '\u{a0}' | '\u{202f}'))
        .collect();

    let last_comma = compact.rfind(',');
    let last_dot = compact.rfind('.');
    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();

    let digits_after = |idx: usize| compact.len() - idx - 1;

    let canonical = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(c), None) if commas == 1 && (1..=2).contains(&digits_after(c)) => compact.replace(',', "."),
        (Some(_), None) => compact.replace(',', ""),
        (None, Some(d)) if dots == 1 && digits_after(d) != 3 => compact,
        (None, Some(_)) => compact.replace('.', ""),
        (None, None) => compact,
    };

    canonical
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse a price literal.
///
/// `default_currency` applies when the literal names no currency (a site that
/// quotes every price in one currency).
pub fn parse_price(literal: &str, default_currency: Option<&str>) -> Price {
    let unparsed = || Price {
        amount: None,
        currency: None,
        original: literal.to_string(),
    };

    let marker = find_marker(literal);
    let currency = marker
        .map(|m| m.code.to_string())
        .or_else(|| default_currency.map(|c| c.trim().to_uppercase()))
        .filter(|c| !c.is_empty());
    let Some(currency) = currency else {
        return unparsed();
    };

    // The number nearest the currency is the price; "2 nights: €170" is 170
    let ranges = numbers(literal);
    let chosen = match marker {
        Some(m) => ranges.into_iter().min_by_key(|&(start, end)| {
            if end <= m.start {
                m.start - end
            } else {
                start.saturating_sub(m.end)
            }
        }),
        None => ranges.into_iter().next(),
    };
    let amount = chosen.and_then(|(start, end)| parse_amount(&literal[start..end]));
    let Some(amount) = amount else {
        return unparsed();
    };

    Price {
        amount: Some(amount),
        currency: Some(currency),
        original: literal.to_string(),
    }
}

/// Convert an amount into `target` using `rates` (units of target per unit of
/// the keyed currency). None when no rate is known.
pub fn convert(
    amount: f64,
    currency: &str,
    target: &str,
    rates: &BTreeMap<String, f64>,
) -> Option<f64> {
    if currency.eq_ignore_ascii_case(target) {
        return Some(round2(amount));
    }
    let rate = rates
        .get(currency)
        .or_else(|| rates.get(&currency.to_uppercase()))?;
    Some(round2(amount * rate))
}
