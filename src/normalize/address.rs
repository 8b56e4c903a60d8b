//! Location literal cleanup

/// Property-type prefixes listing pages put in front of the location
const PROPERTY_PREFIXES: &[&str] = &[
    "Hotel in",
    "Resort in",
    "Guest House in",
    "Bed & Breakfast in",
    "Country House in",
    "Hostel in",
    "Apartment in",
    "Aparthotel in",
    "Villa in",
];

const MAP_LINK_TEXT: &str = "Show on Map";

/// Address split into its parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    /// Cleaned single-line address
    pub address: Option<String>,
    /// First line, usually the city
    pub region: Option<String>,
    /// Second line, when present
    pub country: Option<String>,
}

/// Clean a scraped location such as `"Hotel in Lisbon,\nPortugal Show on Map"`.
///
/// Returns all-None parts when nothing is left after cleanup.
pub fn clean_address(raw: &str) -> AddressParts {
    let mut text = raw.trim();

    if let Some(rest) = PROPERTY_PREFIXES
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
    {
        text = rest.trim_start();
    }

    if let Some(idx) = text.find(MAP_LINK_TEXT) {
        text = &text[..idx];
    }

    let lines: Vec<String> = text
        .lines()
        .map(collapse_whitespace)
        .map(|line| line.trim_end_matches(',').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return AddressParts::default();
    }

    AddressParts {
        address: Some(lines.join(", ")),
        region: lines.first().cloned(),
        country: lines.get(1).cloned(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
