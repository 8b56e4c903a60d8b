//! Amenity taxonomy
//!
//! Free-text amenity phrases are mapped onto a fixed vocabulary: exact alias
//! lookup, then alias containment, then edit-distance similarity. Phrases that
//! match nothing (or are negated, "no parking") are returned as unmapped.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Minimum normalized similarity for a fuzzy match
const FUZZY_THRESHOLD: f64 = 0.8;

/// Aliases shorter than this never match by containment
const MIN_CONTAINED_ALIAS_LEN: usize = 3;

/// Aliases shorter than this never match by similarity
const MIN_FUZZY_ALIAS_LEN: usize = 4;

/// Controlled amenity vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amenity {
    Wifi,
    Parking,
    Pool,
    Spa,
    Gym,
    Restaurant,
    Bar,
    Breakfast,
    AirConditioning,
    AirportShuttle,
    PetFriendly,
    FamilyRooms,
    NonSmoking,
    RoomService,
    TennisCourt,
    BeachAccess,
    Kitchen,
    Laundry,
    Accessible,
    EvCharging,
}

impl Amenity {
    pub const ALL: [Amenity; 20] = [
        Self::Wifi,
        Self::Parking,
        Self::Pool,
        Self::Spa,
        Self::Gym,
        Self::Restaurant,
        Self::Bar,
        Self::Breakfast,
        Self::AirConditioning,
        Self::AirportShuttle,
        Self::PetFriendly,
        Self::FamilyRooms,
        Self::NonSmoking,
        Self::RoomService,
        Self::TennisCourt,
        Self::BeachAccess,
        Self::Kitchen,
        Self::Laundry,
        Self::Accessible,
        Self::EvCharging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Parking => "parking",
            Self::Pool => "pool",
            Self::Spa => "spa",
            Self::Gym => "gym",
            Self::Restaurant => "restaurant",
            Self::Bar => "bar",
            Self::Breakfast => "breakfast",
            Self::AirConditioning => "air_conditioning",
            Self::AirportShuttle => "airport_shuttle",
            Self::PetFriendly => "pet_friendly",
            Self::FamilyRooms => "family_rooms",
            Self::NonSmoking => "non_smoking",
            Self::RoomService => "room_service",
            Self::TennisCourt => "tennis_court",
            Self::BeachAccess => "beach_access",
            Self::Kitchen => "kitchen",
            Self::Laundry => "laundry",
            Self::Accessible => "accessible",
            Self::EvCharging => "ev_charging",
        }
    }

    /// Phrases (already normalized) that name this amenity
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Wifi => &["wifi", "wi fi", "free wifi", "wireless internet", "internet", "internet access", "wlan"],
            Self::Parking => &["parking", "free parking", "car park", "valet parking", "private parking", "garage"],
            Self::Pool => &["pool", "swimming pool", "outdoor pool", "indoor pool", "outdoor swimming pool", "indoor swimming pool"],
            Self::Spa => &["spa", "wellness", "wellness centre", "sauna", "hot tub", "jacuzzi", "massage"],
            Self::Gym => &["gym", "fitness", "fitness centre", "fitness center", "fitness room"],
            Self::Restaurant => &["restaurant", "on site restaurant", "dining"],
            Self::Bar => &["bar", "lounge bar", "snack bar", "pool bar"],
            Self::Breakfast => &["breakfast", "breakfast included", "free breakfast", "continental breakfast", "buffet breakfast"],
            Self::AirConditioning => &["air conditioning", "air conditioned", "aircon", "ac"],
            Self::AirportShuttle => &["airport shuttle", "airport transfer", "shuttle", "shuttle service"],
            Self::PetFriendly => &["pet friendly", "pets allowed", "pets", "dogs allowed"],
            Self::FamilyRooms => &["family rooms", "family room"],
            Self::NonSmoking => &["non smoking", "non smoking rooms", "no smoking", "smoke free"],
            Self::RoomService => &["room service"],
            Self::TennisCourt => &["tennis court", "tennis courts", "tennis"],
            Self::BeachAccess => &["beach access", "beachfront", "private beach", "beach"],
            Self::Kitchen => &["kitchen", "kitchenette"],
            Self::Laundry => &["laundry", "laundry service", "dry cleaning"],
            Self::Accessible => &["accessible", "wheelchair accessible", "disabled access", "facilities for disabled guests"],
            Self::EvCharging => &["ev charging", "ev charger", "electric vehicle charging", "electric vehicle charging station"],
        }
    }
}

impl fmt::Display for Amenity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase, punctuation to spaces, whitespace collapsed
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_negated(normalized: &str) -> bool {
    normalized.starts_with("no ")
        || normalized.starts_with("not ")
        || normalized.contains("not available")
        || normalized.contains("unavailable")
}

/// Edit distance over chars
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Mapped tags plus the phrases that matched nothing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmenityMatch {
    /// Sorted, deduplicated
    pub amenities: Vec<Amenity>,
    /// In input order, deduplicated
    pub unmapped: Vec<String>,
}

/// Alias lookup table, read-only after construction
#[derive(Debug, Clone)]
pub struct AmenityMapper {
    exact: HashMap<&'static str, Amenity>,
    /// Longest alias first so containment prefers the most specific phrase
    by_length: Vec<(&'static str, Amenity)>,
}

impl Default for AmenityMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl AmenityMapper {
    pub fn new() -> Self {
        let mut exact = HashMap::new();
        let mut by_length = Vec::new();
        for amenity in Amenity::ALL {
            for alias in amenity.aliases() {
                exact.insert(*alias, amenity);
                by_length.push((*alias, amenity));
            }
        }
        by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        Self { exact, by_length }
    }

    /// Map one phrase, or None if it matches nothing
    pub fn map_phrase(&self, phrase: &str) -> Option<Amenity> {
        let normalized = normalize_phrase(phrase);
        if normalized.is_empty() {
            return None;
        }

        if let Some(amenity) = self.exact.get(normalized.as_str()) {
            return Some(*amenity);
        }

        if is_negated(&normalized) {
            return None;
        }

        let padded = format!(" {} ", normalized);
        let contained = self
            .by_length
            .iter()
            .filter(|(alias, _)| alias.len() >= MIN_CONTAINED_ALIAS_LEN)
            .find(|(alias, _)| padded.contains(&format!(" {} ", alias)));
        if let Some((_, amenity)) = contained {
            return Some(*amenity);
        }

        self.by_length
            .iter()
            .filter(|(alias, _)| alias.len() >= MIN_FUZZY_ALIAS_LEN)
            .map(|(alias, amenity)| (similarity(&normalized, alias), *amenity))
            .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, amenity)| amenity)
    }

    /// Map every phrase
    pub fn map_all<'a>(&self, phrases: impl IntoIterator<Item = &'a str>) -> AmenityMatch {
        let mut amenities = BTreeSet::new();
        let mut unmapped = Vec::new();
        let mut seen_unmapped = HashSet::new();

        for phrase in phrases {
            let cleaned = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
            if cleaned.is_empty() {
                continue;
            }
            match self.map_phrase(&cleaned) {
                Some(amenity) => {
                    amenities.insert(amenity);
                }
                None => {
                    if seen_unmapped.insert(cleaned.to_lowercase()) {
                        unmapped.push(cleaned);
                    }
                }
            }
        }

        AmenityMatch {
            amenities: amenities.into_iter().collect(),
            unmapped,
        }
    }
}
