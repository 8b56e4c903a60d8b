//! Normalizer and site extractor configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalizer rule inputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Currency that room rates are converted into, when rates are supplied
    pub target_currency: Option<String>,
    /// Units of `target_currency` per one unit of the keyed currency
    pub exchange_rates: BTreeMap<String, f64>,
    /// Currency a site quotes in when its literals carry no symbol or code
    pub site_currencies: BTreeMap<String, String>,
}

/// How a raw field is read from the DOM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    /// Text content of the first match
    Css(String),
    Detailed {
        selector: String,
        /// Read this attribute instead of text
        #[serde(default)]
        attr: Option<String>,
        /// Collect every match, newline-separated
        #[serde(default)]
        multiple: bool,
        /// Emit the number of matches instead of their content
        #[serde(default)]
        count: bool,
    },
}

/// Selector table for one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Raw field name -> how to read it on detail pages
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
    /// Links to detail pages on listing pages
    #[serde(default)]
    pub detail_link: Option<String>,
    /// Links to further listing pages
    #[serde(default)]
    pub pagination_link: Option<String>,
    /// Fields whose absence makes extraction fail
    #[serde(default = "default_required_fields")]
    pub required: Vec<String>,
}

fn default_required_fields() -> Vec<String> {
    vec!["name".to_string()]
}
