//! Text helpers for scraping listing pages
//!
//! Listing pages are scraped with regexes rather than a DOM, so captured
//! fragments still carry markup and Japanese unit suffixes. These helpers
//! strip the markup and turn values such as `8.5万円`, `1ヶ月` or `25.11m²`
//! into numbers.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

/// Markers meaning "none" or "not allowed" on listing pages
const NEGATIVE_MARKERS: &[&str] = &["-", "なし", "無し", "×", "不可", "ー", "無", "NO", "No", "no"];

lazy_static! {
    static ref TAG_REGEX: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref MAN_REGEX: Regex = Regex::new(r"(\d+(?:\.\d+)?)万").unwrap();
    static ref NUMBER_REGEX: Regex = Regex::new(r"(\d+(?:\.\d+)?)").unwrap();
    static ref MONTHS_REGEX: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*[ヶヵケか]月").unwrap();
    static ref AREA_REGEX: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*(?:m²|㎡|m2|m)").unwrap();

    // "3階/10階建", "-/7階建", "2階"
    static ref FULL_FLOOR_REGEX: Regex = Regex::new(r"(\d+)階\s*/\s*(\d+)階建").unwrap();
    static ref FLOORS_ONLY_REGEX: Regex = Regex::new(r"[-/]+\s*(\d+)階建").unwrap();
    static ref FLOOR_ONLY_REGEX: Regex = Regex::new(r"(\d+)階").unwrap();
}

/// Compiles a configured pattern the way field rules expect it
///
/// Patterns span lines and ignore case, matching how page fragments are
/// written in site configuration.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .case_insensitive(true)
        .build()
}

/// Returns capture group 1 of the first match
pub fn find_capture<'a>(regex: &Regex, html: &'a str) -> Option<&'a str> {
    regex
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Removes tags and the common entities, then trims
pub fn clean_html(text: &str) -> String {
    let stripped = TAG_REGEX.replace_all(text, "");
    stripped
        .trim()
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

/// True when the text contains a "none" marker
pub fn is_negative(text: &str) -> bool {
    NEGATIVE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Parses an amount such as `8.5万円` or `85,000円`
///
/// Returns 0 for empty text, text with a negative marker, or text without
/// digits.
pub fn parse_amount(text: &str) -> i64 {
    let text = text.replace(',', "");
    if text.is_empty() || is_negative(&text) {
        return 0;
    }

    if let Some(man) = find_capture(&MAN_REGEX, &text).and_then(|v| v.parse::<f64>().ok()) {
        return (man * 10_000.0).round() as i64;
    }

    find_capture(&NUMBER_REGEX, &text)
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v as i64)
        .unwrap_or(0)
}

/// Parses a number of months such as `1ヶ月`
pub fn parse_months(text: &str) -> f64 {
    if text.is_empty() || is_negative(text) {
        return 0.0;
    }
    find_capture(&MONTHS_REGEX, text)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0)
}

/// Parses an area such as `25.11m²`
pub fn parse_area(text: &str) -> f64 {
    find_capture(&AREA_REGEX, text)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0)
}

/// Parses the first decimal number in the text
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.replace(',', "");
    find_capture(&NUMBER_REGEX, &text).and_then(|v| v.parse().ok())
}

/// Parses floor text such as `3階/10階建` into `(floor_no, floors)`
///
/// Missing parts default to floor 0 of a one-storey building.
pub fn parse_floors(text: &str) -> (i64, i64) {
    if let Some(caps) = FULL_FLOOR_REGEX.captures(text) {
        let floor_no = caps[1].parse().unwrap_or(0);
        let floors = caps[2].parse().unwrap_or(1);
        return (floor_no, floors);
    }
    if let Some(floors) = find_capture(&FLOORS_ONLY_REGEX, text).and_then(|v| v.parse().ok()) {
        return (0, floors);
    }
    if let Some(floor_no) = find_capture(&FLOOR_ONLY_REGEX, text).and_then(|v| v.parse().ok()) {
        return (floor_no, 1);
    }
    (0, 1)
}

/// File name of an image URL, used to spot the same picture under two URLs
pub fn file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
