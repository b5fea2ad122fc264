//! Configurable extraction hooks
//!
//! Every hook here is driven by site configuration: the regexes and constants
//! live in the TOML file, the hooks only know how to apply them. Compiled
//! rules are shared between pipelines through `Arc`, so building a fresh
//! pipeline per page stays cheap.

use crate::config::{FieldKind, ImageRuleConfig};
use crate::extract::pipeline::{HookError, PreHook, SyncHook};
use crate::extract::text::{
    clean_html, compile_pattern, file_name, find_capture, is_negative, parse_amount, parse_area,
    parse_floors, parse_months, parse_number,
};
use crate::record::ListingRecord;
use crate::reference::DistrictIndex;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Removes configured sections from the page before extraction
pub struct StripSections {
    patterns: Arc<Vec<Regex>>,
}

impl StripSections {
    pub fn new(patterns: Arc<Vec<Regex>>) -> Self {
        Self { patterns }
    }

    pub fn compile(patterns: &[String]) -> Result<Arc<Vec<Regex>>, HookError> {
        let compiled = patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(compiled))
    }
}

impl PreHook for StripSections {
    fn name(&self) -> &str {
        "strip-sections"
    }

    fn apply(&self, html: &str) -> Result<String, HookError> {
        let mut content = html.to_string();
        for pattern in self.patterns.iter() {
            content = pattern.replace_all(&content, "").into_owned();
        }
        Ok(content)
    }
}

/// A compiled field rule
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub regex: Regex,
    pub kind: FieldKind,
}

/// Extracts fields from capture group 1 of their rule
pub struct FieldRules {
    rules: Arc<Vec<FieldRule>>,
}

impl FieldRules {
    pub fn new(rules: Arc<Vec<FieldRule>>) -> Self {
        Self { rules }
    }

    fn apply_rule(rule: &FieldRule, record: &mut ListingRecord, raw: &str) {
        let text = clean_html(raw);
        match rule.kind {
            FieldKind::Text => record.set(&rule.name, text),
            FieldKind::Integer => record.set(&rule.name, parse_amount(&text)),
            FieldKind::Number => {
                if let Some(value) = parse_number(&text) {
                    record.set(&rule.name, value);
                }
            }
            FieldKind::Months => record.set(&rule.name, parse_months(&text)),
            FieldKind::Area => record.set(&rule.name, parse_area(&text)),
            FieldKind::Flag => record.set(&rule.name, if is_negative(&text) { "N" } else { "Y" }),
            FieldKind::Floor => {
                let (floor_no, floors) = parse_floors(&text);
                record.set("floor_no", floor_no);
                record.set("floors", floors);
            }
        }
    }
}

impl SyncHook for FieldRules {
    fn name(&self) -> &str {
        "field-rules"
    }

    fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError> {
        for rule in self.rules.iter() {
            match find_capture(&rule.regex, html) {
                Some(raw) => Self::apply_rule(rule, record, raw),
                None => debug!("Field {} not found", rule.name),
            }
        }
        Ok(())
    }
}

/// A compiled image rule
#[derive(Debug, Clone)]
pub struct ImageRule {
    pub category: String,
    pub regex: Regex,
    pub limit: Option<usize>,
}

impl ImageRule {
    pub fn compile(config: &ImageRuleConfig) -> Result<Self, HookError> {
        Ok(Self {
            category: config.category.clone(),
            regex: compile_pattern(&config.pattern)?,
            limit: config.limit,
        })
    }
}

/// Collects image URLs category by category into an `images` list
///
/// Rules run in configuration order; the same picture (by file name) is
/// only taken once, and collection stops at `max_images`.
pub struct ImageCollector {
    rules: Arc<Vec<ImageRule>>,
    max_images: usize,
}

impl ImageCollector {
    pub fn new(rules: Arc<Vec<ImageRule>>, max_images: usize) -> Self {
        Self { rules, max_images }
    }
}

impl SyncHook for ImageCollector {
    fn name(&self) -> &str {
        "images"
    }

    fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError> {
        let base = record.link().and_then(|link| Url::parse(link).ok());
        let mut seen = HashSet::new();
        let mut images = Vec::new();

        for rule in self.rules.iter() {
            let mut taken = 0;
            for caps in rule.regex.captures_iter(html) {
                if images.len() >= self.max_images || rule.limit.is_some_and(|l| taken >= l) {
                    break;
                }
                let Some(raw) = caps.get(1).map(|m| clean_html(m.as_str())) else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }

                let url = match &base {
                    Some(base) => base.join(&raw).map(String::from).unwrap_or(raw),
                    None => raw,
                };
                if !seen.insert(file_name(&url).to_string()) {
                    continue;
                }

                images.push(json!({ "url": url, "category": rule.category }));
                taken += 1;
            }
        }

        debug!("Collected {} images", images.len());
        record.set("images", images);
        Ok(())
    }
}

/// Sets `Y` flags for amenities mentioned in the amenities section
pub struct AmenityKeywords {
    section: Regex,
    keywords: Arc<BTreeMap<String, String>>,
}

impl AmenityKeywords {
    pub fn new(section: Regex, keywords: Arc<BTreeMap<String, String>>) -> Self {
        Self { section, keywords }
    }
}

impl SyncHook for AmenityKeywords {
    fn name(&self) -> &str {
        "amenities"
    }

    fn apply(&self, record: &mut ListingRecord, html: &str) -> Result<(), HookError> {
        let Some(section) = find_capture(&self.section, html) else {
            debug!("No amenities section");
            return Ok(());
        };
        let text = clean_html(section);

        for (keyword, field) in self.keywords.iter() {
            if text.contains(keyword.as_str()) {
                record.set(field, "Y");
            }
        }
        Ok(())
    }
}

/// Writes constant site fields onto the record
pub struct DefaultFields {
    fields: Arc<Map<String, Value>>,
}

impl DefaultFields {
    pub fn new(fields: Arc<Map<String, Value>>) -> Self {
        Self { fields }
    }

    /// Converts configured TOML values into record values
    pub fn convert(
        fields: &BTreeMap<String, toml::Value>,
    ) -> Result<Arc<Map<String, Value>>, HookError> {
        let mut converted = Map::new();
        for (key, value) in fields {
            let value = serde_json::to_value(value)
                .map_err(|e| HookError::msg(format!("default field {}: {}", key, e)))?;
            converted.insert(key.clone(), value);
        }
        Ok(Arc::new(converted))
    }
}

impl SyncHook for DefaultFields {
    fn name(&self) -> &str {
        "default-fields"
    }

    fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        for (key, value) in self.fields.iter() {
            record.set(key, value.clone());
        }
        Ok(())
    }
}

/// Normalizes `map_lat` / `map_lng` to numbers
pub struct Coordinates;

impl SyncHook for Coordinates {
    fn name(&self) -> &str {
        "coordinates"
    }

    fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        for key in ["map_lat", "map_lng"] {
            if !record.contains(key) {
                continue;
            }
            match record.get_f64(key) {
                Some(value) => record.set(key, value),
                None => {
                    record.remove(key);
                    return Err(HookError::msg(format!("{} is not a number", key)));
                }
            }
        }
        Ok(())
    }
}

/// Derives monthly totals and guarantor amounts
///
/// Runs only when both `monthly_rent` and `monthly_maintenance` are known
/// and their sum is positive.
pub struct Pricing;

impl SyncHook for Pricing {
    fn name(&self) -> &str {
        "pricing"
    }

    fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        let (Some(rent), Some(maintenance)) = (
            record.get_i64("monthly_rent"),
            record.get_i64("monthly_maintenance"),
        ) else {
            return Ok(());
        };

        let total = rent + maintenance;
        if total <= 0 {
            return Err(HookError::msg(format!("invalid monthly total {}", total)));
        }

        record.set("total_monthly", total);
        record.set("numeric_guarantor", total * 50 / 100);
        record.set("numeric_guarantor_max", total * 80 / 100);
        Ok(())
    }
}

/// Scales deposit and key money (in months) by the monthly total
pub struct DepositKey;

impl SyncHook for DepositKey {
    fn name(&self) -> &str {
        "deposit-key"
    }

    fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        if let Some(total) = record.get_f64("total_monthly") {
            for (months_key, amount_key) in [
                ("deposit_months", "numeric_deposit"),
                ("key_months", "numeric_key"),
            ] {
                if let Some(months) = record.get_f64(months_key) {
                    record.set(amount_key, (months * total).round() as i64);
                }
            }
        }
        record.remove("total_monthly");
        Ok(())
    }
}

/// Tags the record with the nearest district and its prefecture and city
pub struct DistrictLookup {
    index: Arc<DistrictIndex>,
}

impl DistrictLookup {
    pub fn new(index: Arc<DistrictIndex>) -> Self {
        Self { index }
    }
}

impl SyncHook for DistrictLookup {
    fn name(&self) -> &str {
        "district"
    }

    fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        let Some((lat, lng)) = record.coordinates() else {
            return Ok(());
        };

        let found = self
            .index
            .nearest(lat, lng)
            .ok_or_else(|| HookError::msg("no district near coordinates"))?;

        record.set("district", found.district);
        record.set("prefecture", found.prefecture);
        record.set("city", found.city);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::District;
    use std::collections::HashMap;

    fn record() -> ListingRecord {
        ListingRecord::new("https://rent.example.com/rooms/42")
    }

    fn field(name: &str, pattern: &str, kind: FieldKind) -> FieldRule {
        FieldRule {
            name: name.to_string(),
            regex: compile_pattern(pattern).unwrap(),
            kind,
        }
    }

    #[test]
    fn test_strip_sections() {
        let patterns =
            StripSections::compile(&[r#"<section class="related">.*?</section>"#.to_string()])
                .unwrap();
        let hook = StripSections::new(patterns);
        let cleaned = hook
            .apply("<p>keep</p><section class=\"related\">\n<p>drop</p></section>")
            .unwrap();
        assert_eq!(cleaned, "<p>keep</p>");
    }

    #[test]
    fn test_field_rules_convert_by_kind() {
        let html = r#"
            <dt>間取り</dt><dd><b>1LDK</b></dd>
            <dt>賃料</dt><dd>12.5万円</dd>
            <dt>管理費</dt><dd>なし</dd>
            <dt>敷金</dt><dd>1ヶ月</dd>
            <dt>面積</dt><dd>25.11m²</dd>
            <dt>ペット</dt><dd>不可</dd>
            <dt>階</dt><dd>3階/10階建</dd>
        "#;
        let rules = Arc::new(vec![
            field("room_type", r"間取り</dt>\s*<dd>(.*?)</dd>", FieldKind::Text),
            field("monthly_rent", r"賃料</dt>\s*<dd>(.*?)</dd>", FieldKind::Integer),
            field("monthly_maintenance", r"管理費</dt>\s*<dd>(.*?)</dd>", FieldKind::Integer),
            field("deposit_months", r"敷金</dt>\s*<dd>(.*?)</dd>", FieldKind::Months),
            field("size", r"面積</dt>\s*<dd>(.*?)</dd>", FieldKind::Area),
            field("pets", r"ペット</dt>\s*<dd>(.*?)</dd>", FieldKind::Flag),
            field("floor", r"階</dt>\s*<dd>(.*?)</dd>", FieldKind::Floor),
            field("missing", r"存在しない</dt>\s*<dd>(.*?)</dd>", FieldKind::Text),
        ]);

        let mut record = record();
        FieldRules::new(rules).apply(&mut record, html).unwrap();

        assert_eq!(record.get_str("room_type"), Some("1LDK"));
        assert_eq!(record.get_i64("monthly_rent"), Some(125_000));
        assert_eq!(record.get_i64("monthly_maintenance"), Some(0));
        assert_eq!(record.get_f64("deposit_months"), Some(1.0));
        assert_eq!(record.get_f64("size"), Some(25.11));
        assert_eq!(record.get_str("pets"), Some("N"));
        assert_eq!(record.get_i64("floor_no"), Some(3));
        assert_eq!(record.get_i64("floors"), Some(10));
        assert!(!record.contains("missing"));
    }

    #[test]
    fn test_image_collector_limits_and_dedup() {
        let html = r#"
            <img class="ext" src="/img/front.jpg">
            <img class="ext" src="/img/side.jpg">
            <img class="plan" src="/img/plan.jpg">
            <img class="in" src="/img/a.jpg">
            <img class="in" src="https://cdn.example.com/other/front.jpg">
            <img class="in" src="/img/b.jpg">
            <img class="in" src="/img/c.jpg">
        "#;
        let rule = |category: &str, class: &str, limit: Option<usize>| ImageRule {
            category: category.to_string(),
            regex: compile_pattern(&format!(r#"class="{}" src="([^"]+)""#, class)).unwrap(),
            limit,
        };
        let rules = Arc::new(vec![
            rule("exterior", "ext", Some(1)),
            rule("floorplan", "plan", Some(1)),
            rule("interior", "in", None),
        ]);

        let mut record = record();
        ImageCollector::new(rules, 4).apply(&mut record, html).unwrap();

        let images = record.get("images").unwrap().as_array().unwrap();
        let urls: Vec<&str> = images.iter().map(|i| i["url"].as_str().unwrap()).collect();
        assert_eq!(
            urls,
            vec![
                "https://rent.example.com/img/front.jpg",
                "https://rent.example.com/img/plan.jpg",
                "https://rent.example.com/img/a.jpg",
                "https://rent.example.com/img/b.jpg",
            ]
        );
        assert_eq!(images[1]["category"], "floorplan");
    }

    #[test]
    fn test_amenity_keywords() {
        let section = compile_pattern(r#"<ul class="equip">(.*?)</ul>"#).unwrap();
        let mut keywords = BTreeMap::new();
        keywords.insert("オートロック".to_string(), "autolock".to_string());
        keywords.insert("宅配ボックス".to_string(), "delivery_box".to_string());
        keywords.insert("エレベーター".to_string(), "elevator".to_string());

        let hook = AmenityKeywords::new(section, Arc::new(keywords));
        let mut record = record();
        hook.apply(
            &mut record,
            "<p>エレベーター</p><ul class=\"equip\"><li>オートロック</li><li>宅配ボックス</li></ul>",
        )
        .unwrap();

        assert_eq!(record.get_str("autolock"), Some("Y"));
        assert_eq!(record.get_str("delivery_box"), Some("Y"));
        assert!(!record.contains("elevator"));
    }

    #[test]
    fn test_default_fields_overwrite() {
        let mut config = BTreeMap::new();
        config.insert("credit_card".to_string(), toml::Value::String("Y".to_string()));
        config.insert("fire_insurance".to_string(), toml::Value::Integer(20000));
        let hook = DefaultFields::new(DefaultFields::convert(&config).unwrap());

        let mut record = record();
        record.set("credit_card", "N");
        hook.apply(&mut record, "").unwrap();

        assert_eq!(record.get_str("credit_card"), Some("Y"));
        assert_eq!(record.get_i64("fire_insurance"), Some(20000));
    }

    #[test]
    fn test_coordinates_normalized() {
        let mut record = record();
        record.set("map_lat", "35.6812");
        record.set("map_lng", 139.7671);
        Coordinates.apply(&mut record, "").unwrap();
        assert_eq!(record.get("map_lat"), Some(&json!(35.6812)));

        let mut record = self::record();
        record.set("map_lat", "unknown");
        assert!(Coordinates.apply(&mut record, "").is_err());
    }

    #[test]
    fn test_pricing_and_deposit_key() {
        let mut record = record();
        record.set("monthly_rent", 100_000);
        record.set("monthly_maintenance", 5_000);
        record.set("deposit_months", 1.0);
        record.set("key_months", 0.5);

        Pricing.apply(&mut record, "").unwrap();
        assert_eq!(record.get_i64("total_monthly"), Some(105_000));
        assert_eq!(record.get_i64("numeric_guarantor"), Some(52_500));
        assert_eq!(record.get_i64("numeric_guarantor_max"), Some(84_000));

        DepositKey.apply(&mut record, "").unwrap();
        assert_eq!(record.get_i64("numeric_deposit"), Some(105_000));
        assert_eq!(record.get_i64("numeric_key"), Some(52_500));
        assert!(!record.contains("total_monthly"));
    }

    #[test]
    fn test_pricing_skips_without_inputs() {
        let mut record = record();
        record.set("monthly_rent", 100_000);
        Pricing.apply(&mut record, "").unwrap();
        assert!(!record.contains("total_monthly"));

        record.set("monthly_rent", 0);
        record.set("monthly_maintenance", 0);
        assert!(Pricing.apply(&mut record, "").is_err());
    }

    #[test]
    fn test_district_lookup() {
        let mut prefectures = HashMap::new();
        prefectures.insert(13, "Tokyo".to_string());
        let index = DistrictIndex::new(
            prefectures,
            HashMap::new(),
            vec![District {
                name: "Marunouchi".to_string(),
                prefecture_id: Some(13),
                city_id: Some(13101),
                lat: 35.681,
                lng: 139.767,
            }],
        );
        let hook = DistrictLookup::new(Arc::new(index));

        let mut record = record();
        record.set("map_lat", 35.68);
        record.set("map_lng", 139.76);
        hook.apply(&mut record, "").unwrap();

        assert_eq!(record.get_str("district"), Some("Marunouchi"));
        assert_eq!(record.get_str("prefecture"), Some("Tokyo"));
        assert_eq!(record.get("city"), Some(&Value::Null));
    }
}
