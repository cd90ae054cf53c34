//! Feed bytes to flat raw records.
//!
//! XML formats are read with a streaming reader; only the direct children of a record element
//! become fields. Record attributes are stored under `@name`.

use crate::error::FeedError;
use crate::format::{FeedFormat, FieldMapping};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const YML_CATALOG: &str = "yml_catalog";
const YML_CATEGORY: &str = "category";
const GENERATION_KEYS: [&str; 3] = ["generation", "generated_at", "date"];
const CATEGORY_DEPTH_LIMIT: usize = 16;

/// One product as it appeared in the feed, keyed by source field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: HashMap<String, Vec<String>>,
    pub attributes: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.fields.entry(field.into()).or_default().push(value.to_string());
        }
    }

    /// First value of the first present field among `names`.
    pub fn first(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|name| self.fields.get(*name).and_then(|values| values.first()))
            .map(String::as_str)
    }

    /// Every value of every field among `names`, in order.
    pub fn all(&self, names: &[&str]) -> Vec<&str> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .flat_map(|values| values.iter().map(String::as_str))
            .collect()
    }

    pub fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|name| self.fields.contains_key(*name))
    }
}

#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub records: Vec<RawRecord>,
    /// Feed generation as unix seconds, when the feed carries one.
    pub generation: Option<u64>,
}

pub fn parse(format: FeedFormat, bytes: &[u8], max_records: usize) -> Result<ParsedFeed, FeedError> {
    let mapping = format.mapping();
    match format {
        FeedFormat::Yml | FeedFormat::Google => parse_xml(bytes, mapping, max_records),
        FeedFormat::Json => parse_json(bytes, mapping, max_records),
        FeedFormat::Jsonl => parse_jsonl(bytes, mapping, max_records),
    }
}

fn too_many(max_records: usize) -> FeedError {
    FeedError::Parse(format!("feed holds more than {max_records} records"))
}

/// Accepts unix seconds, RFC 3339, or YML's `YYYY-MM-DD HH:MM[:SS]` (taken as UTC).
pub fn parse_generation(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return u64::try_from(at.unix_timestamp()).ok();
    }
    let with_seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let without_seconds = format_description!("[year]-[month]-[day] [hour]:[minute]");
    PrimitiveDateTime::parse(raw, with_seconds)
        .or_else(|_| PrimitiveDateTime::parse(raw, without_seconds))
        .ok()
        .and_then(|at| u64::try_from(at.assume_utc().unix_timestamp()).ok())
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, FeedError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| FeedError::Parse(format!("bad attribute: {err}")))?;
        let value = attr.unescape_value().map_err(|err| FeedError::Parse(err.to_string()))?;
        out.push((String::from_utf8_lossy(attr.key.as_ref()).into_owned(), value.into_owned()));
    }
    Ok(out)
}

fn attribute(attrs: &[(String, String)], key: &str) -> Option<String> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

struct Category {
    name: String,
    parent: Option<String>,
}

/// `Parent / Child` path of a YML category id. Cycles and runaway chains are cut off.
fn category_path(id: &str, categories: &HashMap<String, Category>) -> Option<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(id.to_string());
    while let Some(cid) = current {
        if !seen.insert(cid.clone()) || names.len() >= CATEGORY_DEPTH_LIMIT {
            break;
        }
        let Some(category) = categories.get(&cid) else { break };
        names.push(category.name.trim().to_string());
        current = category.parent.clone();
    }
    if names.is_empty() {
        return None;
    }
    names.reverse();
    Some(names.join(" / "))
}

#[derive(Default)]
struct XmlCursor {
    record: Option<RawRecord>,
    /// Element depth below the open record element.
    depth: usize,
    field: Option<String>,
    param: Option<String>,
    category: Option<(String, Option<String>)>,
    text: String,
}

fn parse_xml(bytes: &[u8], mapping: &FieldMapping, max_records: usize) -> Result<ParsedFeed, FeedError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut feed = ParsedFeed::default();
    let mut categories: HashMap<String, Category> = HashMap::new();
    let mut cur = XmlCursor::default();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| FeedError::Parse(format!("xml at byte {}: {err}", reader.buffer_position())))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                let name = element_name(&e);
                if cur.record.is_some() {
                    cur.depth += 1;
                    if cur.depth == 1 {
                        cur.text.clear();
                        if mapping.attributes.contains(&name.as_str()) {
                            cur.param = attribute(&attributes(&e)?, "name");
                        }
                        cur.field = Some(name);
                    }
                } else if mapping.records.contains(&name.as_str()) {
                    if feed.records.len() >= max_records {
                        return Err(too_many(max_records));
                    }
                    let mut record = RawRecord::default();
                    for (key, value) in attributes(&e)? {
                        record.push(format!("@{key}"), value);
                    }
                    cur.record = Some(record);
                    cur.depth = 0;
                } else if name == YML_CATEGORY {
                    let attrs = attributes(&e)?;
                    if let Some(id) = attribute(&attrs, "id") {
                        cur.category = Some((id, attribute(&attrs, "parentId")));
                        cur.text.clear();
                    }
                } else if name == YML_CATALOG {
                    feed.generation = attribute(&attributes(&e)?, "date").and_then(|d| parse_generation(&d));
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                if cur.record.is_none() && mapping.records.contains(&name.as_str()) {
                    if feed.records.len() >= max_records {
                        return Err(too_many(max_records));
                    }
                    let mut record = RawRecord::default();
                    for (key, value) in attributes(&e)? {
                        record.push(format!("@{key}"), value);
                    }
                    feed.records.push(record);
                }
            }
            Event::Text(t) => {
                if (cur.record.is_some() && cur.depth == 1) || cur.category.is_some() {
                    let text = t.unescape().map_err(|err| FeedError::Parse(err.to_string()))?;
                    cur.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if (cur.record.is_some() && cur.depth == 1) || cur.category.is_some() {
                    cur.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(e) => {
                if cur.record.is_some() && cur.depth == 0 {
                    feed.records.extend(cur.record.take());
                } else if let Some(record) = cur.record.as_mut() {
                    if cur.depth == 1 {
                        let text = std::mem::take(&mut cur.text);
                        match (cur.param.take(), cur.field.take()) {
                            (Some(param), _) => {
                                let value = text.trim();
                                if !value.is_empty() {
                                    record.attributes.insert(param, value.to_string());
                                }
                            }
                            (None, Some(field)) => record.push(field, text),
                            (None, None) => {}
                        }
                    }
                    cur.depth -= 1;
                } else if e.name().as_ref() == YML_CATEGORY.as_bytes() {
                    if let Some((id, parent)) = cur.category.take() {
                        let name = std::mem::take(&mut cur.text);
                        categories.insert(id, Category { name, parent });
                    }
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if cur.record.is_some() {
        return Err(FeedError::Parse("unterminated record at end of feed".into()));
    }
    if !categories.is_empty() {
        for record in &mut feed.records {
            let path = record.first(&["categoryId"]).and_then(|id| category_path(id, &categories));
            if let Some(path) = path {
                record.push(YML_CATEGORY, path);
            }
        }
    }
    Ok(feed)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn record_from_json(value: Value, mapping: &FieldMapping) -> RawRecord {
    let mut record = RawRecord::default();
    let Value::Object(object) = value else { return record };
    for (key, value) in object {
        if mapping.attributes.contains(&key.as_str()) {
            match value {
                Value::Object(attrs) => {
                    for (name, v) in attrs {
                        if let Some(text) = scalar_text(&v) {
                            record.attributes.insert(name, text);
                        }
                    }
                }
                // [{"name": "Цвет", "value": "синий"}, ...]
                Value::Array(items) => {
                    for item in items {
                        let name = item.get("name").and_then(scalar_text);
                        let text = item.get("value").and_then(scalar_text);
                        if let (Some(name), Some(text)) = (name, text) {
                            record.attributes.insert(name, text);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in &items {
                    if let Some(text) = scalar_text(item) {
                        record.push(key.clone(), text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(&other) {
                    record.push(key, text);
                }
            }
        }
    }
    record
}

fn generation_of(object: &Map<String, Value>) -> Option<u64> {
    GENERATION_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => parse_generation(s),
            _ => None,
        })
}

fn parse_json(bytes: &[u8], mapping: &FieldMapping, max_records: usize) -> Result<ParsedFeed, FeedError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| FeedError::Parse(err.to_string()))?;
    let (items, generation) = match value {
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let generation = generation_of(&object);
            let items = mapping
                .records
                .iter()
                .find_map(|key| match object.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| FeedError::Parse(format!("no product array under any of {:?}", mapping.records)))?;
            (items, generation)
        }
        _ => return Err(FeedError::Parse("expected a JSON array or object".into())),
    };
    if items.len() > max_records {
        return Err(too_many(max_records));
    }
    let records = items.into_iter().map(|item| record_from_json(item, mapping)).collect();
    Ok(ParsedFeed { records, generation })
}

fn parse_jsonl(bytes: &[u8], mapping: &FieldMapping, max_records: usize) -> Result<ParsedFeed, FeedError> {
    let text = std::str::from_utf8(bytes).map_err(|err| FeedError::Parse(format!("jsonl is not utf-8: {err}")))?;
    let mut feed = ParsedFeed::default();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|err| FeedError::Parse(format!("line {}: {err}", line_no + 1)))?;
        // a header line without an id carries the generation
        if let Value::Object(object) = &value {
            if !mapping.id.iter().any(|key| object.contains_key(*key)) {
                if let Some(generation) = generation_of(object) {
                    feed.generation = Some(generation);
                    continue;
                }
            }
        }
        if feed.records.len() >= max_records {
            return Err(too_many(max_records));
        }
        feed.records.push(record_from_json(value, mapping));
    }
    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YML_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog date="2024-03-01 12:30">
  <shop>
    <name>Shop</name>
    <categories>
      <category id="1">Обувь</category>
      <category id="2" parentId="1">Кроссовки</category>
    </categories>
    <offers>
      <offer id="A" available="true">
        <name>Nike Air Max 90</name>
        <url>https://shop.example/a</url>
        <price>12990</price>
        <oldprice>15990</oldprice>
        <categoryId>2</categoryId>
        <picture>https://img.example/a1.jpg</picture>
        <picture>https://img.example/a2.jpg</picture>
        <vendor>Nike</vendor>
        <description><![CDATA[<p>Лёгкие <b>кроссовки</b></p>]]></description>
        <param name="Цвет">белый</param>
      </offer>
      <offer id="B" available="false">
        <typePrefix>Кроссовки</typePrefix>
        <vendor>Adidas</vendor>
        <model>Ultraboost</model>
        <price>17 990</price>
      </offer>
    </offers>
  </shop>
</yml_catalog>"#;

    #[test]
    fn yml_offers_categories_and_params() {
        let feed = parse(FeedFormat::Yml, YML_FEED.as_bytes(), 100).unwrap();
        assert_eq!(feed.records.len(), 2);
        let a = &feed.records[0];
        assert_eq!(a.first(&["@id"]), Some("A"));
        assert_eq!(a.first(&["category"]), Some("Обувь / Кроссовки"));
        assert_eq!(a.all(&["picture"]).len(), 2);
        assert_eq!(a.attributes.get("Цвет").map(String::as_str), Some("белый"));
        assert!(a.first(&["description"]).unwrap().contains("<b>"));
        let b = &feed.records[1];
        assert_eq!(b.first(&["@available"]), Some("false"));
        assert_eq!(b.first(&["model"]), Some("Ultraboost"));
        assert_eq!(feed.generation, Some(1_709_296_200));
    }

    #[test]
    fn google_items_keep_prefixed_names() {
        let xml = r#"<rss xmlns:g="http://base.google.com/ns/1.0"><channel>
            <item><g:id>G1</g:id><g:title>Nike Cap</g:title><g:link>https://s/g1</g:link>
            <g:price>1990.00 RUB</g:price><g:availability>in stock</g:availability>
            <g:shipping><g:country>RU</g:country></g:shipping></item>
        </channel></rss>"#;
        let feed = parse(FeedFormat::Google, xml.as_bytes(), 100).unwrap();
        assert_eq!(feed.records.len(), 1);
        let r = &feed.records[0];
        assert_eq!(r.first(&["g:title"]), Some("Nike Cap"));
        assert_eq!(r.first(&["g:price"]), Some("1990.00 RUB"));
        assert_eq!(r.first(&["g:country"]), None);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse(FeedFormat::Yml, b"<yml_catalog><offer id=\"A\"><name>x</offer>", 100).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn json_object_with_container_and_generation() {
        let json = r#"{"generation": 42, "products": [
            {"id": "A", "name": "Nike", "price": 100, "images": ["1.jpg", "2.jpg"],
             "attributes": {"size": 42}},
            {"id": 7, "name": "Adidas", "in_stock": false, "params": [{"name": "Цвет", "value": "чёрный"}]}
        ]}"#;
        let feed = parse(FeedFormat::Json, json.as_bytes(), 100).unwrap();
        assert_eq!(feed.generation, Some(42));
        assert_eq!(feed.records[0].all(&["images"]), vec!["1.jpg", "2.jpg"]);
        assert_eq!(feed.records[0].attributes["size"], "42");
        assert_eq!(feed.records[1].first(&["id"]), Some("7"));
        assert_eq!(feed.records[1].first(&["in_stock"]), Some("false"));
        assert_eq!(feed.records[1].attributes["Цвет"], "чёрный");
    }

    #[test]
    fn jsonl_header_line_and_bad_line() {
        let ok = "{\"generation\": \"2024-03-01T12:30:00Z\"}\n{\"id\":\"A\",\"price\":1}\n\n{\"id\":\"B\"}\n";
        let feed = parse(FeedFormat::Jsonl, ok.as_bytes(), 100).unwrap();
        assert_eq!(feed.records.len(), 2);
        assert_eq!(feed.generation, Some(1_709_296_200));

        let bad = "{\"id\":\"A\"}\nnot json\n";
        let err = parse(FeedFormat::Jsonl, bad.as_bytes(), 100).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn record_limit_fails_the_feed() {
        let json = r#"[{"id":"A"},{"id":"B"},{"id":"C"}]"#;
        assert!(matches!(parse(FeedFormat::Json, json.as_bytes(), 2), Err(FeedError::Parse(_))));
        assert!(matches!(parse(FeedFormat::Yml, YML_FEED.as_bytes(), 1), Err(FeedError::Parse(_))));
    }

    #[test]
    fn category_cycles_terminate() {
        let mut categories = HashMap::new();
        categories.insert("1".to_string(), Category { name: "a".into(), parent: Some("2".into()) });
        categories.insert("2".to_string(), Category { name: "b".into(), parent: Some("1".into()) });
        assert_eq!(category_path("1", &categories).as_deref(), Some("b / a"));
    }
}
