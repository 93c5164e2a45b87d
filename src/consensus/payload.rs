//! Payload canonicalization
//!
//! Turns a transaction payload into the exact byte string that gets hashed.
//! Field order is fixed at the top level and inside every line item, so two
//! payloads with the same content always serialize identically no matter how
//! they were constructed.

use serde::Serialize;
use serde_json::{Map, Serializer, Value};
use thiserror::Error;

use crate::consensus::difficulty::IdentifierPolicy;
use crate::consensus::number::{JsFormatter, MAX_SAFE_INTEGER};
use crate::crypto::sha256;

/// Name synonyms, in priority order
const NAME_KEYS: [&str; 5] = ["name", "productName", "title", "itemName", "description"];

/// Single-identifier synonyms, in priority order (after the `tokens` list)
const TOKEN_KEYS: [&str; 5] = ["token", "productToken", "sku", "productId", "id"];

/// Quantity synonyms, in priority order
const QUANTITY_KEYS: [&str; 3] = ["quantity", "qty", "amount"];

/// Price synonyms, in priority order
const PRICE_KEYS: [&str; 4] = ["price", "unitPrice", "cost", "value"];

/// Canonicalization errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("line item {position} carries no identifier")]
    MissingIdentifier { position: usize },
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A normalized line item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalItem {
    pub name: Value,
    /// Primary identifier
    pub token: Value,
    /// All candidate identifiers
    pub tokens: Vec<Value>,
    pub quantity: u64,
    pub price: f64,
}

/// A normalized transaction payload.
///
/// Serialization order is the declaration order below. Absent fields are
/// omitted; explicit `null` is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Value>,
    pub items: Vec<CanonicalItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<Value>,
}

impl Payload {
    /// Normalize a raw payload.
    ///
    /// A populated transaction reference (an object carrying `_id`) is
    /// flattened to its id, and its own `items` list, when present, replaces
    /// the top-level one.
    pub fn from_value(data: &Value, identifiers: IdentifierPolicy) -> Result<Self, PayloadError> {
        let empty = Map::new();
        let fields = data.as_object().unwrap_or(&empty);

        let mut transaction_id = fields.get("transactionId");
        let mut raw_items = fields.get("items");
        if let Some(reference) = transaction_id.and_then(Value::as_object) {
            if let Some(id) = reference.get("_id").filter(|id| is_truthy(id)) {
                if let Some(items) = reference.get("items").filter(|v| v.is_array()) {
                    raw_items = Some(items);
                }
                transaction_id = Some(id);
            }
        }
        let transaction_id = transaction_id.map(canonical_value);

        let items = match raw_items {
            Some(Value::Array(raw)) => raw
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    normalize_item(item, position, transaction_id.as_ref(), identifiers)
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let field = |key: &str| fields.get(key).map(canonical_value);

        Ok(Self {
            transaction_id,
            buyer: field("buyer"),
            vendor: field("vendor"),
            items,
            total: field("total"),
            timestamp: field("timestamp"),
            buyer_name: field("buyerName"),
            vendor_name: field("vendorName"),
        })
    }

    /// Compact JSON in canonical field order
    pub fn canonical_json(&self) -> Result<String, PayloadError> {
        to_canonical_string(self)
    }
}

/// Canonical JSON for a raw payload
pub fn canonicalize(data: &Value, identifiers: IdentifierPolicy) -> Result<String, PayloadError> {
    Payload::from_value(data, identifiers)?.canonical_json()
}

/// The string that gets hashed: `index || nonce || data || previousHash`
pub fn hash_input(index: u64, nonce: u64, canonical_data: &str, previous_hash: &str) -> String {
    format!("{index}{nonce}{canonical_data}{previous_hash}")
}

fn normalize_item(
    item: &Value,
    position: usize,
    transaction_id: Option<&Value>,
    identifiers: IdentifierPolicy,
) -> Result<CanonicalItem, PayloadError> {
    let empty = Map::new();
    let fields = item.as_object().unwrap_or(&empty);

    let name = first_truthy(fields, &NAME_KEYS)
        .map(canonical_value)
        .unwrap_or_else(|| Value::String(format!("Product {}", position + 1)));

    let (token, tokens) = match fields.get("tokens") {
        Some(Value::Array(list)) if !list.is_empty() => {
            let tokens: Vec<Value> = list.iter().map(canonical_value).collect();
            (tokens.first().cloned().unwrap_or(Value::Null), tokens)
        }
        _ => {
            let token = match first_truthy(fields, &TOKEN_KEYS) {
                Some(token) => canonical_value(token),
                None => fallback_token(item, position, transaction_id, identifiers)?,
            };
            (token.clone(), vec![token])
        }
    };

    let quantity = QUANTITY_KEYS
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(parse_int)
        .find(|n| *n > 0)
        .map(|n| n.unsigned_abs())
        .unwrap_or(1);

    let price = PRICE_KEYS
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(parse_float)
        .find(|p| p.is_finite() && *p > 0.0)
        .unwrap_or(0.0);

    Ok(CanonicalItem {
        name,
        token,
        tokens,
        quantity,
        price,
    })
}

/// Stable token for an item with no identifier, derived from its content,
/// its transaction and its position.
fn fallback_token(
    item: &Value,
    position: usize,
    transaction_id: Option<&Value>,
    identifiers: IdentifierPolicy,
) -> Result<Value, PayloadError> {
    if identifiers == IdentifierPolicy::Require {
        return Err(PayloadError::MissingIdentifier { position });
    }

    let mut seed = to_canonical_string(&canonical_value(item))?;
    if let Some(id) = transaction_id {
        seed.push_str(&to_canonical_string(id)?);
    }
    let digest = sha256(seed.as_bytes()).to_hex();
    Ok(Value::String(format!("TOKEN{}_{}", &digest[..16], position)))
}

fn first_truthy<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| is_truthy(value))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Compact JSON with numbers written in ECMAScript form
fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, PayloadError> {
    let mut out = Vec::with_capacity(128);
    value.serialize(&mut Serializer::with_formatter(&mut out, JsFormatter))?;
    // The serializer only ever emits UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Copy of `value` with object keys sorted
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonical_value(inner));
            }
            Value::Object(sorted)
        }
        other => other.clone(),
    }
}

fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < MAX_SAFE_INTEGER)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => int_prefix(s),
        _ => None,
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => float_prefix(s),
        _ => None,
    }
}

/// Leading integer of a string: `"12 pcs"` is 12, `"0x1f"` is 31, `"abc"` is nothing.
fn int_prefix(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, digits) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let magnitude = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Leading decimal number of a string: `"1.5kg"` is 1.5, `"5."` is 5.
fn float_prefix(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let digits_from = |mut at: usize| {
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
        }
        at
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut has_digits = int_end > end;
    end = int_end;

    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        if frac_end > end + 1 {
            has_digits = true;
            end = frac_end;
        }
    }
    if !has_digits {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    text[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "vendorName": "Acme",
            "items": [{"qty": "2", "sku": "SKU-1", "name": "Bolt", "unitPrice": "1.50"}],
            "transactionId": "tx-1",
            "buyer": "b-1",
            "vendor": "v-1",
            "total": 3,
            "timestamp": "2024-05-01T10:00:00.000Z",
            "buyerName": "Budi"
        })
    }

    #[test]
    fn test_fixed_field_order() {
        let canonical = canonicalize(&sample(), IdentifierPolicy::Derive).unwrap();
        assert_eq!(
            canonical,
            r#"{"transactionId":"tx-1","buyer":"b-1","vendor":"v-1","items":[{"name":"Bolt","token":"SKU-1","tokens":["SKU-1"],"quantity":2,"price":1.5}],"total":3,"timestamp":"2024-05-01T10:00:00.000Z","buyerName":"Budi","vendorName":"Acme"}"#
        );
    }

    #[test]
    fn test_absent_fields_are_omitted_and_null_is_kept() {
        let canonical = canonicalize(&json!({"buyer": null}), IdentifierPolicy::Derive).unwrap();
        assert_eq!(canonical, r#"{"buyer":null,"items":[]}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let a = canonicalize(&json!({"buyer": {"z": 1, "a": 2}}), IdentifierPolicy::Derive).unwrap();
        assert_eq!(a, r#"{"buyer":{"a":2,"z":1},"items":[]}"#);
    }

    #[test]
    fn test_integral_floats_render_as_integers() {
        let data: Value = serde_json::from_str(r#"{"total": 30.0, "items": [{"id": "x", "price": 12.0}]}"#).unwrap();
        let canonical = canonicalize(&data, IdentifierPolicy::Derive).unwrap();
        assert_eq!(
            canonical,
            r#"{"items":[{"name":"Product 1","token":"x","tokens":["x"],"quantity":1,"price":12}],"total":30}"#
        );
    }

    #[test]
    fn test_large_and_tiny_numbers_render_like_json_stringify() {
        let data: Value =
            serde_json::from_str(r#"{"total": 1e16, "items": [{"id": "a", "price": 0.000001}]}"#).unwrap();
        let canonical = canonicalize(&data, IdentifierPolicy::Derive).unwrap();
        assert_eq!(
            canonical,
            r#"{"items":[{"name":"Product 1","token":"a","tokens":["a"],"quantity":1,"price":0.000001}],"total":10000000000000000}"#
        );

        let data = json!({"total": 1e21, "buyer": {"rate": 1e-7}});
        let canonical = canonicalize(&data, IdentifierPolicy::Derive).unwrap();
        assert_eq!(canonical, r#"{"buyer":{"rate":1e-7},"items":[],"total":1e+21}"#);
    }

    #[test]
    fn test_token_priority() {
        let item = json!({"tokens": ["A", "B"], "token": "C", "sku": "D"});
        let normalized = normalize_item(&item, 0, None, IdentifierPolicy::Derive).unwrap();
        assert_eq!(normalized.token, json!("A"));
        assert_eq!(normalized.tokens, vec![json!("A"), json!("B")]);

        let item = json!({"tokens": [], "productToken": "", "sku": "D", "id": "E"});
        let normalized = normalize_item(&item, 0, None, IdentifierPolicy::Derive).unwrap();
        assert_eq!(normalized.token, json!("D"));
        assert_eq!(normalized.tokens, vec![json!("D")]);

        let item = json!({"productId": "P", "id": "E"});
        let normalized = normalize_item(&item, 0, None, IdentifierPolicy::Derive).unwrap();
        assert_eq!(normalized.token, json!("P"));
    }

    #[test]
    fn test_fallback_token_is_deterministic() {
        let item = json!({"name": "Nameless"});
        let tx = json!("tx-9");
        let first = normalize_item(&item, 2, Some(&tx), IdentifierPolicy::Derive).unwrap();
        let second = normalize_item(&item, 2, Some(&tx), IdentifierPolicy::Derive).unwrap();
        assert_eq!(first.token, second.token);

        let token = first.token.as_str().unwrap();
        assert!(token.starts_with("TOKEN"));
        assert!(token.ends_with("_2"));

        let elsewhere = normalize_item(&item, 3, Some(&tx), IdentifierPolicy::Derive).unwrap();
        assert_ne!(first.token, elsewhere.token);
    }

    #[test]
    fn test_missing_identifier_rejected_under_require() {
        let data = json!({"items": [{"sku": "ok"}, {"name": "no id"}]});
        let err = canonicalize(&data, IdentifierPolicy::Require).unwrap_err();
        assert!(matches!(err, PayloadError::MissingIdentifier { position: 1 }));
    }

    #[test]
    fn test_quantity_coercion() {
        let q = |item: Value| normalize_item(&item, 0, None, IdentifierPolicy::Derive).unwrap().quantity;
        assert_eq!(q(json!({"id": "a", "quantity": "5 boxes"})), 5);
        assert_eq!(q(json!({"id": "a", "quantity": 0, "qty": 4})), 4);
        assert_eq!(q(json!({"id": "a", "quantity": "n/a", "amount": 2.9})), 2);
        assert_eq!(q(json!({"id": "a", "quantity": -3})), 1);
        assert_eq!(q(json!({"id": "a"})), 1);
    }

    #[test]
    fn test_price_coercion() {
        let p = |item: Value| normalize_item(&item, 0, None, IdentifierPolicy::Derive).unwrap().price;
        assert_eq!(p(json!({"id": "a", "price": "19.99 IDR"})), 19.99);
        assert_eq!(p(json!({"id": "a", "price": 0, "cost": 7})), 7.0);
        assert_eq!(p(json!({"id": "a", "unitPrice": "free", "value": ".5"})), 0.5);
        assert_eq!(p(json!({"id": "a"})), 0.0);
    }

    #[test]
    fn test_name_fallbacks() {
        let n = |item: Value, pos| normalize_item(&item, pos, None, IdentifierPolicy::Derive).unwrap().name;
        assert_eq!(n(json!({"id": "a", "name": "", "title": "Widget"}), 0), json!("Widget"));
        assert_eq!(n(json!({"id": "a"}), 4), json!("Product 5"));
    }

    #[test]
    fn test_populated_transaction_reference_flattened() {
        let data = json!({
            "transactionId": {"_id": "tx-7", "items": [{"name": "Nut", "quantity": 3, "tokens": ["N-1"], "_id": "i1"}]},
            "items": [{"name": "ignored", "sku": "zzz"}]
        });
        let payload = Payload::from_value(&data, IdentifierPolicy::Derive).unwrap();
        assert_eq!(payload.transaction_id, Some(json!("tx-7")));
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].token, json!("N-1"));
        assert_eq!(payload.items[0].quantity, 3);
    }

    #[test]
    fn test_reference_without_id_is_kept_whole() {
        for id in [json!(null), json!("")] {
            let data = json!({
                "transactionId": {"_id": id, "items": [{"sku": "inner"}]},
                "items": [{"sku": "outer"}]
            });
            let payload = Payload::from_value(&data, IdentifierPolicy::Derive).unwrap();
            assert!(payload.transaction_id.as_ref().is_some_and(Value::is_object));
            assert_eq!(payload.items[0].token, json!("outer"));
        }
    }

    #[test]
    fn test_int_prefix() {
        assert_eq!(int_prefix("  42abc"), Some(42));
        assert_eq!(int_prefix("-7"), Some(-7));
        assert_eq!(int_prefix("0x1f"), Some(31));
        assert_eq!(int_prefix("abc"), None);
        assert_eq!(int_prefix(""), None);
    }

    #[test]
    fn test_float_prefix() {
        assert_eq!(float_prefix("1.5kg"), Some(1.5));
        assert_eq!(float_prefix("5."), Some(5.0));
        assert_eq!(float_prefix("2e3x"), Some(2000.0));
        assert_eq!(float_prefix("3e"), Some(3.0));
        assert_eq!(float_prefix("."), None);
        assert_eq!(float_prefix("-"), None);
    }

    #[test]
    fn test_hash_input_concatenation() {
        assert_eq!(hash_input(1, 23, "{}", "abc"), "123{}abc");
    }
}
