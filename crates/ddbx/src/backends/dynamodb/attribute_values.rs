//! 🔁 JSON ⇄ DynamoDB attribute values.
//!
//! The table speaks `AttributeValue`, the files speak JSON. This is the phrasebook.
//!
//! | JSON    | DynamoDB          |
//! |---------|-------------------|
//! | string  | `S`               |
//! | number  | `N` (decimal str) |
//! | bool    | `BOOL`            |
//! | null    | `NULL`            |
//! | array   | `L` (`SS`/`NS` come back as arrays too) |
//! | object  | `M`               |
//!
//! Binary attributes have no JSON spelling here and are refused.

use std::collections::HashMap;

use anyhow::{Context, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;

use crate::common::{Record, number_from_decimal_str};

/// 📤 A table item → one JSON record.
pub(crate) fn item_to_record(item: HashMap<String, AttributeValue>) -> Result<Record> {
    item.into_iter()
        .map(|(name, attribute)| {
            let value = attribute_to_value(attribute)
                .with_context(|| format!("💀 attribute '{name}' has no JSON spelling"))?;
            Ok((name, value))
        })
        .collect()
}

/// 📥 One JSON record → a table item.
pub(crate) fn record_to_item(record: &Record) -> Result<HashMap<String, AttributeValue>> {
    record
        .iter()
        .map(|(name, value)| Ok((name.clone(), value_to_attribute(value)?)))
        .collect()
}

fn attribute_to_value(attribute: AttributeValue) -> Result<Value> {
    Ok(match attribute {
        AttributeValue::S(text) => Value::String(text),
        AttributeValue::N(number) => Value::Number(number_from_decimal_str(&number)?),
        AttributeValue::Bool(flag) => Value::Bool(flag),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(
            items
                .into_iter()
                .map(attribute_to_value)
                .collect::<Result<_>>()?,
        ),
        AttributeValue::M(map) => Value::Object(item_to_record(map)?),
        AttributeValue::Ss(strings) => Value::Array(strings.into_iter().map(Value::String).collect()),
        AttributeValue::Ns(numbers) => Value::Array(
            numbers
                .iter()
                .map(|n| number_from_decimal_str(n).map(Value::Number))
                .collect::<Result<_>>()?,
        ),
        AttributeValue::B(_) | AttributeValue::Bs(_) => {
            anyhow::bail!("binary attributes cannot be written as JSON")
        }
        other => anyhow::bail!("unsupported attribute type: {other:?}"),
    })
}

fn value_to_attribute(value: &Value) -> Result<AttributeValue> {
    Ok(match value {
        Value::String(text) => AttributeValue::S(text.clone()),
        Value::Number(number) => AttributeValue::N(number.to_string()),
        Value::Bool(flag) => AttributeValue::Bool(*flag),
        Value::Null => AttributeValue::Null(true),
        Value::Array(items) => {
            AttributeValue::L(items.iter().map(value_to_attribute).collect::<Result<_>>()?)
        }
        Value::Object(map) => AttributeValue::M(record_to_item(map)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::primitives::Blob;
    use serde_json::json;

    #[test]
    fn the_one_where_an_item_learns_to_speak_json() -> Result<()> {
        let item = HashMap::from([
            ("pk".to_string(), AttributeValue::S("user#1".into())),
            ("age".to_string(), AttributeValue::N("42.0".into())),
            ("score".to_string(), AttributeValue::N("9.75".into())),
            ("active".to_string(), AttributeValue::Bool(true)),
            ("nothing".to_string(), AttributeValue::Null(true)),
            ("tags".to_string(), AttributeValue::Ss(vec!["a".into(), "b".into()])),
            (
                "nested".to_string(),
                AttributeValue::M(HashMap::from([(
                    "list".to_string(),
                    AttributeValue::L(vec![AttributeValue::N("1".into())]),
                )])),
            ),
        ]);
        let record = item_to_record(item)?;
        assert_eq!(
            Value::Object(record),
            json!({
                "pk": "user#1",
                "age": 42,
                "score": 9.75,
                "active": true,
                "nothing": null,
                "tags": ["a", "b"],
                "nested": {"list": [1]}
            })
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_json_line_becomes_an_item() -> Result<()> {
        let record: Record = serde_json::from_str(
            r#"{"pk":"order#9","qty":3,"price":1.5,"gift":false,"notes":null,"lines":[{"sku":"x"}]}"#,
        )?;
        let item = record_to_item(&record)?;
        assert_eq!(item["pk"], AttributeValue::S("order#9".into()));
        assert_eq!(item["qty"], AttributeValue::N("3".into()));
        assert_eq!(item["price"], AttributeValue::N("1.5".into()));
        assert_eq!(item["gift"], AttributeValue::Bool(false));
        assert_eq!(item["notes"], AttributeValue::Null(true));
        assert_eq!(
            item["lines"],
            AttributeValue::L(vec![AttributeValue::M(HashMap::from([(
                "sku".to_string(),
                AttributeValue::S("x".into())
            )]))])
        );
        Ok(())
    }

    #[test]
    fn the_one_where_binary_gets_turned_away() {
        let item = HashMap::from([(
            "blob".to_string(),
            AttributeValue::B(Blob::new(vec![0xde, 0xad])),
        )]);
        let err = item_to_record(item).expect_err("binary should be refused");
        assert!(format!("{err:#}").contains("blob"));
    }
}
