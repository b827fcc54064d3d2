// ai
//! 📦 Common data structures — the building blocks of ddbx
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — 3:47 AM
//!
//! A table with forty million items. A bucket with nothing in it. An engineer with
//! a capacity budget and a deadline. Somewhere between them, these little structs
//! carry every record across the gap, one line of JSON at a time.
//!
//! 🧠 Knowledge graph:
//! - `Record`: one JSON object, one line in a file, one item in the table
//! - `Partition`: a worker's exclusive slice of the table, fixed at spawn time
//! - `ContinuationToken`: the opaque "more pages remain" cursor from a scan
//! - `ScanPage`: what one billed scan hands back — records, next token, cost
//! - `Location`: local path or `s3://bucket/prefix`, parsed once at startup
//!
//! 🦆 (the duck is a record too. it has one attribute: "quack".)

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;

/// 📄 A single record — a JSON object with string keys, exactly one per line on disk.
pub(crate) type Record = serde_json::Map<String, serde_json::Value>;

/// 🧭 Which way the data flows. Tables → files, or files → tables. Never sideways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Export,
    Import,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Export => write!(f, "export"),
            TransferDirection::Import => write!(f, "import"),
        }
    }
}

/// 🍕 One slice of the table: `index` out of `total`. Assigned once, never rebalanced.
///
/// The backend's parallel-scan contract guarantees that scanning every index in
/// `0..total` visits each record exactly once. We just have to not ask for the same
/// slice twice, which is why the worker id IS the partition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Partition {
    pub index: u32,
    pub total: u32,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

/// 🔖 The "you are here" sticker a paged scan hands back.
///
/// Workers never look inside. They hold it, hand it back on the next call, and stop
/// when the backend stops giving them one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ContinuationToken {
    /// 🗄️ DynamoDB's `LastEvaluatedKey`, passed back verbatim as `ExclusiveStartKey`
    LastEvaluatedKey(HashMap<String, AttributeValue>),
    /// 🧪 position inside a partition, used by the in-memory store
    Offset(usize),
}

/// 📃 One billed page of a partition scan.
#[derive(Debug, Clone)]
pub(crate) struct ScanPage {
    pub records: Vec<Record>,
    /// `None` = partition exhausted
    pub next_token: Option<ContinuationToken>,
    /// backend-reported read units for this page
    pub consumed_capacity: f64,
}

impl ScanPage {
    /// 💸 The page's cost as a whole number of units, rounded up.
    /// A 0.5 RCU page still costs something. Truncating it to zero would let a worker
    /// scan forever on the house.
    pub(crate) fn billed_units(&self) -> i64 {
        if self.consumed_capacity <= 0.0 {
            0
        } else {
            self.consumed_capacity.ceil() as i64
        }
    }
}

/// 📍 Where the files live: on this machine, or in a bucket somewhere in us-east-1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Location {
    Local(PathBuf),
    Remote {
        bucket: String,
        /// exactly as written after `bucket/`; may be a whole key
        prefix: Option<String>,
    },
}

impl Location {
    /// 🔍 `s3://bucket/some/prefix/` → Remote, everything else → Local.
    ///
    /// The prefix is kept verbatim. Listing by `exports/orders.json` must still find
    /// the object `exports/orders.json`, so no slash gets invented here.
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let Some(rest) = raw.strip_prefix("s3://") else {
            return Ok(Location::Local(PathBuf::from(raw)));
        };
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) if !prefix.is_empty() => (bucket, Some(prefix.to_string())),
            Some((bucket, _)) => (bucket, None),
            None => (rest, None),
        };
        if bucket.is_empty() {
            anyhow::bail!(
                "💀 '{raw}' looks like an S3 location but has no bucket. \
                 s3:// alone is a vibe, not a destination."
            );
        }
        Ok(Location::Remote {
            bucket: bucket.to_string(),
            prefix,
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote { bucket, prefix } => {
                write!(f, "s3://{}/{}", bucket, prefix.as_deref().unwrap_or(""))
            }
        }
    }
}

/// 📂 Treat a remote prefix as a folder: `daily` → `daily/`. Used where keys get built
/// as `{prefix}{name}`, so `s3://backups/daily` does not produce `dailyorders-...json`.
pub(crate) fn directory_prefix(prefix: Option<String>) -> Option<String> {
    prefix.map(|prefix| {
        if prefix.ends_with('/') {
            prefix
        } else {
            format!("{prefix}/")
        }
    })
}

/// 🔢 Turns a decimal string from the table into a JSON number.
///
/// Zero fractional part → integer (`"5.000"` → `5`, `"1.5E3"` → `1500`), digit for
/// digit, however many digits the table held. Anything else keeps its decimal text
/// when JSON can spell it, and becomes the nearest float when it can't.
pub(crate) fn number_from_decimal_str(raw: &str) -> Result<serde_json::Number> {
    let raw = raw.trim();
    if let Some(integer) = integral_digits(raw) {
        return integer
            .parse::<serde_json::Number>()
            .with_context(|| format!("💀 '{raw}' looked whole but '{integer}' would not parse"));
    }
    if let Ok(exact) = raw.parse::<serde_json::Number>() {
        return Ok(exact);
    }
    let float: f64 = raw
        .parse()
        .with_context(|| format!("💀 '{raw}' claims to be a number. It is not a number."))?;
    serde_json::Number::from_f64(float)
        .with_context(|| format!("💀 '{raw}' is not a finite number. JSON has standards."))
}

/// 🧮 `Some("-1500")` for `"-1.5e3"`, `None` when there is a non-zero fraction
/// or the text is not a plain decimal.
fn integral_digits(raw: &str) -> Option<String> {
    // -- table numbers top out around 1e126; anything wider is not ours to expand
    const MAX_INTEGER_DIGITS: usize = 130;

    let (negative, body) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (mantissa, exponent) = match body.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i64>().ok()?),
        None => (body, 0),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{whole}{fraction}");
    let point = (whole.len() as i64).saturating_add(exponent);
    let (integer, remainder) = if point <= 0 {
        (String::new(), digits.as_str())
    } else if point as usize >= digits.len() {
        if point as usize > MAX_INTEGER_DIGITS {
            return None;
        }
        let padding = point as usize - digits.len();
        (format!("{digits}{}", "0".repeat(padding)), "")
    } else {
        let (integer, remainder) = digits.split_at(point as usize);
        (integer.to_string(), remainder)
    };
    if remainder.bytes().any(|b| b != b'0') {
        return None;
    }

    let integer = integer.trim_start_matches('0');
    Some(match (integer.is_empty(), negative) {
        (true, _) => "0".to_string(),
        (false, true) => format!("-{integer}"),
        (false, false) => integer.to_string(),
    })
}

/// 💸 Write cost estimate: one unit per started KiB of payload, minimum one.
pub(crate) fn estimate_write_units(payload_bytes: usize) -> i64 {
    (payload_bytes.div_ceil(1024)).max(1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_s3_locations_split_into_bucket_and_prefix() -> Result<()> {
        assert_eq!(
            Location::parse("s3://my-bucket/exports/2026")?,
            Location::Remote {
                bucket: "my-bucket".into(),
                prefix: Some("exports/2026".into())
            }
        );
        assert_eq!(
            Location::parse("s3://my-bucket/exports/")?,
            Location::Remote {
                bucket: "my-bucket".into(),
                prefix: Some("exports/".into())
            }
        );
        assert_eq!(
            Location::parse("s3://my-bucket")?,
            Location::Remote {
                bucket: "my-bucket".into(),
                prefix: None
            }
        );
        assert_eq!(
            Location::parse("s3://my-bucket/")?,
            Location::Remote {
                bucket: "my-bucket".into(),
                prefix: None
            }
        );
        Ok(())
    }

    #[test]
    fn the_one_where_a_full_object_key_survives_parsing() -> Result<()> {
        assert_eq!(
            Location::parse("s3://dump/exports/orders.json")?,
            Location::Remote {
                bucket: "dump".into(),
                prefix: Some("exports/orders.json".into())
            }
        );
        Ok(())
    }

    #[test]
    fn the_one_where_export_prefixes_grow_a_trailing_slash() {
        assert_eq!(directory_prefix(Some("daily".into())), Some("daily/".into()));
        assert_eq!(directory_prefix(Some("daily/".into())), Some("daily/".into()));
        assert_eq!(directory_prefix(None), None);
    }

    #[test]
    fn the_one_where_a_plain_path_stays_on_the_ground() -> Result<()> {
        assert_eq!(
            Location::parse("/data/out")?,
            Location::Local(PathBuf::from("/data/out"))
        );
        assert!(Location::parse("s3://").is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_whole_decimals_become_integers() -> Result<()> {
        assert_eq!(number_from_decimal_str("42")?.as_i64(), Some(42));
        assert_eq!(number_from_decimal_str("5.000")?.as_i64(), Some(5));
        assert_eq!(number_from_decimal_str("-7.0")?.as_i64(), Some(-7));
        assert_eq!(number_from_decimal_str("18446744073709551615")?.as_u64(), Some(u64::MAX));
        let fractional = number_from_decimal_str("3.25")?;
        assert!(fractional.is_f64());
        assert_eq!(fractional.as_f64(), Some(3.25));
        assert!(number_from_decimal_str("not-a-number").is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_a_24_digit_key_keeps_every_digit() -> Result<()> {
        let big = number_from_decimal_str("123456789012345678901234")?;
        assert_eq!(big.to_string(), "123456789012345678901234");
        let negative_whole = number_from_decimal_str("-98765432109876543210987654321.000")?;
        assert_eq!(negative_whole.to_string(), "-98765432109876543210987654321");
        let line = serde_json::to_string(&serde_json::Value::Number(big))?;
        assert_eq!(line, "123456789012345678901234");
        Ok(())
    }

    #[test]
    fn the_one_where_exponents_and_zeros_are_tidied_up() -> Result<()> {
        assert_eq!(number_from_decimal_str("1.5E3")?.to_string(), "1500");
        assert_eq!(number_from_decimal_str("1e40")?.to_string(), format!("1{}", "0".repeat(40)));
        assert_eq!(number_from_decimal_str("-0.000")?.to_string(), "0");
        assert_eq!(number_from_decimal_str("0.1234567890123456789")?.to_string(), "0.1234567890123456789");
        Ok(())
    }

    #[test]
    fn the_one_where_write_cost_rounds_up_per_kibibyte() {
        assert_eq!(estimate_write_units(0), 1);
        assert_eq!(estimate_write_units(170), 1);
        assert_eq!(estimate_write_units(1024), 1);
        assert_eq!(estimate_write_units(1025), 2);
        assert_eq!(estimate_write_units(4096), 4);
    }

    #[test]
    fn the_one_where_half_a_unit_still_costs_a_unit() {
        let page = |consumed_capacity| ScanPage {
            records: vec![],
            next_token: None,
            consumed_capacity,
        };
        assert_eq!(page(0.0).billed_units(), 0);
        assert_eq!(page(0.5).billed_units(), 1);
        assert_eq!(page(128.0).billed_units(), 128);
    }
}
