//! Typed filter predicates over record fields
//!
//! Filters narrow the bank and book pools before candidate generation. They
//! form a closed set of predicate kinds evaluated by [`matches_all`]; a
//! predicate on a field the record does not have evaluates to `false`.

use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::LedgerRecord;

/// A value a record field can be compared against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    /// Compare two values of the same kind; mixed kinds are incomparable
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.partial_cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => Some(a.cmp(b)),
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            // Dates given as text in a filter still compare against date fields
            (FieldValue::Date(a), FieldValue::Text(b)) => {
                b.parse::<NaiveDate>().ok().map(|b| a.cmp(&b))
            }
            (FieldValue::Text(a), FieldValue::Date(b)) => {
                a.parse::<NaiveDate>().ok().map(|a| a.cmp(b))
            }
            _ => None,
        }
    }

    fn equals(&self, other: &FieldValue) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

/// A single filter predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPredicate {
    /// Field equals the value
    Equals { field: String, value: FieldValue },
    /// Field lies within the inclusive bounds; a missing bound is open
    Range {
        field: String,
        #[serde(default)]
        min: Option<FieldValue>,
        #[serde(default)]
        max: Option<FieldValue>,
    },
    /// Field equals one of the values
    InSet {
        field: String,
        values: Vec<FieldValue>,
    },
}

impl FilterPredicate {
    /// Evaluate the predicate against a record
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        match self {
            FilterPredicate::Equals { field, value } => {
                field_value(record, field).is_some_and(|v| v.equals(value))
            }
            FilterPredicate::Range { field, min, max } => {
                let Some(v) = field_value(record, field) else {
                    return false;
                };
                let above_min = min.as_ref().is_none_or(|m| {
                    matches!(v.compare(m), Some(Ordering::Greater | Ordering::Equal))
                });
                let below_max = max.as_ref().is_none_or(|m| {
                    matches!(v.compare(m), Some(Ordering::Less | Ordering::Equal))
                });
                above_min && below_max
            }
            FilterPredicate::InSet { field, values } => field_value(record, field)
                .is_some_and(|v| values.iter().any(|candidate| v.equals(candidate))),
        }
    }
}

/// Whether a record passes every predicate
pub fn matches_all(predicates: &[FilterPredicate], record: &LedgerRecord) -> bool {
    predicates.iter().all(|p| p.matches(record))
}

/// Look up a named field of a record.
///
/// Built-in fields are `id`, `date`, `amount`, `currency`, `description`,
/// `account` and `book_transaction_id`; any other name is looked up in the
/// record's attributes.
pub fn field_value(record: &LedgerRecord, field: &str) -> Option<FieldValue> {
    match field {
        "id" => Some(FieldValue::Text(record.id.clone())),
        "date" => Some(FieldValue::Date(record.date)),
        "amount" => record.amount.to_f64().map(FieldValue::Number),
        "currency" => record.currency.clone().map(FieldValue::Text),
        "description" => Some(FieldValue::Text(record.description.clone())),
        "account" => record.account.clone().map(FieldValue::Text),
        "book_transaction_id" => record.book_transaction_id.clone().map(FieldValue::Text),
        other => record.attributes.get(other).map(|raw| {
            raw.parse::<f64>()
                .map(FieldValue::Number)
                .unwrap_or_else(|_| FieldValue::Text(raw.clone()))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn record() -> LedgerRecord {
        LedgerRecord::bank(
            "b1",
            "acme",
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            BigDecimal::from(250),
            "Card settlement",
        )
        .with_currency("USD")
        .with_attribute("channel", "card")
        .with_attribute("batch", "42")
    }

    #[test]
    fn test_equals_predicate() {
        let r = record();
        let usd = FilterPredicate::Equals {
            field: "currency".into(),
            value: FieldValue::Text("USD".into()),
        };
        let eur = FilterPredicate::Equals {
            field: "currency".into(),
            value: FieldValue::Text("EUR".into()),
        };
        assert!(usd.matches(&r));
        assert!(!eur.matches(&r));
    }

    #[test]
    fn test_range_predicate_on_amount_and_date() {
        let r = record();
        let amount = FilterPredicate::Range {
            field: "amount".into(),
            min: Some(FieldValue::Number(100.0)),
            max: Some(FieldValue::Number(250.0)),
        };
        assert!(amount.matches(&r));

        let date = FilterPredicate::Range {
            field: "date".into(),
            min: Some(FieldValue::Text("2024-03-16".into())),
            max: None,
        };
        assert!(!date.matches(&r));
    }

    #[test]
    fn test_in_set_predicate_on_attribute() {
        let r = record();
        let channel = FilterPredicate::InSet {
            field: "channel".into(),
            values: vec![FieldValue::Text("ach".into()), FieldValue::Text("card".into())],
        };
        assert!(channel.matches(&r));

        let batch = FilterPredicate::Equals {
            field: "batch".into(),
            value: FieldValue::Number(42.0),
        };
        assert!(batch.matches(&r));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let r = record();
        let account = FilterPredicate::Equals {
            field: "account".into(),
            value: FieldValue::Text("1000".into()),
        };
        assert!(!account.matches(&r));
        assert!(!matches_all(&[account], &r));
        assert!(matches_all(&[], &r));
    }

    #[test]
    fn test_predicates_deserialize_from_json() {
        let predicates: Vec<FilterPredicate> = serde_json::from_str(
            r#"[
                { "kind": "equals", "field": "currency", "value": "USD" },
                { "kind": "range", "field": "amount", "min": 0 },
                { "kind": "in_set", "field": "channel", "values": ["card", "wire"] }
            ]"#,
        )
        .unwrap();
        assert_eq!(predicates.len(), 3);
        assert!(matches_all(&predicates, &record()));
    }
}
