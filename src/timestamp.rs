use crate::error::BackupError;
use serde_json::{Map, Value};

/// One message as returned by the API. Only `ts` is interpreted.
pub type Record = Map<String, Value>;

pub const TIMESTAMP_KEY: &str = "ts";

/// Parse the ordering key of a record.
pub fn timestamp_of(record: &Record) -> Result<f64, BackupError> {
    let value = record.get(TIMESTAMP_KEY).ok_or_else(|| {
        BackupError::MalformedRecord(format!("missing `{TIMESTAMP_KEY}` field"))
    })?;

    let parsed = match value {
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };

    parsed.filter(|ts| ts.is_finite()).ok_or_else(|| {
        BackupError::MalformedRecord(format!("`{TIMESTAMP_KEY}` is not a number: {value}"))
    })
}

/// Largest timestamp in `records`, or `0.0` when there are none so an empty
/// conversation resumes from the beginning.
pub fn max_timestamp<'a, I>(records: I) -> Result<f64, BackupError>
where
    I: IntoIterator<Item = &'a Record>,
{
    let max = records.into_iter().try_fold(None, |max: Option<f64>, record| {
        let ts = timestamp_of(record)?;
        Ok::<_, BackupError>(Some(max.map_or(ts, |m| m.max(ts))))
    })?;
    Ok(max.unwrap_or(0.0))
}

/// Sort ascending by timestamp. Order among equal timestamps is unspecified.
pub fn sort_by_timestamp(records: Vec<Record>) -> Result<Vec<Record>, BackupError> {
    let mut keyed = records
        .into_iter()
        .map(|record| timestamp_of(&record).map(|ts| (ts, record)))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_unstable_by(|(a, _), (b, _)| a.total_cmp(b));
    Ok(keyed.into_iter().map(|(_, record)| record).collect())
}

#[cfg(test)]
pub(crate) fn record(ts: &str) -> Record {
    let mut record = Record::new();
    record.insert(TIMESTAMP_KEY.to_string(), Value::from(ts));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_and_number_timestamps() {
        assert_eq!(timestamp_of(&record("1512085950.000216")).unwrap(), 1512085950.000216);

        let mut numeric = Record::new();
        numeric.insert("ts".into(), json!(42.5));
        assert_eq!(timestamp_of(&numeric).unwrap(), 42.5);
    }

    #[test]
    fn rejects_missing_or_garbage_timestamps() {
        let mut no_ts = Record::new();
        no_ts.insert("text".into(), json!("hello"));
        assert!(matches!(timestamp_of(&no_ts), Err(BackupError::MalformedRecord(_))));

        assert!(matches!(
            timestamp_of(&record("yesterday")),
            Err(BackupError::MalformedRecord(_))
        ));
        assert!(matches!(
            timestamp_of(&record("NaN")),
            Err(BackupError::MalformedRecord(_))
        ));

        let mut wrong_type = Record::new();
        wrong_type.insert("ts".into(), json!(["1.0"]));
        assert!(matches!(timestamp_of(&wrong_type), Err(BackupError::MalformedRecord(_))));
    }

    #[test]
    fn max_of_empty_is_zero() {
        assert_eq!(max_timestamp(&Vec::<Record>::new()).unwrap(), 0.0);
    }

    #[test]
    fn max_matches_largest_element() {
        let records = vec![record("3.5"), record("10.25"), record("7.0")];
        assert_eq!(max_timestamp(&records).unwrap(), 10.25);
    }

    #[test]
    fn max_propagates_malformed_records() {
        let records = vec![record("1.0"), record("oops")];
        assert!(max_timestamp(&records).is_err());
    }

    #[test]
    fn sorts_ascending_and_keeps_payload() {
        let mut tagged = record("2.0");
        tagged.insert("text".into(), json!("second"));
        let sorted = sort_by_timestamp(vec![tagged, record("3.0"), record("1.0")]).unwrap();

        let order: Vec<f64> = sorted.iter().map(|r| timestamp_of(r).unwrap()).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
        assert_eq!(sorted[1]["text"], json!("second"));
    }
}
