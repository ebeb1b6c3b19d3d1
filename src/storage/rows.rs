// src/storage/rows.rs
//! Arrow layouts of the three curated tables.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray, UInt64Array, UInt8Array,
};
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::process::crime::CrimeRecord;
use crate::process::flatten::FlattenedRecord;
use crate::process::integrate::JoinedRecord;
use crate::storage::{column, TableRow};

fn strings<R>(rows: &[&R], f: impl Fn(&R) -> &str) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(rows.iter().map(|r| f(r))))
}

fn u64s<R>(rows: &[&R], f: impl Fn(&R) -> u64) -> ArrayRef {
    Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| f(r))))
}

fn i32s<R>(rows: &[&R], f: impl Fn(&R) -> i32) -> ArrayRef {
    Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| f(r))))
}

fn u8s<R>(rows: &[&R], f: impl Fn(&R) -> u8) -> ArrayRef {
    Arc::new(UInt8Array::from_iter_values(rows.iter().map(|r| f(r))))
}

impl TableRow for FlattenedRecord {
    const PARTITION_COLUMNS: &'static [&'static str] = &["year"];

    fn fields() -> Vec<Field> {
        vec![
            Field::new("zip", DataType::Utf8, false),
            Field::new("district", DataType::Utf8, false),
            Field::new("year", DataType::Int32, false),
            Field::new("men", DataType::UInt64, false),
            Field::new("women", DataType::UInt64, false),
            Field::new("total", DataType::UInt64, false),
        ]
    }

    fn partition_values(&self) -> Vec<String> {
        vec![self.year.to_string()]
    }

    fn to_arrays(rows: &[&Self]) -> Vec<ArrayRef> {
        vec![
            strings(rows, |r| r.zip.as_str()),
            strings(rows, |r| r.district.as_str()),
            i32s(rows, |r| r.year),
            u64s(rows, |r| r.men),
            u64s(rows, |r| r.women),
            u64s(rows, |r| r.total),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let zip = column::<StringArray>(batch, "zip")?;
        let district = column::<StringArray>(batch, "district")?;
        let year = column::<Int32Array>(batch, "year")?;
        let men = column::<UInt64Array>(batch, "men")?;
        let women = column::<UInt64Array>(batch, "women")?;
        let total = column::<UInt64Array>(batch, "total")?;

        Ok((0..batch.num_rows())
            .map(|i| FlattenedRecord {
                zip: zip.value(i).to_string(),
                district: district.value(i).to_string(),
                year: year.value(i),
                men: men.value(i),
                women: women.value(i),
                total: total.value(i),
            })
            .collect())
    }
}

impl TableRow for CrimeRecord {
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "quarter"];

    fn fields() -> Vec<Field> {
        vec![
            Field::new("zip", DataType::Utf8, false),
            Field::new("district", DataType::Utf8, false),
            Field::new("year", DataType::Int32, false),
            Field::new("quarter", DataType::UInt8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("count", DataType::UInt64, false),
        ]
    }

    fn partition_values(&self) -> Vec<String> {
        vec![self.year.to_string(), self.quarter.to_string()]
    }

    fn to_arrays(rows: &[&Self]) -> Vec<ArrayRef> {
        vec![
            strings(rows, |r| r.zip.as_str()),
            strings(rows, |r| r.district.as_str()),
            i32s(rows, |r| r.year),
            u8s(rows, |r| r.quarter),
            strings(rows, |r| r.category.as_str()),
            u64s(rows, |r| r.count),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let zip = column::<StringArray>(batch, "zip")?;
        let district = column::<StringArray>(batch, "district")?;
        let year = column::<Int32Array>(batch, "year")?;
        let quarter = column::<UInt8Array>(batch, "quarter")?;
        let category = column::<StringArray>(batch, "category")?;
        let count = column::<UInt64Array>(batch, "count")?;

        Ok((0..batch.num_rows())
            .map(|i| CrimeRecord {
                zip: zip.value(i).to_string(),
                district: district.value(i).to_string(),
                year: year.value(i),
                quarter: quarter.value(i),
                category: category.value(i).to_string(),
                count: count.value(i),
            })
            .collect())
    }
}

impl TableRow for JoinedRecord {
    const PARTITION_COLUMNS: &'static [&'static str] = &["year", "quarter"];

    fn fields() -> Vec<Field> {
        vec![
            Field::new("zip", DataType::Utf8, false),
            Field::new("district", DataType::Utf8, false),
            Field::new("year", DataType::Int32, false),
            Field::new("quarter", DataType::UInt8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("count", DataType::UInt64, false),
            Field::new("men", DataType::UInt64, false),
            Field::new("women", DataType::UInt64, false),
            Field::new("total", DataType::UInt64, false),
            Field::new("crime_incidence", DataType::Float64, true),
            Field::new("incidence_undefined", DataType::Boolean, false),
        ]
    }

    fn partition_values(&self) -> Vec<String> {
        vec![self.year.to_string(), self.quarter.to_string()]
    }

    fn to_arrays(rows: &[&Self]) -> Vec<ArrayRef> {
        let incidence: Float64Array = rows.iter().map(|r| r.crime_incidence).collect();
        let undefined: BooleanArray = rows.iter().map(|r| Some(r.incidence_undefined)).collect();
        vec![
            strings(rows, |r| r.zip.as_str()),
            strings(rows, |r| r.district.as_str()),
            i32s(rows, |r| r.year),
            u8s(rows, |r| r.quarter),
            strings(rows, |r| r.category.as_str()),
            u64s(rows, |r| r.count),
            u64s(rows, |r| r.men),
            u64s(rows, |r| r.women),
            u64s(rows, |r| r.total),
            Arc::new(incidence),
            Arc::new(undefined),
        ]
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let zip = column::<StringArray>(batch, "zip")?;
        let district = column::<StringArray>(batch, "district")?;
        let year = column::<Int32Array>(batch, "year")?;
        let quarter = column::<UInt8Array>(batch, "quarter")?;
        let category = column::<StringArray>(batch, "category")?;
        let count = column::<UInt64Array>(batch, "count")?;
        let men = column::<UInt64Array>(batch, "men")?;
        let women = column::<UInt64Array>(batch, "women")?;
        let total = column::<UInt64Array>(batch, "total")?;
        let incidence = column::<Float64Array>(batch, "crime_incidence")?;
        let undefined = column::<BooleanArray>(batch, "incidence_undefined")?;

        Ok((0..batch.num_rows())
            .map(|i| JoinedRecord {
                zip: zip.value(i).to_string(),
                district: district.value(i).to_string(),
                year: year.value(i),
                quarter: quarter.value(i),
                category: category.value(i).to_string(),
                count: count.value(i),
                men: men.value(i),
                women: women.value(i),
                total: total.value(i),
                crime_incidence: (!incidence.is_null(i)).then(|| incidence.value(i)),
                incidence_undefined: undefined.value(i),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Schema;

    fn batch_of<R: TableRow>(rows: &[R]) -> RecordBatch {
        let refs: Vec<&R> = rows.iter().collect();
        RecordBatch::try_new(Arc::new(Schema::new(R::fields())), R::to_arrays(&refs)).unwrap()
    }

    #[test]
    fn test_joined_record_keeps_null_incidence() {
        let rows = vec![
            JoinedRecord {
                zip: "08001".into(),
                district: "Ciutat Vella".into(),
                year: 2020,
                quarter: 1,
                category: "theft".into(),
                count: 501,
                men: 120_500,
                women: 130_200,
                total: 250_700,
                crime_incidence: Some(2.0),
                incidence_undefined: false,
            },
            JoinedRecord {
                zip: "08002".into(),
                district: "Eixample".into(),
                year: 2020,
                quarter: 1,
                category: "theft".into(),
                count: 3,
                men: 0,
                women: 0,
                total: 0,
                crime_incidence: None,
                incidence_undefined: true,
            },
        ];
        let batch = batch_of(&rows);
        assert_eq!(batch.column(9).null_count(), 1);
        assert_eq!(JoinedRecord::from_batch(&batch).unwrap(), rows);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let batch = batch_of(&[CrimeRecord {
            zip: "08001".into(),
            district: String::new(),
            year: 2020,
            quarter: 2,
            category: String::new(),
            count: 1,
        }]);
        let err = FlattenedRecord::from_batch(&batch).unwrap_err();
        assert!(err.to_string().contains("men"), "{}", err);
    }
}
