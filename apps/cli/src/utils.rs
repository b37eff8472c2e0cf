//! 输出格式

use serde::Serialize;
use std::fmt::Write;
use touchdetect_sdk::TaxelArray;
use touchdetect_sdk::driver::EventRecord;

/// 一行 JSON Lines 记录
#[derive(Debug, Serialize)]
pub struct SampleRecord {
    pub device: String,
    pub timestamp_ms: u64,
    pub taxels: Vec<Vec<u16>>,
    /// 夹爪右侧
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Vec<Vec<u16>>>,
}

impl SampleRecord {
    pub fn new(record: &EventRecord, taxels: &TaxelArray, right: Option<&TaxelArray>) -> Self {
        Self {
            device: record.device.to_string(),
            timestamp_ms: record.timestamp_ms,
            taxels: taxels.to_nested(),
            right: right.map(TaxelArray::to_nested),
        }
    }
}

/// 网格文本（每行右对齐到 5 个字符）
pub fn format_grid(taxels: &TaxelArray) -> String {
    let mut out = String::new();
    for (i, row) in taxels.rows().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for value in row {
            let _ = write!(out, "{value:>5}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use touchdetect_sdk::{DeviceEvent, DeviceId, Shape};

    fn sample_grid() -> TaxelArray {
        TaxelArray::from_rows(&[[1u16, 22, 333], [4444, 5, 60]]).unwrap()
    }

    #[test]
    fn test_format_grid() {
        assert_eq!(
            format_grid(&sample_grid()),
            "    1   22  333\n 4444    5   60"
        );
        assert_eq!(format_grid(&TaxelArray::zeros(Shape::new(1, 2))), "    0    0");
    }

    #[test]
    fn test_sample_record_json() {
        let grid = sample_grid();
        let record = EventRecord {
            device: DeviceId::from("pad"),
            event: DeviceEvent::NewData(Arc::new(grid.clone())),
            timestamp_ms: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&SampleRecord::new(&record, &grid, None)).unwrap();
        assert_eq!(
            json,
            r#"{"device":"pad","timestamp_ms":1700000000000,"taxels":[[1,22,333],[4444,5,60]]}"#
        );

        let json = serde_json::to_value(SampleRecord::new(&record, &grid, Some(&grid))).unwrap();
        assert_eq!(json["right"][1][0], 4444);
    }

    #[test]
    fn test_jsonl_file() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.jsonl");
        let grid = sample_grid();
        let record = EventRecord {
            device: DeviceId::from("pad"),
            event: DeviceEvent::NewData(Arc::new(grid.clone())),
            timestamp_ms: 1,
        };

        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..2 {
            serde_json::to_writer(&mut file, &SampleRecord::new(&record, &grid, None)).unwrap();
            file.write_all(b"\n").unwrap();
        }
        drop(file);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["taxels"][0][2], 333);
    }
}
