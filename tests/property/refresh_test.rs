// tests/property/refresh_test.rs

//! Property-based tests for whole refresh cycles.

use crate::fixtures::{detail_row, table_row};
use crate::test_helpers::TestExporter;
use proptest::prelude::*;
use sf_exporter::core::metrics::DETAILS_KEY;
use std::collections::{BTreeMap, HashSet};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 40,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_repeated_cycles_are_idempotent(
        tables in prop::collection::btree_map("[a-z_]{1,10}", 0f64..1e6, 0..20)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let exporter = TestExporter::new();
            exporter.reply(
                "row_count",
                tables.iter().map(|(t, v)| table_row(t, *v)).collect(),
            );

            exporter.run_cycle().await.unwrap();
            let first = exporter.data_samples();
            exporter.run_cycle().await.unwrap();
            let second = exporter.data_samples();

            assert_eq!(first, second);
            assert_eq!(exporter.series_count("sf_ge_table_rows"), tables.len());
        });
    }

    #[test]
    fn test_last_written_value_wins(
        cycles in prop::collection::vec(
            prop::collection::btree_map("[a-c]", 0f64..100.0, 1..3),
            1..6
        )
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let exporter = TestExporter::new();
            let mut expected: BTreeMap<String, f64> = BTreeMap::new();
            for tables in &cycles {
                exporter.reply(
                    "pass_rate",
                    tables.iter().map(|(t, v)| table_row(t, *v)).collect(),
                );
                exporter.run_cycle().await.unwrap();
                expected.extend(tables.iter().map(|(t, v)| (t.clone(), *v)));
            }

            for (table, value) in &expected {
                assert_eq!(
                    exporter.value("sf_ge_pass_rate", &[("table", table.as_str())]),
                    Some(*value)
                );
            }
            assert_eq!(exporter.series_count("sf_ge_pass_rate"), expected.len());
        });
    }

    #[test]
    fn test_detail_series_accumulate_distinct_messages(
        messages in prop::collection::vec(("[a-b]", "[x-z]{1,2}"), 1..8)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let exporter = TestExporter::new();
            for (table, msg) in &messages {
                exporter.reply(DETAILS_KEY, vec![detail_row(table, Some(1.0), msg)]);
                exporter.run_cycle().await.unwrap();
            }

            let distinct: HashSet<&(String, String)> = messages.iter().collect();
            assert_eq!(exporter.series_count("sf_dt_details"), distinct.len());
        });
    }
}
