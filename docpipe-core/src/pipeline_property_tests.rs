// docpipe-core/src/pipeline_property_tests.rs
// Property-based tests over the stage executors

use crate::doc;
use crate::document::Document;
use crate::pipeline::{GroupStage, LookupStage, UnwindStage};
use crate::store::DocumentStore;
use crate::value::Value;
use chrono::Utc;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

fn order_doc(name: &str, price: f64, quantity: i64) -> Document {
    doc! {
        "productName" => name,
        "price" => price,
        "quantity" => quantity
    }
}

prop_compose! {
    fn arb_orders()(specs in prop::collection::vec((0usize..5, 10.0f64..110.0, 1i64..=10), 0..60))
        -> Vec<Document>
    {
        specs
            .into_iter()
            .map(|(n, price, quantity)| {
                order_doc(&format!("Product {}", n), price, quantity)
            })
            .collect()
    }
}

proptest! {
    /// Unwind emits exactly one document per array element, dropping
    /// documents whose array is empty.
    #[test]
    fn unwind_output_count_is_total_element_count(
        lens in prop::collection::vec(0usize..6, 0..20)
    ) {
        let docs: Vec<Document> = lens
            .iter()
            .map(|&len| {
                let items: Vec<Value> =
                    (0..len).map(|i| Value::Int(i as i64)).collect();
                doc! { "items" => items }
            })
            .collect();
        let expected: usize = lens.iter().sum();

        let stage = UnwindStage::new("items");
        let unwound = run_unwind(&stage, docs);
        prop_assert_eq!(unwound.len(), expected);
    }

    /// Lookup attaches, for each document, exactly as many matches as
    /// there are foreign documents carrying its key - regardless of the
    /// order the foreign collection was inserted in.
    #[test]
    fn lookup_match_counts_are_order_independent(
        local_keys in prop::collection::vec(0i64..5, 1..30),
        mut foreign_keys in prop::collection::vec(0i64..5, 0..30),
    ) {
        let docs: Vec<Document> = local_keys
            .iter()
            .map(|&k| doc! { "key" => k })
            .collect();
        let foreign: Vec<Document> = foreign_keys
            .iter()
            .map(|&k| doc! { "key" => k, "payload" => "x" })
            .collect();

        let counts_a = lookup_counts(docs.clone(), foreign);

        foreign_keys.reverse();
        let reversed: Vec<Document> = foreign_keys
            .iter()
            .map(|&k| doc! { "key" => k, "payload" => "x" })
            .collect();
        let counts_b = lookup_counts(docs, reversed);

        prop_assert_eq!(&counts_a, &counts_b);
        for (doc_key, count) in local_keys.iter().zip(&counts_a) {
            let expected =
                foreign_keys.iter().filter(|&&fk| fk == *doc_key).count();
            prop_assert_eq!(*count, expected);
        }
    }

    /// Grouping partitions the input: per-group counts sum to the input
    /// size and the group count equals the number of distinct keys.
    #[test]
    fn group_counts_partition_the_input(orders in arb_orders()) {
        let distinct: HashSet<String> = orders
            .iter()
            .filter_map(|d| d.field("productName"))
            .map(|v| v.canonical_string())
            .collect();
        let input_len = orders.len();

        let stage = GroupStage::from_json(&json!({
            "_id": "$productName",
            "count": {"$sum": 1}
        }))
        .unwrap();
        let mut store = DocumentStore::new();
        store.insert_collection("orders", orders);
        let groups = stage_group(&stage, &store);

        prop_assert_eq!(groups.len(), distinct.len());
        let total: i64 = groups
            .iter()
            .map(|g| match g.field("count") {
                Some(Value::Int(n)) => *n,
                other => panic!("unexpected count: {:?}", other),
            })
            .sum();
        prop_assert_eq!(total, input_len as i64);
    }
}

fn run_unwind(stage: &UnwindStage, docs: Vec<Document>) -> Vec<Document> {
    use crate::pipeline::{Pipeline, Stage};
    let mut store = DocumentStore::new();
    store.insert_collection("input", docs);
    Pipeline::new(vec![Stage::Unwind(stage.clone())])
        .run_at(&store, "input", Utc::now())
        .unwrap()
}

fn lookup_counts(docs: Vec<Document>, foreign: Vec<Document>) -> Vec<usize> {
    use crate::pipeline::{Pipeline, Stage};
    let mut store = DocumentStore::new();
    store.insert_collection("input", docs);
    store.insert_collection("foreign", foreign);
    let stage = LookupStage::new("foreign", "key", "key", "matches");
    Pipeline::new(vec![Stage::Lookup(stage)])
        .run_at(&store, "input", Utc::now())
        .unwrap()
        .iter()
        .map(|d| match d.field("matches") {
            Some(Value::Array(items)) => items.len(),
            other => panic!("unexpected matches field: {:?}", other),
        })
        .collect()
}

fn stage_group(stage: &GroupStage, store: &DocumentStore) -> Vec<Document> {
    use crate::pipeline::{Pipeline, Stage};
    Pipeline::new(vec![Stage::Group(stage.clone())])
        .run_at(store, "orders", Utc::now())
        .unwrap()
}
