// Integration tests for the aggregation pipeline engine
use chrono::{TimeZone, Utc};
use docpipe_core::{
    doc, load_fixtures, run_benchmark, AccumulatorSpec, CondOp, Document, DocumentStore, Expr,
    FixtureConfig, GroupStage, LookupStage, MatchStage, Pipeline, Predicate, ProjectField,
    ProjectStage, Stage, UnwindStage, Value, CONFIGS_COLLECTION, ORDERS_COLLECTION,
};
use serde_json::json;

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn seeded_store(seed: u64) -> DocumentStore {
    let config = FixtureConfig {
        seed: Some(seed),
        ..FixtureConfig::default()
    };
    let (orders, configs) = load_fixtures(fixed_now(), &config);
    let mut store = DocumentStore::new();
    store.insert_collection(ORDERS_COLLECTION, orders);
    store.insert_collection(CONFIGS_COLLECTION, configs);
    store
}

/// The order-summary pipeline: filter recent orders, join their product
/// configuration, keep only orders under an active configuration, then
/// summarize per product name.
fn order_summary_json() -> serde_json::Value {
    json!([
        {"$match": {
            "status": {"$in": ["PENDING", "PROCESSING", "CANCELLED"]},
            "price": {"$gt": 10},
            "orderDate": {"$gte": {"$daysFromNow": -10}}
        }},
        {"$lookup": {
            "from": "product_configs",
            "localField": "productId",
            "foreignField": "productId",
            "as": "productConfig"
        }},
        {"$unwind": "$productConfig"},
        {"$match": {
            "productConfig.enabled": true,
            "productConfig.startDate": {"$gte": {"$daysFromNow": -10}},
            "productConfig.endDate": {"$lte": {"$daysFromNow": 10}}
        }},
        {"$group": {
            "_id": "$productName",
            "totalOrders": {"$sum": 1},
            "totalQuantity": {"$sum": "$quantity"},
            "totalPrice": {"$sum": {"$multiply": ["$price", "$quantity"]}},
            "averagePrice": {"$avg": "$price"},
            "statusCounts": {"$push": {"status": "$status", "count": 1}}
        }},
        {"$project": {
            "_id": 0,
            "productName": "$_id",
            "totalOrders": 1,
            "totalQuantity": 1,
            "totalPrice": 1,
            "averagePrice": 1,
            "statusBreakdown": {"$map": {
                "input": "$statusCounts",
                "as": "status",
                "in": {"status": "$$status.status", "count": "$$status.count"}
            }}
        }}
    ])
}

fn order_summary_pipeline() -> Pipeline {
    Pipeline::from_json(&order_summary_json()).unwrap()
}

/// Count the orders the pipeline should retain, computed directly from
/// the fixture rules: every fixture status is eligible and every order
/// date is inside the window, so only the price threshold filters.
fn expected_retained_orders(store: &DocumentStore) -> usize {
    store
        .collection(ORDERS_COLLECTION)
        .unwrap()
        .iter()
        .filter(|order| match order.field("price") {
            Some(Value::Float(price)) => *price > 10.0,
            other => panic!("unexpected price field: {:?}", other),
        })
        .count()
}

#[test]
fn test_order_summary_end_to_end() {
    let store = seeded_store(7);
    let results = order_summary_pipeline()
        .run_at(&store, ORDERS_COLLECTION, fixed_now())
        .unwrap();

    // One group per product name actually seen, at most 5.
    assert!(!results.is_empty());
    assert!(results.len() <= 5);

    let mut total_orders_across_groups = 0i64;
    for summary in &results {
        assert!(!summary.contains("_id"));
        assert!(matches!(summary.field("productName"), Some(Value::String(_))));

        let Some(Value::Int(total_orders)) = summary.field("totalOrders") else {
            panic!("totalOrders must be an int");
        };
        assert!(*total_orders > 0);
        total_orders_across_groups += total_orders;

        let Some(Value::Int(total_quantity)) = summary.field("totalQuantity") else {
            panic!("totalQuantity must be an int");
        };
        assert!(*total_quantity >= *total_orders); // quantity >= 1 per order

        let Some(Value::Float(total_price)) = summary.field("totalPrice") else {
            panic!("totalPrice must be a float");
        };
        assert!(*total_price > 0.0);

        let Some(Value::Float(average_price)) = summary.field("averagePrice") else {
            panic!("averagePrice must be a float");
        };
        assert!((10.0..110.0).contains(average_price));

        // Per-status entries partition the group.
        let Some(Value::Array(breakdown)) = summary.field("statusBreakdown") else {
            panic!("statusBreakdown must be an array");
        };
        let mut breakdown_total = 0i64;
        for entry in breakdown {
            let Value::Document(entry) = entry else {
                panic!("breakdown entries must be documents");
            };
            assert!(matches!(entry.field("status"), Some(Value::String(_))));
            let Some(Value::Int(count)) = entry.field("count") else {
                panic!("count must be an int");
            };
            breakdown_total += count;
        }
        assert_eq!(breakdown_total, *total_orders);
    }

    // Groups partition the retained orders: every config is active, so
    // the join and second match keep everything the first match kept.
    assert_eq!(
        total_orders_across_groups,
        expected_retained_orders(&store) as i64
    );
}

#[test]
fn test_orphan_orders_are_excluded() {
    let mut store = seeded_store(11);
    let mut orders = store.collection(ORDERS_COLLECTION).unwrap().to_vec();
    orders.push(doc! {
        "productId" => "PROD999",
        "orderNumber" => "ORD-ORPHAN",
        "orderDate" => fixed_now(),
        "productName" => "Orphan Product",
        "productCategory" => "Category0",
        "price" => 50.0,
        "quantity" => 2i64,
        "status" => "PENDING"
    });
    store.insert_collection(ORDERS_COLLECTION, orders);

    let results = order_summary_pipeline()
        .run_at(&store, ORDERS_COLLECTION, fixed_now())
        .unwrap();

    // Lookup keeps the orphan with an empty config array; unwind drops
    // it, so no group for its product name may appear.
    assert!(results
        .iter()
        .all(|s| s.field("productName") != Some(&Value::from("Orphan Product"))));
}

#[test]
fn test_disabled_configuration_excludes_its_orders() {
    let now = fixed_now();
    let mut store = DocumentStore::new();
    store.insert_collection(
        ORDERS_COLLECTION,
        vec![
            doc! {
                "productId" => "PROD0", "orderNumber" => "ORD0", "orderDate" => now,
                "productName" => "Product A", "price" => 50.0, "quantity" => 1i64,
                "status" => "PENDING"
            },
            doc! {
                "productId" => "PROD1", "orderNumber" => "ORD1", "orderDate" => now,
                "productName" => "Product B", "price" => 50.0, "quantity" => 1i64,
                "status" => "PENDING"
            },
        ],
    );
    store.insert_collection(
        CONFIGS_COLLECTION,
        vec![
            doc! {
                "productId" => "PROD0", "enabled" => true,
                "startDate" => now - chrono::Duration::days(5),
                "endDate" => now + chrono::Duration::days(5)
            },
            doc! {
                "productId" => "PROD1", "enabled" => false,
                "startDate" => now - chrono::Duration::days(5),
                "endDate" => now + chrono::Duration::days(5)
            },
        ],
    );

    let results = order_summary_pipeline()
        .run_at(&store, ORDERS_COLLECTION, now)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].field("productName"),
        Some(&Value::from("Product A"))
    );
}

#[test]
fn test_json_description_matches_typed_construction() {
    let typed = Pipeline::new(vec![
        Stage::Match(MatchStage::new(
            Predicate::default()
                .and(
                    "status",
                    CondOp::In(vec![
                        Value::from("PENDING"),
                        Value::from("PROCESSING"),
                        Value::from("CANCELLED"),
                    ]),
                )
                .and("price", CondOp::Gt(Expr::Literal(Value::Int(10))))
                .and("orderDate", CondOp::Gte(Expr::DaysFromNow(-10))),
        )),
        Stage::Lookup(LookupStage::new(
            "product_configs",
            "productId",
            "productId",
            "productConfig",
        )),
        Stage::Unwind(UnwindStage::new("productConfig")),
        Stage::Match(MatchStage::new(
            Predicate::default()
                .and("productConfig.enabled", CondOp::Eq(Value::Bool(true)))
                .and("productConfig.startDate", CondOp::Gte(Expr::DaysFromNow(-10)))
                .and("productConfig.endDate", CondOp::Lte(Expr::DaysFromNow(10))),
        )),
        Stage::Group(GroupStage::new(
            Expr::Field("productName".to_string()),
            vec![
                (
                    "totalOrders".to_string(),
                    AccumulatorSpec::Sum(Expr::Literal(Value::Int(1))),
                ),
                (
                    "totalQuantity".to_string(),
                    AccumulatorSpec::Sum(Expr::Field("quantity".to_string())),
                ),
                (
                    "totalPrice".to_string(),
                    AccumulatorSpec::Sum(Expr::Multiply(
                        Box::new(Expr::Field("price".to_string())),
                        Box::new(Expr::Field("quantity".to_string())),
                    )),
                ),
                (
                    "averagePrice".to_string(),
                    AccumulatorSpec::Avg(Expr::Field("price".to_string())),
                ),
                (
                    "statusCounts".to_string(),
                    AccumulatorSpec::Push(Expr::Doc(vec![
                        ("status".to_string(), Expr::Field("status".to_string())),
                        ("count".to_string(), Expr::Literal(Value::Int(1))),
                    ])),
                ),
            ],
        )),
        Stage::Project(ProjectStage::new(vec![
            ("_id".to_string(), ProjectField::Suppress),
            ("productName".to_string(), ProjectField::Rename("_id".to_string())),
            ("totalOrders".to_string(), ProjectField::Include),
            ("totalQuantity".to_string(), ProjectField::Include),
            ("totalPrice".to_string(), ProjectField::Include),
            ("averagePrice".to_string(), ProjectField::Include),
            (
                "statusBreakdown".to_string(),
                ProjectField::MapArray {
                    input: "statusCounts".to_string(),
                    expr: Expr::Doc(vec![
                        ("status".to_string(), Expr::ElemField("status".to_string())),
                        ("count".to_string(), Expr::ElemField("count".to_string())),
                    ]),
                },
            ),
        ])),
    ]);

    let store = seeded_store(23);
    let now = fixed_now();
    let from_json = order_summary_pipeline()
        .run_at(&store, ORDERS_COLLECTION, now)
        .unwrap();
    let from_typed = typed.run_at(&store, ORDERS_COLLECTION, now).unwrap();

    let render = |docs: &[Document]| -> Vec<serde_json::Value> {
        docs.iter().map(Document::to_json).collect()
    };
    assert_eq!(render(&from_json), render(&from_typed));
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let store = seeded_store(5);
    let pipeline = order_summary_pipeline();
    let now = fixed_now();
    let first = pipeline.run_at(&store, ORDERS_COLLECTION, now).unwrap();
    let second = pipeline.run_at(&store, ORDERS_COLLECTION, now).unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.to_json(), b.to_json());
    }
}

#[test]
fn test_benchmark_over_fixture_dataset() {
    // The benchmark times against the wall clock, so fixtures must be
    // generated around the current instant for the date window to hold.
    let config = FixtureConfig {
        seed: Some(3),
        ..FixtureConfig::default()
    };
    let (orders, configs) = load_fixtures(Utc::now(), &config);
    let mut store = DocumentStore::new();
    store.insert_collection(ORDERS_COLLECTION, orders);
    store.insert_collection(CONFIGS_COLLECTION, configs);
    let pipeline = order_summary_pipeline();
    let report = run_benchmark(&store, &pipeline, ORDERS_COLLECTION, 10).unwrap();

    assert_eq!(report.samples.len(), 10);
    assert!(report.min <= report.mean);
    assert!(report.mean <= report.max);
    // All iterations see the same fixture data, so the result count is
    // stable across samples.
    let first_count = report.samples[0].result_count;
    assert!(report.samples.iter().all(|s| s.result_count == first_count));
    assert_eq!(report.mean_result_count, first_count as f64);
}
