use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use docpipe_core::{
    load_fixtures, run_benchmark, set_log_level, DocumentStore, FixtureConfig, LogLevel, Pipeline,
    CONFIGS_COLLECTION, ORDERS_COLLECTION,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "docpipe")]
#[command(about = "docpipe CLI - In-process document aggregation pipelines")]
#[command(version)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatasetArgs {
    /// Number of synthetic orders
    #[arg(long, default_value_t = 50)]
    orders: usize,
    /// Number of product configurations
    #[arg(long, default_value_t = 5)]
    products: usize,
    /// Seed for reproducible datasets (random when omitted)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the order-summary pipeline once and print the results
    Run {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Time repeated executions of the order-summary pipeline
    Bench {
        #[command(flatten)]
        dataset: DatasetArgs,
        /// Number of timed iterations
        #[arg(long, default_value_t = 10)]
        iterations: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::parse(&cli.log_level)
        .ok_or_else(|| anyhow!("unknown log level: {}", cli.log_level))?;
    set_log_level(level);

    match cli.command {
        Commands::Run { dataset } => run_once(&dataset),
        Commands::Bench { dataset, iterations } => bench(&dataset, iterations),
    }
}

fn build_store(dataset: &DatasetArgs) -> DocumentStore {
    let config = FixtureConfig {
        orders: dataset.orders,
        products: dataset.products,
        seed: dataset.seed,
    };
    let (orders, configs) = load_fixtures(chrono::Utc::now(), &config);
    let mut store = DocumentStore::new();
    store.insert_collection(ORDERS_COLLECTION, orders);
    store.insert_collection(CONFIGS_COLLECTION, configs);
    let mut names: Vec<&str> = store.collection_names().collect();
    names.sort_unstable();
    docpipe_core::log_debug!("loaded collections: {}", names.join(", "));
    store
}

/// Recent orders joined against their active product configuration,
/// summarized per product name.
fn order_summary_pipeline() -> Result<Pipeline> {
    let description = json!([
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
    ]);
    Pipeline::from_json(&description).context("invalid pipeline description")
}

fn run_once(dataset: &DatasetArgs) -> Result<()> {
    let store = build_store(dataset);
    let pipeline = order_summary_pipeline()?;
    let results = pipeline
        .run(&store, ORDERS_COLLECTION)
        .context("pipeline execution failed")?;

    let rendered: Vec<serde_json::Value> = results.iter().map(|doc| doc.to_json()).collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    eprintln!("{} result documents", results.len());
    Ok(())
}

fn bench(dataset: &DatasetArgs, iterations: usize) -> Result<()> {
    let store = build_store(dataset);
    let pipeline = order_summary_pipeline()?;

    println!("Starting performance test...");
    println!("Number of iterations: {}", iterations);

    let report = run_benchmark(&store, &pipeline, ORDERS_COLLECTION, iterations)
        .context("benchmark failed")?;

    for sample in &report.samples {
        println!("Iteration {}:", sample.iteration + 1);
        println!("  Execution time: {}ms", sample.elapsed.as_millis());
        println!("  Number of results: {}", sample.result_count);
    }

    println!();
    println!("Performance Summary:");
    println!(
        "Average execution time: {:.2}ms",
        report.mean.as_secs_f64() * 1000.0
    );
    println!("Minimum execution time: {}ms", report.min.as_millis());
    println!("Maximum execution time: {}ms", report.max.as_millis());
    println!("Average number of results: {:.2}", report.mean_result_count);
    Ok(())
}
