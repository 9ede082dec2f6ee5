use clap::{value_parser, Arg, ArgMatches, Command};
use log::LevelFilter;
use sigrecover::{
    load_config, Config, JsonLinesSource, Pipeline, Signature, SignatureExtractor, SignatureStore,
    SqliteStore, StopHandle,
};
use std::path::Path;
use std::process;
use std::sync::Arc;

const EXIT_USER_ERROR: i32 = 1;
const EXIT_INTERNAL_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let matches = Command::new("sigrecover")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Recover sender signature blocks from archived mail")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("YAML configuration file (defaults are used when omitted)")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging, including per-message metrics")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("extract")
                .about("Extract signatures from a JSON-lines message file into an index")
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_name("FILE")
                        .help("Messages, one JSON object per line")
                        .required(true),
                )
                .arg(
                    Arg::new("index")
                        .long("index")
                        .value_name("DB")
                        .help("SQLite signature index to write")
                        .required(true),
                )
                .arg(
                    Arg::new("threads")
                        .long("threads")
                        .value_name("N")
                        .help("Number of extraction workers")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("batch-size")
                        .long("batch-size")
                        .value_name("N")
                        .help("Signatures per dedupe/store batch")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("min-confidence")
                        .long("min-confidence")
                        .value_name("F")
                        .help("Drop signatures below this confidence")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("metrics")
                        .long("metrics")
                        .help("Print the metrics summary when done")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("dump-metrics")
                        .long("dump-metrics")
                        .value_name("FILE")
                        .help("Write summary and per-message metrics as JSON"),
                ),
        )
        .subcommand(
            Command::new("query")
                .about("Search an existing signature index")
                .arg(
                    Arg::new("index")
                        .long("index")
                        .value_name("DB")
                        .help("SQLite signature index to read")
                        .required(true),
                )
                .arg(
                    Arg::new("q")
                        .long("q")
                        .value_name("TEXT")
                        .help("Case-insensitive substring filter ('*' matches all)"),
                )
                .arg(
                    Arg::new("min-confidence")
                        .long("min-confidence")
                        .value_name("F")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    Arg::new("page")
                        .long("page")
                        .value_name("N")
                        .default_value("1")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("size")
                        .long("size")
                        .value_name("N")
                        .default_value("10")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print results as JSON")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("generate-config")
                .about("Write the default configuration file")
                .arg(Arg::new("file").value_name("FILE").required(true)),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e:#}");
                process::exit(EXIT_USER_ERROR);
            }
        },
        None => Config::default(),
    };

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config
            .logging
            .as_ref()
            .and_then(|logging| logging.level.parse().ok())
            .unwrap_or(LevelFilter::Info)
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match matches.subcommand() {
        Some(("extract", args)) => run_extract(config, args).await,
        Some(("query", args)) => run_query(args),
        Some(("generate-config", args)) => {
            if let Some(path) = args.get_one::<String>("file") {
                generate_default_config(path);
            }
        }
        _ => unreachable!("clap enforces a subcommand"),
    }
}

async fn run_extract(mut config: Config, args: &ArgMatches) {
    if let Some(threads) = args.get_one::<usize>("threads") {
        config.pipeline.concurrency = *threads;
    }
    if let Some(batch_size) = args.get_one::<usize>("batch-size") {
        config.pipeline.batch_size = *batch_size;
    }
    if let Some(min_confidence) = args.get_one::<f64>("min-confidence") {
        config.pipeline.min_confidence = *min_confidence;
    }

    let input = args.get_one::<String>("input").map(String::as_str).unwrap_or_default();
    let index = args.get_one::<String>("index").map(String::as_str).unwrap_or_default();

    if !Path::new(input).exists() {
        eprintln!("❌ Input file not found: {input}");
        process::exit(EXIT_USER_ERROR);
    }
    let source = match JsonLinesSource::open(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("❌ {e:#}");
            process::exit(EXIT_USER_ERROR);
        }
    };

    let extractor = match SignatureExtractor::new(&config) {
        Ok(extractor) => extractor,
        Err(e) => {
            eprintln!("❌ Invalid extraction configuration: {e:#}");
            process::exit(EXIT_USER_ERROR);
        }
    };

    let store: Arc<dyn SignatureStore> = match SqliteStore::open(index) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("❌ {e:#}");
            process::exit(EXIT_INTERNAL_ERROR);
        }
    };

    let stop = StopHandle::new();
    let handler_stop = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received interrupt, finishing the in-flight batch...");
        handler_stop.stop();
    }) {
        log::warn!("Failed to install Ctrl-C handler: {e}");
    }

    println!("🔍 Extracting signatures from {input} into {index}");
    println!(
        "   workers: {}, batch size: {}, min confidence: {}",
        config.pipeline.concurrency, config.pipeline.batch_size, config.pipeline.min_confidence
    );

    let pipeline = Pipeline::new(Arc::new(extractor), &config).with_stop_handle(stop);
    let report = pipeline.run(source, store).await;

    if report.cancelled {
        println!("⚠️  Stopped early on request");
    }
    println!(
        "✅ {} signature(s) committed in {} batch(es)",
        report.signatures_committed, report.batches_flushed
    );

    if args.get_flag("metrics") {
        let summary = &report.summary;
        println!();
        println!("📊 Extraction Metrics");
        println!("═══════════════════════════════════════");
        println!("  Messages processed:   {}", summary.total_messages);
        println!("  Signatures extracted: {}", summary.signatures_extracted);
        println!("  Avg time per message: {:.3} ms", summary.average_time_ms);
        println!("  Avg confidence:       {:.3}", summary.average_confidence);
        println!("  Duration:             {:.2} s", summary.duration_s);
    }

    if let Some(path) = args.get_one::<String>("dump-metrics") {
        match pipeline.metrics().dump(path) {
            Ok(()) => println!("📝 Metrics written to {path}"),
            Err(e) => {
                eprintln!("❌ {e:#}");
                process::exit(EXIT_INTERNAL_ERROR);
            }
        }
    }

    if report.store_failures > 0 {
        eprintln!("❌ {} batch(es) could not be stored", report.store_failures);
        process::exit(EXIT_INTERNAL_ERROR);
    }
}

fn run_query(args: &ArgMatches) {
    let index = args.get_one::<String>("index").map(String::as_str).unwrap_or_default();
    if !Path::new(index).exists() {
        eprintln!("❌ Index not found: {index}");
        process::exit(EXIT_USER_ERROR);
    }

    let filter = args.get_one::<String>("q").map(String::as_str);
    let min_confidence = args.get_one::<f64>("min-confidence").copied().unwrap_or(0.0);
    let page = args.get_one::<usize>("page").copied().unwrap_or(1).max(1);
    let size = args.get_one::<usize>("size").copied().unwrap_or(10).max(1);

    let results = match SqliteStore::open(index).and_then(|store| store.query(filter, min_confidence)) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("❌ Query failed: {e:#}");
            process::exit(EXIT_INTERNAL_ERROR);
        }
    };

    let total = results.len();
    let offset = page_offset(page, size);
    let hits: Vec<&Signature> = results.iter().skip(offset).take(size).collect();

    if args.get_flag("json") {
        match serde_json::to_string_pretty(&hits) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("❌ Failed to serialize results: {e}");
                process::exit(EXIT_INTERNAL_ERROR);
            }
        }
        return;
    }

    println!("🔎 {total} match(es), page {page} ({} shown)", hits.len());
    for (i, signature) in hits.iter().enumerate() {
        let meta = &signature.metadata;
        println!();
        println!(
            "{}. [{:.2}] msg={}",
            offset.saturating_add(i + 1),
            signature.confidence,
            signature.source_msg_id
        );
        for (label, value) in [
            ("Name", &meta.name),
            ("Title", &meta.title),
            ("Company", &meta.company),
            ("Email", &meta.email),
            ("Phone", &meta.phone),
        ] {
            if let Some(value) = value {
                println!("   {label}: {value}");
            }
        }
        println!("   {}", truncate_string(&signature.text().replace('\n', " / "), 100));
    }
}

fn generate_default_config(path: &str) {
    let written = Config::default()
        .to_yaml()
        .and_then(|yaml| std::fs::write(path, yaml).map_err(anyhow::Error::from));
    match written {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(EXIT_USER_ERROR);
        }
    }
}

/// Rows skipped before `page` (1-based); absurd page numbers clamp instead of overflowing.
fn page_offset(page: usize, size: usize) -> usize {
    page.saturating_sub(1).saturating_mul(size)
}

fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
