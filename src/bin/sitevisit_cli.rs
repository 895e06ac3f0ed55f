use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use sitevisit::{
    about,
    engine::{Engine, FilterChoice, Operation, TrackerEngine, Workflow},
    persistence::LoadOrigin,
    progress::Progress,
    schema::SchemaFlags,
    Selection, TrackerConfig,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "sitevisit.json";

#[derive(Serialize)]
struct Summary {
    source: String,
    working_copy: String,
    loaded_from: Option<LoadOrigin>,
    rows: usize,
    capabilities: SchemaFlags,
    filters: Vec<FilterChoice>,
    progress: Progress,
    export_file_name: String,
}

#[derive(Serialize)]
struct RowSummary {
    position: usize,
    key: Option<String>,
    visited: bool,
    remarks: String,
    fields: BTreeMap<String, String>,
}

struct GlobalArgs {
    config_path: PathBuf,
    state_path: Option<PathBuf>,
    filters: Vec<(String, String)>,
    rest: Vec<String>,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  sitevisit_cli --version\n  \
  sitevisit_cli [GLOBAL] capabilities\n  \
  sitevisit_cli [GLOBAL] summary\n  \
  sitevisit_cli [GLOBAL] list\n  \
  sitevisit_cli [GLOBAL] options COLUMN\n  \
  sitevisit_cli [GLOBAL] map\n  \
  sitevisit_cli [GLOBAL] op '<operation-json>'\n  \
  sitevisit_cli [GLOBAL] workflow '<workflow-json>'\n  \
  sitevisit_cli [GLOBAL] export [PATH]\n\n  \
  GLOBAL: [--config PATH] [--state PATH] [--filter COLUMN=VALUE]...\n  \
  Tip: pass @file.json instead of inline JSON"
    );
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sitevisit=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_json_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn parse_global_args(args: &[String]) -> Result<GlobalArgs> {
    let mut global = GlobalArgs {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        state_path: None,
        filters: vec![],
        rest: vec![],
    };
    let mut idx = 0;
    while idx < args.len() {
        let flag = args[idx].as_str();
        if !matches!(flag, "--config" | "--state" | "--filter") {
            break;
        }
        let value = args
            .get(idx + 1)
            .ok_or_else(|| anyhow!("Missing value for {flag}"))?;
        match flag {
            "--config" => global.config_path = PathBuf::from(value),
            "--state" => global.state_path = Some(PathBuf::from(value)),
            _ => {
                let (column, selected) = value
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Filter '{value}' must look like COLUMN=VALUE"))?;
                global.filters.push((column.to_string(), selected.to_string()));
            }
        }
        idx += 2;
    }
    global.rest = args[idx..].to_vec();
    Ok(global)
}

fn open_engine(global: &GlobalArgs) -> Result<TrackerEngine> {
    let mut config = TrackerConfig::load_or_default(&global.config_path)?;
    if let Some(state) = &global.state_path {
        config = config.with_working_copy(state);
    }
    let mut engine = TrackerEngine::open(&config)?;
    for (column, value) in &global.filters {
        let op = Operation::SetFilter {
            column: column.clone(),
            value: match Selection::parse(value) {
                Selection::All => None,
                Selection::Value(v) => Some(v),
            },
        };
        for warning in engine.apply(op)?.warnings {
            eprintln!("warning: {warning}");
        }
    }
    Ok(engine)
}

fn save_if_dirty(engine: &mut TrackerEngine) -> Result<()> {
    if engine.has_unsaved_changes() {
        engine.apply(Operation::Save)?;
    }
    Ok(())
}

fn summarize(engine: &TrackerEngine) -> Summary {
    let gateway = engine.gateway();
    Summary {
        source: gateway.source_path().display().to_string(),
        working_copy: gateway.working_copy_path().display().to_string(),
        loaded_from: gateway.last_origin(),
        rows: engine.dataset().len(),
        capabilities: *engine.dataset().schema().flags(),
        filters: engine.standard_filters(),
        progress: engine.progress(),
        export_file_name: engine.export_file_name().to_string(),
    }
}

fn list_rows(engine: &TrackerEngine) -> Vec<RowSummary> {
    let dataset = engine.dataset();
    let headers = dataset.schema().headers();
    engine
        .view()
        .rows()
        .iter()
        .map(|row| RowSummary {
            position: row.position,
            key: row.key.clone(),
            visited: row.record.visited,
            remarks: row.record.remarks.clone(),
            fields: headers
                .iter()
                .zip(dataset.row_cells(&row.record))
                .map(|(header, cell)| (header.to_string(), cell.into_owned()))
                .collect(),
        })
        .collect()
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let global = parse_global_args(&args)?;
    let Some(command) = global.rest.first().cloned() else {
        usage();
        bail!("Missing command");
    };
    let arg = |n: usize| global.rest.get(n).cloned();

    match command.as_str() {
        "capabilities" => print_json(&TrackerEngine::capabilities()),
        "summary" => print_json(&summarize(&open_engine(&global)?)),
        "list" => print_json(&list_rows(&open_engine(&global)?)),
        "options" => {
            let Some(column) = arg(1) else {
                usage();
                bail!("Missing column for options");
            };
            print_json(&open_engine(&global)?.filter_options(&column))
        }
        "map" => print_json(&open_engine(&global)?.map_layer()),
        "op" => {
            let Some(json) = arg(1) else {
                usage();
                bail!("Missing operation JSON");
            };
            let op: Operation =
                serde_json::from_str(&load_json_arg(&json)?).context("Invalid operation JSON")?;
            let mut engine = open_engine(&global)?;
            let result = engine.apply(op)?;
            save_if_dirty(&mut engine)?;
            print_json(&result)
        }
        "workflow" => {
            let Some(json) = arg(1) else {
                usage();
                bail!("Missing workflow JSON");
            };
            let workflow: Workflow =
                serde_json::from_str(&load_json_arg(&json)?).context("Invalid workflow JSON")?;
            let mut engine = open_engine(&global)?;
            let results = engine.apply_workflow(workflow)?;
            save_if_dirty(&mut engine)?;
            print_json(&results)
        }
        "export" => {
            let engine = open_engine(&global)?;
            let target = arg(1).unwrap_or_else(|| engine.export_file_name().to_string());
            let bytes = engine.export()?;
            fs::write(Path::new(&target), &bytes)
                .with_context(|| format!("Could not write export '{target}'"))?;
            println!("Exported {} sites to '{target}'", engine.dataset().len());
            Ok(())
        }
        _ => {
            usage();
            Err(anyhow!("Unknown command '{command}'"))
        }
    }
}
