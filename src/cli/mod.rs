// CLI command definitions

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Traceforge - Superblock Formation Engine
///
/// Partitions a function's control-flow graph into hot traces and applies
/// tail duplication so each trace becomes a superblock.
#[derive(Parser, Debug, Clone)]
#[command(name = "traceforge")]
#[command(author, version, about)]
#[command(long_about = "Traceforge forms superblocks over serialized control-flow graphs.

Given a module file (functions, instructions, terminators, profile data),
it can:

  - partition each function's blocks into linear traces
    (profile-directed, random, or static-heuristic growth)
  - tail-duplicate side-entered trace interiors into superblocks
  - report static branch predictions and their agreement with the profile
  - extract per-branch feature rows for training a learned predictor")]
pub struct Cli {
    /// Path to the module file (JSON)
    #[arg(global = true, long, env = "TRACEFORGE_INPUT")]
    pub input: Option<String>,

    /// Output format
    #[arg(global = true, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Human,
    /// Compact JSON for programmatic consumption
    Json,
    /// Formatted JSON with indentation
    Pretty,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Form traces and print them without transforming the module
    Traces(TracesArgs),

    /// Form traces and tail-duplicate them into superblocks
    Form(FormArgs),

    /// Show static branch predictions and profile agreement
    Predict(PredictArgs),

    /// Extract branch feature rows to a CSV dataset
    Features(FeaturesArgs),

    /// Show a function's control-flow graph
    Cfg(CfgArgs),
}

/// Trace growth variant
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantArg {
    /// Grow along edges whose profile probability clears the threshold
    Profile,
    /// Grow along uniformly sampled neighbors
    Random,
    /// Grow along statically predicted branch directions
    Heuristic,
}

impl VariantArg {
    pub fn to_variant(self) -> crate::trace::Variant {
        match self {
            VariantArg::Profile => crate::trace::Variant::Profile,
            VariantArg::Random => crate::trace::Variant::Random,
            VariantArg::Heuristic => crate::trace::Variant::Heuristic,
        }
    }
}

/// Growth parameters shared by the trace-forming commands
#[derive(Args, Debug, Clone)]
pub struct GrowthArgs {
    /// Trace growth variant
    #[arg(long, value_enum, default_value_t = VariantArg::Profile)]
    pub variant: VariantArg,

    /// Edge-probability threshold for forward growth (profile variant)
    #[arg(long, default_value_t = 0.60)]
    pub taken_threshold: f64,

    /// Weight-fraction threshold for backward growth (profile variant)
    #[arg(long, default_value_t = 0.60)]
    pub predecessor_threshold: f64,

    /// RNG seed; a time-derived seed is used (and logged) when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Random variant: sample among the neighbors that can actually
    /// extend the trace instead of stopping on the first bad draw
    #[arg(long)]
    pub without_replacement: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct TracesArgs {
    #[command(flatten)]
    pub growth: GrowthArgs,

    /// Only process this function
    #[arg(long)]
    pub function: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct FormArgs {
    #[command(flatten)]
    pub growth: GrowthArgs,

    /// Only process this function
    #[arg(long)]
    pub function: Option<String>,

    /// Write the transformed module to this path
    #[arg(long)]
    pub emit: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct PredictArgs {
    /// Only process this function
    #[arg(long)]
    pub function: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct FeaturesArgs {
    /// Only process this function
    #[arg(long)]
    pub function: Option<String>,

    /// Dataset path; defaults to <source_file>.csv next to the input
    #[arg(long)]
    pub csv: Option<String>,

    /// Collect per-opcode successor flags from the final opcode
    /// observation only, reproducing the historical dataset layout
    #[arg(long)]
    pub last_opcode_only: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct CfgArgs {
    /// Function to show
    #[arg(long)]
    pub function: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = CfgFormat::Human)]
    pub format: CfgFormat,
}

/// CFG output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgFormat {
    /// Human-readable text
    Human,
    /// Graphviz DOT format
    Dot,
    /// JSON export
    Json,
}

pub mod cmds {
    use super::*;
    use crate::features::{extract_function, CsvSink, OpcodeFlagMode};
    use crate::ir::{Function, Module};
    use crate::output::{self, Diagnostic, Level};
    use crate::trace::predict::{prediction_records, prediction_stats, PredictionRecord};
    use crate::trace::{
        form_traces, predict_branches, tail_duplicate, DuplicationReport, FnContext,
        FormationConfig, PredictionStats, Trace,
    };
    use anyhow::Result;
    use std::path::Path;
    use tracing::info;

    fn json_mode(cli: &Cli) -> bool {
        matches!(cli.output, OutputFormat::Json | OutputFormat::Pretty)
    }

    fn emit_json<T: serde::Serialize>(cli: &Cli, data: &T) {
        output::print_json(data, matches!(cli.output, OutputFormat::Pretty));
    }

    fn load_module(cli: &Cli) -> Result<Module> {
        let Some(path) = cli.input.clone() else {
            Diagnostic::missing_input().fail(json_mode(cli));
        };
        if !Path::new(&path).exists() {
            Diagnostic::input_not_found(&path).fail(json_mode(cli));
        }
        Module::from_json_file(&path)
    }

    /// Indices of the functions selected by --function (all when absent)
    fn select_functions(module: &Module, filter: &Option<String>, cli: &Cli) -> Vec<usize> {
        let selected: Vec<usize> = module
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| filter.as_deref().map_or(true, |name| f.name == name))
            .map(|(index, _)| index)
            .collect();

        if selected.is_empty() {
            if let Some(name) = filter {
                Diagnostic::function_not_found(name).fail(json_mode(cli));
            }
        }
        selected
    }

    /// Report a per-function failure and keep going with the rest
    fn report_function_error(cli: &Cli, name: &str, detail: &str) {
        Diagnostic::malformed_function(name, detail).emit(json_mode(cli));
    }

    fn resolve_seed(growth: &GrowthArgs) -> u64 {
        growth.seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            info!(seed, "using time-derived rng seed");
            seed
        })
    }

    fn formation_config(growth: &GrowthArgs) -> FormationConfig {
        FormationConfig {
            variant: growth.variant.to_variant(),
            taken_threshold: growth.taken_threshold,
            predecessor_threshold: growth.predecessor_threshold,
            seed: resolve_seed(growth),
            sample_without_replacement: growth.without_replacement,
        }
    }

    fn print_traces_human(func: &Function, traces: &[Trace]) {
        output::headline(&func.name);
        for trace in traces {
            let blocks = trace
                .blocks
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            println!("trace {}: {}", trace.id, blocks);
        }
        println!();
    }

    #[derive(serde::Serialize)]
    struct FunctionTraces {
        function: String,
        traces: Vec<Trace>,
    }

    pub fn traces(args: &TracesArgs, cli: &Cli) -> Result<()> {
        let module = load_module(cli)?;
        let selected = select_functions(&module, &args.function, cli);
        let config = formation_config(&args.growth);

        let mut results = Vec::new();
        for index in selected {
            let func = &module.functions[index];
            let ctx = match FnContext::new(func) {
                Ok(ctx) => ctx,
                Err(e) => {
                    report_function_error(cli, &func.name, &e.to_string());
                    continue;
                }
            };
            let set = form_traces(&ctx, &config);
            if json_mode(cli) {
                results.push(FunctionTraces {
                    function: func.name.clone(),
                    traces: set.traces,
                });
            } else {
                print_traces_human(func, &set.traces);
            }
        }

        if json_mode(cli) {
            emit_json(cli, &results);
        }
        Ok(())
    }

    #[derive(serde::Serialize)]
    struct FormResult {
        function: String,
        traces: Vec<Trace>,
        duplication: DuplicationReport,
        blocks_after: usize,
    }

    pub fn form(args: &FormArgs, cli: &Cli) -> Result<()> {
        let mut module = load_module(cli)?;
        let selected = select_functions(&module, &args.function, cli);
        let config = formation_config(&args.growth);

        let mut results = Vec::new();
        for index in selected {
            let func = &mut module.functions[index];
            let set = {
                let ctx = match FnContext::new(func) {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        report_function_error(cli, &func.name, &e.to_string());
                        continue;
                    }
                };
                form_traces(&ctx, &config)
            };

            let report = match tail_duplicate(func, &set) {
                Ok(report) => report,
                Err(e) => {
                    report_function_error(cli, &func.name, &e.to_string());
                    continue;
                }
            };

            if json_mode(cli) {
                results.push(FormResult {
                    function: func.name.clone(),
                    traces: set.traces,
                    duplication: report,
                    blocks_after: func.blocks.len(),
                });
            } else {
                print_traces_human(func, &set.traces);
                if report.modified {
                    output::report(
                        Level::Success,
                        &format!(
                            "{}: cloned {} block(s), {} blocks total",
                            func.name,
                            report.cloned_blocks,
                            func.blocks.len()
                        ),
                    );
                } else {
                    output::report(
                        Level::Info,
                        &format!("{}: no side entrances, nothing duplicated", func.name),
                    );
                }
            }
        }

        if let Some(path) = &args.emit {
            module.to_json_file(path)?;
            if !json_mode(cli) {
                output::report(
                    Level::Success,
                    &format!("transformed module written to {}", path),
                );
            }
        }

        if json_mode(cli) {
            emit_json(cli, &results);
        }
        Ok(())
    }

    #[derive(serde::Serialize)]
    struct PredictResult {
        function: String,
        predictions: Vec<PredictionRecord>,
        stats: PredictionStats,
    }

    #[derive(serde::Serialize)]
    struct PredictSummary {
        functions: Vec<PredictResult>,
        totals: PredictionStats,
        accuracy: f64,
        coverage: f64,
    }

    pub fn predict(args: &PredictArgs, cli: &Cli) -> Result<()> {
        let module = load_module(cli)?;
        let selected = select_functions(&module, &args.function, cli);

        let mut functions = Vec::new();
        let mut totals = PredictionStats::default();
        for index in selected {
            let func = &module.functions[index];
            let ctx = match FnContext::new(func) {
                Ok(ctx) => ctx,
                Err(e) => {
                    report_function_error(cli, &func.name, &e.to_string());
                    continue;
                }
            };
            let predictions = predict_branches(&ctx);
            let stats = prediction_stats(&ctx, &predictions);
            totals.add(&stats);
            functions.push(PredictResult {
                function: func.name.clone(),
                predictions: prediction_records(&ctx, &predictions),
                stats,
            });
        }

        if json_mode(cli) {
            emit_json(
                cli,
                &PredictSummary {
                    accuracy: totals.accuracy(),
                    coverage: totals.coverage(),
                    functions,
                    totals,
                },
            );
        } else {
            for result in &functions {
                output::headline(&result.function);
                for p in &result.predictions {
                    println!(
                        "branch {} (block {}): {} -> {}",
                        p.branch,
                        p.block,
                        p.source,
                        if p.arm == 0 { "taken" } else { "fall-through" }
                    );
                }
                println!();
            }
            output::headline("Branch Prediction Stats");
            println!("conditional branches: {}", totals.conditional_branches);
            println!("covered by heuristics: {}", totals.covered());
            println!("agreeing with profile: {}", totals.agreeing());
            println!("accuracy: {:.3}", totals.accuracy());
            println!("coverage: {:.3}", totals.coverage());
            println!(
                "hazard: {} predicted, {} agreeing",
                totals.hazard_predicted, totals.hazard_agree
            );
            println!(
                "path: {} predicted, {} agreeing",
                totals.path_predicted, totals.path_agree
            );
        }
        Ok(())
    }

    #[derive(serde::Serialize)]
    struct FeaturesResult {
        csv: String,
        functions: usize,
        rows_written: usize,
    }

    pub fn features(args: &FeaturesArgs, cli: &Cli) -> Result<()> {
        let module = load_module(cli)?;
        let selected = select_functions(&module, &args.function, cli);

        let csv_path = args
            .csv
            .clone()
            .unwrap_or_else(|| format!("{}.csv", module.source_file));
        let sink = CsvSink::new(&csv_path);
        let mode = if args.last_opcode_only {
            OpcodeFlagMode::LastOnly
        } else {
            OpcodeFlagMode::Any
        };

        let mut processed = 0;
        let mut rows_written = 0;
        for index in selected {
            let func = &module.functions[index];
            let ctx = match FnContext::new(func) {
                Ok(ctx) => ctx,
                Err(e) => {
                    report_function_error(cli, &func.name, &e.to_string());
                    continue;
                }
            };
            let rows = extract_function(&ctx, mode);
            let written = sink.append(&rows);
            if written < rows.len() {
                output::report(
                    Level::Warn,
                    &format!(
                        "{}: dropped {} row(s) on write",
                        func.name,
                        rows.len() - written
                    ),
                );
            }
            rows_written += written;
            processed += 1;
        }

        if json_mode(cli) {
            emit_json(
                cli,
                &FeaturesResult {
                    csv: csv_path,
                    functions: processed,
                    rows_written,
                },
            );
        } else {
            output::report(
                Level::Success,
                &format!(
                    "{} row(s) from {} function(s) appended to {}",
                    rows_written, processed, csv_path
                ),
            );
        }
        Ok(())
    }

    pub fn cfg(args: &CfgArgs, cli: &Cli) -> Result<()> {
        let module = load_module(cli)?;
        let selected = select_functions(&module, &Some(args.function.clone()), cli);
        let func = &module.functions[selected[0]];

        if let Err(e) = func.validate() {
            Diagnostic::malformed_function(&func.name, &e.to_string()).fail(json_mode(cli));
        }
        let graph = crate::cfg::build_cfg(func);

        match args.format {
            CfgFormat::Dot => println!("{}", crate::cfg::export_dot(func, &graph)),
            CfgFormat::Json => {
                let export = crate::cfg::export_json(func, &graph);
                if json_mode(cli) {
                    emit_json(cli, &export);
                } else {
                    println!("{}", serde_json::to_string_pretty(&export)?);
                }
            }
            CfgFormat::Human => {
                use crate::cfg::analysis::{is_branch_point, is_merge_point};

                output::headline(&func.name);
                for (id, block) in func.blocks.iter().enumerate() {
                    let succs = block
                        .terminator
                        .successors()
                        .iter()
                        .map(|s| s.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut notes = Vec::new();
                    if is_branch_point(&graph, crate::cfg::node(id)) {
                        notes.push("branch");
                    }
                    if is_merge_point(&graph, crate::cfg::node(id)) {
                        notes.push("merge");
                    }
                    let notes = if notes.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", notes.join(", "))
                    };
                    println!(
                        "block {}: {} instruction(s), successors [{}]{}",
                        id,
                        block.instructions.len(),
                        succs,
                        notes
                    );
                }
            }
        }
        Ok(())
    }
}
