use clap::Parser;
use std::path::PathBuf;

use mrfc::diag::Diagnostic;
use mrfc::eval::{EvalOptions, Value};
use mrfc::forms::Template;
use mrfc::pass::PassId;
use mrfc::pipeline::{self, CompilationState, PipelineOptions};
use mrfc::release::{LoggingReleaseManager, ReleaseManager};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TemplateArg {
    MapReduce,
    DistributeAggregate,
    Broadcast,
}

impl From<TemplateArg> for Template {
    fn from(t: TemplateArg) -> Self {
        match t {
            TemplateArg::MapReduce => Template::MapReduce,
            TemplateArg::DistributeAggregate => Template::DistributeAggregate,
            TemplateArg::Broadcast => Template::Broadcast,
        }
    }
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Placement tier of every node
    Tiers,
    /// The compiled form, slot by slot
    Form,
    /// Canonical JSON of the compiled form
    Json,
    /// The round rebuilt from the form
    Round,
    /// Run the round and its form on --state/--data
    Eval,
    /// Source hash and form fingerprint
    Provenance,
}

impl EmitStage {
    fn terminal(&self) -> PassId {
        match self {
            EmitStage::Tiers => PassId::Classify,
            EmitStage::Form | EmitStage::Json | EmitStage::Provenance => PassId::Validate,
            EmitStage::Round => PassId::Synthesize,
            EmitStage::Eval => PassId::Evaluate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "mrfc",
    version,
    about = "MapReduce form compiler: splits federated rounds into per-tier local blocks"
)]
struct Cli {
    /// Input .rir round source file
    source: PathBuf,

    /// Form to compile the round into
    #[arg(short, long, value_enum, default_value_t = TemplateArg::MapReduce)]
    template: TemplateArg,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Form)]
    emit: EmitStage,

    /// Initial server state literal (for --emit eval)
    #[arg(long)]
    state: Option<String>,

    /// Client data literal, one per participant (repeatable)
    #[arg(long)]
    data: Vec<String>,

    /// Participants accumulated together before merging (for --emit eval)
    #[arg(long, default_value_t = 2)]
    group_size: usize,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if cli.verbose {
        eprintln!("mrfc: source   = {}", cli.source.display());
        eprintln!("mrfc: template = {:?}", cli.template);
        eprintln!("mrfc: emit     = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mrfc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let file = cli.source.display().to_string();

    let parse_result = mrfc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            let d = Diagnostic::error(mrfc::diag::codes::E0100, err.to_string()).at(*err.span());
            eprintln!("{}", d.render(&file, &source));
        }
        std::process::exit(1);
    }
    let Some(program) = parse_result.expr else {
        eprintln!("mrfc: parse failed with no output");
        std::process::exit(1);
    };

    // ── Run passes ──
    let options = PipelineOptions {
        template: cli.template.into(),
        state: cli.state.clone(),
        data: cli.data.clone(),
        eval: EvalOptions {
            aggregation_group_size: cli.group_size.max(1),
        },
    };
    let mut state = CompilationState::new(program);
    let result = pipeline::run_pipeline(
        &mut state,
        cli.emit.terminal(),
        &options,
        cli.verbose,
        |_, diags| {
            for d in diags {
                eprintln!("{}", d.render(&file, &source));
            }
        },
    );
    if result.is_err() {
        std::process::exit(1);
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Tiers => {
            if let (Some(round), Some(tiers)) = (&state.round, &state.tiers) {
                print!("{}", tiers.render(round));
            }
        }
        EmitStage::Form => {
            if let Some(form) = &state.form {
                print!("{form}");
            }
        }
        EmitStage::Json => {
            if let Some(form) = &state.form {
                match form.canonical_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("mrfc: error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
        EmitStage::Round => {
            if let Some(round) = &state.synthesized {
                println!("{}", round.pretty());
            }
        }
        EmitStage::Eval => {
            if let Some(evaluation) = &state.evaluation {
                println!("{}", evaluation.result);
                if let Err(d) = release_outputs(&evaluation.result) {
                    eprintln!("{}", d.render(&file, &source));
                    std::process::exit(1);
                }
            }
        }
        EmitStage::Provenance => {
            let template = state.form.as_ref().map(|f| f.template());
            match pipeline::compute_provenance(&source, state.form.as_ref())
                .and_then(|p| p.to_json(template))
            {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("mrfc: error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Hand the server-side output of a round to the release manager.
fn release_outputs(result: &Value) -> Result<(), Diagnostic> {
    let mut manager = LoggingReleaseManager::new();
    let output = match result {
        Value::Tuple(parts) if parts.len() == 2 => &parts[1],
        other => other,
    };
    manager
        .release(output, None)
        .map_err(|e| Diagnostic::from(&e))
}
