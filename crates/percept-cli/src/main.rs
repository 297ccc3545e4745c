use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use percept_client::{
    ClientConfig, ExperimentClient, ExperimentResponse, ExportFormat, FetchOptions,
    HttpTransport, InterspersalRequest, IntersperseMode, LogNotifier, Notifier, PerceptError,
    RecordingNotifier, ResultSet, SessionState, SubmitOptions, SubmitOutcome, TrialBlock,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "percept", version = "0.3.0", about = "Experiment server client")]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    #[value(name = "csv")]
    Csv,
    #[value(name = "json")]
    Json,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    #[value(name = "centered")]
    Centered,
    #[value(name = "edge")]
    Edge,
}

impl From<ModeArg> for IntersperseMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Centered => IntersperseMode::Centered,
            ModeArg::Edge => IntersperseMode::Edge,
        }
    }
}

#[derive(Args, Clone)]
struct ConnectArgs {
    #[arg(long, default_value = "percept.yaml")]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    sandbox: bool,
}

#[derive(Subcommand)]
enum Commands {
    Init {
        #[arg(long, default_value = "percept.yaml")]
        config: PathBuf,
        #[arg(long)]
        force: bool,
    },
    Describe {
        #[arg(long, default_value = "percept.yaml")]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Request {
        #[command(flatten)]
        connect: ConnectArgs,
        #[arg(long)]
        version: Option<String>,
        #[arg(long = "override")]
        override_file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Submit {
        #[command(flatten)]
        connect: ConnectArgs,
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        version: Option<String>,
        #[arg(long = "override")]
        override_file: Option<PathBuf>,
        #[arg(long)]
        extra: Option<PathBuf>,
        #[arg(long)]
        incomplete: bool,
        #[arg(long)]
        previous: Option<String>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Unpack {
        #[arg(long)]
        timeline: PathBuf,
        #[arg(long = "practice-set")]
        practice_set: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    Intersperse {
        #[arg(long)]
        timeline: PathBuf,
        #[arg(long)]
        trial: PathBuf,
        #[arg(long)]
        reps: usize,
        #[arg(long, value_enum, default_value = "centered")]
        mode: ModeArg,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<PerceptError>()
                    .map(|e| e.code())
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Init { config, force } => {
            if !force && config.exists() {
                return Err(anyhow::anyhow!(format!(
                    "config file already exists (use --force): {}",
                    config.display()
                )));
            }
            if let Some(parent) = config.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config, percept_client::CONFIG_TEMPLATE)?;
            println!("wrote: {}", config.display());
            println!(
                "next: edit {} and fill in the fields marked REQUIRED",
                config.display()
            );
            println!("next: percept describe --config {}", config.display());
        }
        Commands::Describe { config, json } => {
            let cfg = ClientConfig::load(&config)?;
            let session = SessionState::initialized(cfg.session_init())?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": describe_to_json(&cfg, &session)
                })));
            }
            print_describe(&cfg, &session);
        }
        Commands::Request {
            connect,
            version,
            override_file,
            json,
        } => {
            let cfg = load_config(&connect)?;
            let options = FetchOptions {
                version,
                override_payload: read_optional(override_file.as_deref())?,
            };
            if json {
                let mut client = ExperimentClient::from_config(&cfg, RecordingNotifier::default())?;
                let resp = client.fetch_configuration(&options)?;
                let notices = client.notifier_mut().take();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "request",
                    "response": resp,
                    "notices": notices
                })));
            }
            let mut client = ExperimentClient::from_config(&cfg, LogNotifier)?;
            let resp = client.fetch_configuration(&options)?;
            print_response(&resp);
        }
        Commands::Submit {
            connect,
            data,
            version,
            override_file,
            extra,
            incomplete,
            previous,
            format,
            out,
            json,
        } => {
            let cfg = load_config(&connect)?;
            let fetch = FetchOptions {
                version,
                override_payload: read_optional(override_file.as_deref())?,
            };
            let records = match load_json_file(&data)? {
                Value::Array(items) => items,
                other => {
                    return Err(anyhow::anyhow!(format!(
                        "results file must hold a JSON array, found {}",
                        value_type_name(&other)
                    )))
                }
            };
            let submit = SubmitOptions {
                data: ResultSet::new(records),
                to_save: extra.as_deref().map(load_json_file).transpose()?,
                complete: Some(!incomplete),
                previous: previous.as_deref().map(parse_loose_value),
                format: format.map(Into::into),
            };
            if json {
                let mut client = ExperimentClient::from_config(&cfg, RecordingNotifier::default())?;
                let outcome = fetch_and_submit(&mut client, &fetch, submit)?;
                let written = write_export(&outcome, out.as_deref())?;
                let notices = client.notifier_mut().take();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit",
                    "outcome": outcome_to_json(&outcome, written.as_deref()),
                    "notices": notices
                })));
            }
            let mut client = ExperimentClient::from_config(&cfg, LogNotifier)?;
            let outcome = fetch_and_submit(&mut client, &fetch, submit)?;
            let written = write_export(&outcome, out.as_deref())?;
            match &outcome {
                SubmitOutcome::Saved { message, .. } => println!("saved: {}", message),
                SubmitOutcome::Exported { format, .. } => {
                    println!("sandbox: nothing sent");
                    println!("format: {}", format);
                }
            }
            if let Some(path) = written {
                println!("export: {}", path.display());
            }
        }
        Commands::Unpack {
            timeline,
            practice_set,
            json,
        } => {
            let blocks = load_timeline(&timeline)?;
            let bindings = parse_set_bindings(&practice_set)?;
            let out = percept_client::unpack(
                &blocks,
                Some(|practice: &mut TrialBlock| {
                    if let Value::Object(map) = practice.as_value_mut() {
                        for (k, v) in &bindings {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }),
            );
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "unpack",
                    "input_len": blocks.len(),
                    "timeline": out
                })));
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Intersperse {
            timeline,
            trial,
            reps,
            mode,
            json,
        } => {
            let request = InterspersalRequest {
                trial: TrialBlock::new(load_json_file(&trial)?),
                reps,
                timeline: load_timeline(&timeline)?,
                mode: mode.into(),
            };
            let out = percept_client::intersperse(&request)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "intersperse",
                    "mode": request.mode.as_str(),
                    "reps": reps,
                    "timeline": out
                })));
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(None)
}

fn fetch_and_submit<N: Notifier>(
    client: &mut ExperimentClient<HttpTransport, N>,
    fetch: &FetchOptions,
    submit: SubmitOptions,
) -> Result<SubmitOutcome> {
    client.fetch_configuration(fetch)?;
    Ok(client.submit_results(submit)?)
}

fn load_config(connect: &ConnectArgs) -> Result<ClientConfig> {
    let mut cfg = ClientConfig::load(&connect.config)?;
    if let Some(url) = &connect.server_url {
        cfg.server_url = url.clone();
    }
    if connect.sandbox {
        cfg.sandbox = true;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn load_json_file(path: &Path) -> Result<Value> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&data)?)
}

fn load_timeline(path: &Path) -> Result<Vec<TrialBlock>> {
    match load_json_file(path)? {
        Value::Array(items) => Ok(items.into_iter().map(TrialBlock::new).collect()),
        other => Err(anyhow::anyhow!(format!(
            "timeline file must hold a JSON array, found {}",
            value_type_name(&other)
        ))),
    }
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(p) => Ok(Some(std::fs::read_to_string(p)?)),
        None => Ok(None),
    }
}

fn write_export(outcome: &SubmitOutcome, out: Option<&Path>) -> Result<Option<PathBuf>> {
    let (format, body) = match outcome {
        SubmitOutcome::Exported { format, body, .. } => (*format, body),
        SubmitOutcome::Saved { .. } => return Ok(None),
    };
    let path = match out {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(format!(
            "percept_export_{}.{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            format.extension()
        )),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, body)?;
    tracing::info!(path = %path.display(), format = %format, "sandbox export written");
    Ok(Some(path))
}

fn parse_loose_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw).unwrap_or(Value::String(raw.to_string()))
}

fn parse_set_bindings(values: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for raw in values {
        let (key, val_raw) = raw.split_once('=').ok_or_else(|| {
            anyhow::anyhow!(format!("invalid --practice-set '{}': expected k=v", raw))
        })?;
        if key.trim().is_empty() {
            return Err(anyhow::anyhow!(format!(
                "invalid --practice-set '{}': key cannot be empty",
                raw
            )));
        }
        out.insert(key.to_string(), parse_loose_value(val_raw));
    }
    Ok(out)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Describe { json, .. }
        | Commands::Request { json, .. }
        | Commands::Submit { json, .. }
        | Commands::Unpack { json, .. }
        | Commands::Intersperse { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn outcome_to_json(outcome: &SubmitOutcome, written: Option<&Path>) -> Value {
    match outcome {
        SubmitOutcome::Saved { message, meta } => json!({
            "sent": true,
            "message": message,
            "meta": meta
        }),
        SubmitOutcome::Exported { format, meta, .. } => json!({
            "sent": false,
            "format": format.as_str(),
            "export_path": written.map(|p| p.display().to_string()),
            "meta": meta
        }),
    }
}

fn describe_to_json(cfg: &ClientConfig, session: &SessionState) -> Value {
    json!({
        "label": session.label(),
        "server_url": cfg.server_url,
        "url_prefix": session.url_prefix(),
        "sandbox": session.is_sandbox(),
        "version": cfg.version,
        "timeout_secs": cfg.timeout_secs,
        "export_format": cfg.export_format.as_str(),
        "completion": session.completion(),
        "total_completions": session.total_completions()
    })
}

fn print_describe(cfg: &ClientConfig, session: &SessionState) {
    println!("label: {}", session.label());
    println!("server_url: {}", cfg.server_url);
    println!("url_prefix: {}", session.url_prefix());
    println!("sandbox: {}", session.is_sandbox());
    println!("version: {}", cfg.version.as_deref().unwrap_or("final"));
    println!("timeout_secs: {}", cfg.timeout_secs);
    println!("export_format: {}", cfg.export_format);
    println!("total_completions: {}", session.total_completions());
    for (name, count) in session.completion() {
        println!("completed[{}]: {}", name, count);
    }
}

fn print_response(resp: &ExperimentResponse) {
    println!("name: {}", resp.name);
    println!("subject: {}", resp.subject);
    println!("current_exp: {}", resp.current_exp);
    println!("exp_id: {}", resp.exp_id);
    println!("trials: {}", resp.timeline.len());
    let practice = resp.timeline.iter().filter(|b| b.is_practice()).count();
    println!("practice_blocks: {}", practice);
}
