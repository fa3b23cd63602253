use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use courier_engine::{
    ExecutionPipeline, RunOutcome, apply_variables, load_request_file, load_variables_file, merge_scope, normalize,
    save_variables_file,
};
use courier_types::{AgentKind, DerivedRequest, ExecutionResponse, VariablePrecedence, VariableScope, Variables};
use courier_util::{
    EngineSettings, expand_tilde,
    http::{is_json_content_type, parse_response_json},
    redact_header_value, redact_sensitive,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    let mut settings = EngineSettings::load().context("load settings")?;
    if let Some(precedence) = matches.get_one::<String>("precedence") {
        settings.variable_precedence = parse_precedence(precedence)?;
    }

    match matches.subcommand() {
        Some(("run", sub)) => run_request(&settings, sub).await,
        Some(("resolve", sub)) => resolve_request(&settings, sub),
        _ => bail!("expected a subcommand; try --help"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let request_args = [
        Arg::new("request")
            .required(true)
            .action(ArgAction::Set)
            .help("Path to a request template (YAML or JSON)"),
        Arg::new("workspace")
            .long("workspace")
            .short('w')
            .action(ArgAction::Set)
            .help("Workspace variables file"),
        Arg::new("collection")
            .long("collection")
            .short('c')
            .action(ArgAction::Set)
            .help("Collection variables file"),
    ];

    Command::new("courier")
        .about("Run API requests with scoped variables and script hooks")
        .subcommand_required(true)
        .arg(
            Arg::new("precedence")
                .long("precedence")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(["collection", "workspace"])
                .help("Which variable layer wins on key collisions"),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a request and print the response")
                .args(request_args.clone())
                .arg(
                    Arg::new("agent")
                        .long("agent")
                        .action(ArgAction::Set)
                        .default_value("desktop")
                        .help("Transport agent: desktop, extension, proxy or web"),
                )
                .arg(
                    Arg::new("write-variables")
                        .long("write-variables")
                        .action(ArgAction::SetTrue)
                        .help("Persist script-updated variables back to the variable files"),
                )
                .arg(
                    Arg::new("body")
                        .long("body")
                        .action(ArgAction::SetTrue)
                        .help("Print only the response body"),
                ),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the normalized request without sending it (scripts are not run)")
                .args(request_args),
        )
}

fn parse_precedence(value: &str) -> Result<VariablePrecedence> {
    match value {
        "collection" => Ok(VariablePrecedence::CollectionOverWorkspace),
        "workspace" => Ok(VariablePrecedence::WorkspaceOverCollection),
        other => bail!("unknown precedence '{other}'"),
    }
}

fn path_arg(matches: &ArgMatches, name: &str) -> Option<PathBuf> {
    matches.get_one::<String>(name).map(|path| expand_tilde(path))
}

fn load_layer(path: Option<&PathBuf>) -> Result<Variables> {
    match path {
        Some(path) => load_variables_file(path),
        None => Ok(Variables::new()),
    }
}

async fn run_request(settings: &EngineSettings, matches: &ArgMatches) -> Result<()> {
    let request_path = path_arg(matches, "request").context("request path is required")?;
    let workspace_path = path_arg(matches, "workspace");
    let collection_path = path_arg(matches, "collection");
    let agent: AgentKind = matches
        .get_one::<String>("agent")
        .map(|value| value.parse::<AgentKind>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();

    let request = load_request_file(&request_path)?;
    let scope = VariableScope::new(load_layer(workspace_path.as_ref())?, load_layer(collection_path.as_ref())?);
    let pipeline = Arc::new(ExecutionPipeline::from_settings(settings)?);

    let mut run = {
        let pipeline = pipeline.clone();
        let request = request.clone();
        tokio::spawn(async move { pipeline.execute(&request, scope, agent).await })
    };

    let outcome = tokio::select! {
        outcome = &mut run => outcome.context("request task failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!(request_id = %request.ref_id(), "interrupt received; cancelling request");
            // A second execute while running is the cancel path.
            pipeline.execute(&request, VariableScope::default(), agent).await;
            run.await.context("request task failed")?
        }
    };

    let (response, variables) = match outcome {
        RunOutcome::Completed { response, variables } => (response, variables),
        RunOutcome::Cancelled { .. } | RunOutcome::Superseded => bail!("request cancelled"),
    };
    info!(request_id = %request.ref_id(), status = response.status_code(), "request finished");

    if matches.get_flag("write-variables") {
        if let Some(path) = &workspace_path {
            save_variables_file(path, &variables.workspace)?;
        }
        if let Some(path) = &collection_path {
            save_variables_file(path, &variables.collection)?;
        }
    }

    if matches.get_flag("body") {
        print_body(&response)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    if response.error_value().is_some() {
        bail!("request failed");
    }
    Ok(())
}

fn print_body(response: &ExecutionResponse) -> Result<()> {
    let Some(transport) = response.transport() else {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    };
    let is_json = transport
        .headers
        .iter()
        .any(|(name, value)| name.eq_ignore_ascii_case("content-type") && is_json_content_type(value));
    match parse_response_json(&transport.body).filter(|_| is_json) {
        Some(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        None => println!("{}", transport.body),
    }
    Ok(())
}

fn resolve_request(settings: &EngineSettings, matches: &ArgMatches) -> Result<()> {
    let request_path = path_arg(matches, "request").context("request path is required")?;
    let request = load_request_file(&request_path)?;
    let scope = VariableScope::new(
        load_layer(path_arg(matches, "workspace").as_ref())?,
        load_layer(path_arg(matches, "collection").as_ref())?,
    );

    let merged = merge_scope(&scope, settings.variable_precedence);
    let resolved = apply_variables(&request, &merged);
    let mut payload = normalize(&resolved, &DerivedRequest::default(), request.ref_id())?;

    payload.url = redact_sensitive(&payload.url);
    for (name, value) in payload.headers.iter_mut() {
        *value = redact_header_value(name, value);
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
