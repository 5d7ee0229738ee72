use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snap2snomed::api::{MappingApi, Snap2SnomedClient};
use snap2snomed::auth::{IdTokenClaims, OAuthClient, SessionStore, SessionTokenProvider};
use snap2snomed::config::{config, Snap2SnomedConfig};
use snap2snomed::import::{parse_source_file, ImportOptions, ImportedCodeSet};
use snap2snomed::mapping::{
    available_status_options, is_status_option_disabled_raw, ExportFormat, MapViewFilter,
    MappingRowView, MappingStatus, Role,
};
use snap2snomed::observability::{api_metrics, OperationTimer};
use snap2snomed::shutdown::{cancel_on_ctrl_c, CancellationToken};
use snap2snomed::telemetry::{generate_correlation_id, init_telemetry};
use snap2snomed::workflow::{MappingStore, ViewSource, WorkflowError};

#[derive(Parser)]
#[command(name = "snap2snomed")]
#[command(version)]
#[command(about = "Map local code systems to SNOMED CT from the command line")]
#[command(long_about = "Snap2SNOMED curator tooling: sign in, browse and update mapping rows, \
                       run automap over a task and move source code systems and maps in and out \
                       of the mapping service.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hosted login URL to open in a browser
    LoginUrl,
    /// Finish login with the authorization code from the redirect
    Login {
        #[arg(long, help = "Authorization code returned to the redirect URI")]
        code: String,
    },
    /// Forget the cached tokens
    Logout,
    /// Show who the cached session belongs to
    Whoami,
    /// List the status options a role may choose for a row
    Options {
        #[arg(long, help = "Task role: AUTHOR or REVIEW")]
        role: String,
        #[arg(long, help = "Current row status")]
        status: String,
    },
    /// List mapping rows of a map or a task
    Rows {
        #[arg(long)]
        map_id: u64,
        #[arg(long, help = "Show the rows of this task instead of the whole map")]
        task_id: Option<u64>,
        #[arg(long, default_value = "0")]
        page: u32,
        #[arg(long, default_value = "20")]
        size: u32,
        #[arg(long = "status", help = "Only rows with this status (repeatable)")]
        statuses: Vec<MappingStatus>,
        #[arg(long)]
        source_code: Option<String>,
    },
    /// Change the status of one row within a task
    SetStatus {
        #[arg(long)]
        map_id: u64,
        #[arg(long)]
        task_id: u64,
        #[arg(long)]
        row_id: u64,
        #[arg(long)]
        status: MappingStatus,
    },
    /// Suggest targets for every unmapped row of an author task
    Automap {
        #[arg(long)]
        map_id: u64,
        #[arg(long)]
        task_id: u64,
    },
    /// Upload a source code system from a CSV or TSV file
    Import {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, help = "Field delimiter; defaults to tab for .tsv/.txt and comma otherwise")]
        delimiter: Option<char>,
        #[arg(long, help = "The first line holds data, not column names")]
        no_header: bool,
        #[arg(long, default_value = "1", help = "1-based column holding the code")]
        code_column: usize,
        #[arg(long, default_value = "2", help = "1-based column holding the display")]
        display_column: usize,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
    },
    /// Download a map as CSV, TSV or XLSX
    Export {
        #[arg(long)]
        map_id: u64,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = Snap2SnomedConfig::load_env_file();
    let config = config()?;
    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::LoginUrl => login_url_command(config),
            Commands::Login { code } => login_command(config, &code).await,
            Commands::Logout => logout_command(config),
            Commands::Whoami => whoami_command(config).await,
            Commands::Options { role, status } => options_command(&role, &status),
            Commands::Rows {
                map_id,
                task_id,
                page,
                size,
                statuses,
                source_code,
            } => {
                let filter = MapViewFilter {
                    page,
                    size,
                    status: statuses,
                    source_code,
                    ..Default::default()
                };
                rows_command(config, map_id, task_id, filter).await
            }
            Commands::SetStatus {
                map_id,
                task_id,
                row_id,
                status,
            } => set_status_command(config, map_id, task_id, row_id, status).await,
            Commands::Automap { map_id, task_id } => automap_command(config, map_id, task_id).await,
            Commands::Import {
                file,
                delimiter,
                no_header,
                code_column,
                display_column,
                name,
                version,
            } => {
                let delimiter = match delimiter {
                    Some(c) if c.is_ascii() => c as u8,
                    Some(c) => bail!("Delimiter must be a single ASCII character, got {c:?}"),
                    None => ImportOptions::delimiter_for_path(&file),
                };
                let options = ImportOptions {
                    delimiter,
                    has_header: !no_header,
                    code_column,
                    display_column,
                };
                import_command(config, &file, &options, name, version).await
            }
            Commands::Export {
                map_id,
                format,
                out,
            } => export_command(config, map_id, format, out).await,
        }
    });

    api_metrics().log_stats();
    result
}

fn session_store(config: &Snap2SnomedConfig) -> SessionStore {
    SessionStore::new(&config.auth.session_file)
}

fn api_client(config: &Snap2SnomedConfig) -> Result<Arc<Snap2SnomedClient>> {
    let oauth = OAuthClient::new(&config.auth)?;
    let tokens = Arc::new(SessionTokenProvider::new(session_store(config), oauth));
    Ok(Arc::new(Snap2SnomedClient::new(&config.api, tokens)?))
}

fn login_url_command(config: &Snap2SnomedConfig) -> Result<()> {
    let oauth = OAuthClient::new(&config.auth)?;
    let state = generate_correlation_id();
    println!("🔑 Open this URL in a browser to sign in:");
    println!();
    println!("   {}", oauth.authorize_url(&state)?);
    println!();
    println!("Then run: snap2snomed login --code <code from the redirect>");
    Ok(())
}

async fn login_command(config: &Snap2SnomedConfig, code: &str) -> Result<()> {
    let oauth = OAuthClient::new(&config.auth)?;
    let tokens = oauth.exchange_code(code).await?;
    let claims = IdTokenClaims::decode(&tokens.id_token)?;
    session_store(config).store_tokens(tokens)?;
    println!(
        "✅ Signed in as {}",
        claims.email.as_deref().unwrap_or(&claims.sub)
    );
    Ok(())
}

fn logout_command(config: &Snap2SnomedConfig) -> Result<()> {
    session_store(config).clear()?;
    println!("👋 Signed out");
    Ok(())
}

async fn whoami_command(config: &Snap2SnomedConfig) -> Result<()> {
    let store = session_store(config);
    let Some(tokens) = store.tokens()? else {
        println!("Not signed in. Run: snap2snomed login-url");
        return Ok(());
    };
    let claims = IdTokenClaims::decode(&tokens.id_token)?;
    println!("👤 {}", claims.email.as_deref().unwrap_or(&claims.sub));
    if claims.is_admin(&config.auth.admin_group) {
        println!("   Admin: yes");
    }
    println!("   Session valid until: {}", tokens.expires_at.to_rfc3339());

    match api_client(config)?.current_user().await {
        Ok(user) => println!("   Mapping service user id: {}", user.id),
        Err(e) => println!("   Mapping service check failed: {e}"),
    }
    Ok(())
}

fn options_command(role: &str, status: &str) -> Result<()> {
    println!("Status options for {role} at {status}:");
    for candidate in MappingStatus::ALL {
        let marker = if is_status_option_disabled_raw(role, status, candidate.as_str()) {
            "  "
        } else {
            "✔ "
        };
        println!("  {marker}{candidate}");
    }
    Ok(())
}

async fn task_store(
    api: Arc<Snap2SnomedClient>,
    map_id: u64,
    task_id: Option<u64>,
) -> Result<MappingStore<Snap2SnomedClient>> {
    let Some(task_id) = task_id else {
        return Ok(MappingStore::new(api, ViewSource::Map(map_id), None));
    };
    let task = api.task(task_id).await?;
    if task.map_id != map_id {
        bail!("Task {task_id} belongs to map {}, not map {map_id}", task.map_id);
    }
    Ok(MappingStore::new(
        api,
        ViewSource::Task { map_id, task_id },
        Some(task.role),
    ))
}

fn print_row(row: &MappingRowView) {
    let target = match (&row.live.target_code, &row.live.target_display) {
        (Some(code), Some(display)) => format!("{code} |{display}|"),
        (Some(code), None) => code.clone(),
        _ if row.live.no_map => "(no map)".to_string(),
        _ => "-".to_string(),
    };
    let relationship = row
        .live
        .relationship
        .map(|r| r.to_string())
        .unwrap_or_default();
    let flag = if row.live.flagged { " 🚩" } else { "" };
    println!(
        "{:>8}  {:<10} {:<16} {:<40} -> {} {}{}",
        row.row_id,
        row.status().as_str(),
        row.source_code,
        row.source_display,
        target,
        relationship,
        flag
    );
}

async fn rows_command(
    config: &Snap2SnomedConfig,
    map_id: u64,
    task_id: Option<u64>,
    filter: MapViewFilter,
) -> Result<()> {
    let mut store = task_store(api_client(config)?, map_id, task_id).await?;
    store.set_filter(filter).await?;

    let state = store.state();
    for row in &state.rows {
        print_row(row);
    }
    println!();
    println!(
        "Page {} of {} ({} rows)",
        state.page.number + 1,
        state.page.total_pages.max(1),
        state.page.total_elements
    );
    Ok(())
}

async fn set_status_command(
    config: &Snap2SnomedConfig,
    map_id: u64,
    task_id: u64,
    row_id: u64,
    status: MappingStatus,
) -> Result<()> {
    let mut store = task_store(api_client(config)?, map_id, Some(task_id)).await?;

    // Page through the task until the row is loaded.
    let mut filter = MapViewFilter {
        size: 200,
        ..Default::default()
    };
    loop {
        store.set_filter(filter.clone()).await?;
        if store.state().row(row_id).is_some() {
            break;
        }
        if filter.page + 1 >= store.state().page.total_pages {
            bail!("Row {row_id} is not part of task {task_id}");
        }
        filter.page += 1;
    }

    match store.change_status(row_id, status).await {
        Ok(()) => {
            println!("✅ Row {row_id} is now {status}");
            Ok(())
        }
        Err(WorkflowError::NotPermitted(reason)) => {
            println!("⛔ {reason}");
            if let (Some(role), Some(row)) = (store.state().role, store.state().row(row_id)) {
                let options = available_status_options(role, row.status());
                let options: Vec<_> = options.iter().map(|s| s.as_str()).collect();
                println!("   Allowed for {role}: {}", options.join(", "));
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn automap_command(config: &Snap2SnomedConfig, map_id: u64, task_id: u64) -> Result<()> {
    let mut store = task_store(api_client(config)?, map_id, Some(task_id)).await?;
    if store.state().role != Some(Role::Author) {
        bail!("Automap runs on author tasks only; task {task_id} is a review task");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel_on_ctrl_c(cancel.clone());
    let timer = OperationTimer::new("automap");
    println!("🤖 Automapping task {task_id} (Ctrl-C stops after in-flight rows)...");

    let report = store.automap(config.automap.clone(), cancel.clone()).await;
    timer.finish();
    cancel.cancel();
    interrupt.await??;

    let report = report?;
    println!();
    println!("✅ Matched:   {}", report.matched);
    println!("   Unmatched: {}", report.unmatched);
    println!("   Failed:    {}", report.failed);
    println!("   Skipped:   {}", report.skipped);
    if report.partial > 0 {
        println!(
            "⚠️  {} rows got a target but are still UNMAPPED; set them to DRAFT:",
            report.partial
        );
        for target in &report.pending_status {
            println!("   row {}", target.row_id);
        }
    }
    if report.cancelled {
        println!("⚠️  Cancelled; {} rows were not started", report.not_started);
    }
    Ok(())
}

async fn import_command(
    config: &Snap2SnomedConfig,
    file: &Path,
    options: &ImportOptions,
    name: String,
    version: String,
) -> Result<()> {
    let codes = parse_source_file(file, options)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    println!("📄 Read {} codes from {}", codes.len(), file.display());

    let code_set = ImportedCodeSet {
        name,
        version,
        codes,
    };
    let id = api_client(config)?.import_source(&code_set).await?;
    println!("✅ Imported {} {} as source {id}", code_set.name, code_set.version);
    Ok(())
}

async fn export_command(
    config: &Snap2SnomedConfig,
    map_id: u64,
    format: ExportFormat,
    out: Option<PathBuf>,
) -> Result<()> {
    let bytes = api_client(config)?.export(map_id, format).await?;
    let out = out.unwrap_or_else(|| PathBuf::from(format!("map-{map_id}.{}", format.extension())));
    tokio::fs::write(&out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!("✅ Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}
