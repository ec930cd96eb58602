//! MergePort command-line merge tool.
//!
//! Provides subcommands for inspecting the remote merge queue, running the
//! merge pipeline for a descriptor with interactive conflict handling, and
//! managing descriptor status (ignore, cancel, requeue).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use console::style;
use dialoguer::Select;
use tracing_subscriber::EnvFilter;

use mergeport_core::config::AppConfig;
use mergeport_core::descriptor::{parser, MergeDescriptor, QueueEntry, Status};
use mergeport_core::errors::QueueError;
use mergeport_core::git::GitClient;
use mergeport_core::lookup::LookupStore;
use mergeport_core::pipeline::git::GitMergePipeline;
use mergeport_core::pipeline::svn::SvnMergePipeline;
use mergeport_core::pipeline::workingcopy::ResolutionSpan;
use mergeport_core::pipeline::{
    Decision, DecisionContext, DecisionHandler, MergeOutcome, NoProgress,
};
use mergeport_core::queue::{transition, FsQueue, QueueFolder, RemoteQueue};
use mergeport_core::resolve::RenameResolver;
use mergeport_core::svn::SvnClient;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// MergePort command-line merge tool.
#[derive(Parser, Debug)]
#[command(
    name = "mergeport",
    version,
    about = "Propagate changes between branches via the merge queue"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/mergeport/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List pending merge descriptors.
    List,

    /// Show one descriptor in detail.
    Show {
        /// Descriptor id (file name in the queue).
        id: String,
    },

    /// Run the merge pipeline for a pending descriptor.
    Merge {
        /// Descriptor id (file name in the queue).
        id: String,
    },

    /// Move a pending descriptor to Ignored.
    Ignore {
        /// Descriptor id.
        id: String,
    },

    /// Move a pending descriptor to Cancelled.
    Cancel {
        /// Descriptor id.
        id: String,
    },

    /// Move an ignored descriptor back to the pending queue.
    Requeue {
        /// Descriptor id.
        id: String,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./mergeport.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Quiet by default; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        _ => {
            let config = load_config(&cli.config)?;
            let queue = FsQueue::open(&config.queue.root)
                .context("failed to open the merge queue")?;

            match cli.command {
                Commands::List => cmd_list(&queue).await,
                Commands::Show { id } => cmd_show(&queue, &id).await,
                Commands::Merge { id } => cmd_merge(&config, &queue, &id).await,
                Commands::Ignore { id } => {
                    cmd_transition(&queue, &id, QueueFolder::Todo, Status::Ignored).await
                }
                Commands::Cancel { id } => {
                    cmd_transition(&queue, &id, QueueFolder::Todo, Status::Cancelled).await
                }
                Commands::Requeue { id } => {
                    cmd_transition(&queue, &id, QueueFolder::Ignored, Status::Pending).await
                }
                _ => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_lookup(config: &AppConfig) -> Option<LookupStore> {
    if config.lookup.db_path.is_empty() {
        return None;
    }
    match LookupStore::open(&config.lookup.db_path) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!(
                "{} lookup store unavailable ({}), merging without rename resolution",
                style("Warning:").yellow(),
                e
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Queue helpers
// ---------------------------------------------------------------------------

/// Locate a descriptor by id, searching every queue folder.
async fn find_descriptor(queue: &FsQueue, id: &str) -> Result<(QueueFolder, Vec<u8>)> {
    for folder in QueueFolder::ALL {
        match queue.fetch(folder, id).await {
            Ok(bytes) => return Ok((folder, bytes)),
            Err(QueueError::NotFound { .. }) => continue,
            Err(e) => return Err(e).context("failed to read the merge queue"),
        }
    }
    bail!("descriptor '{}' not found in any queue folder", id);
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_list(queue: &FsQueue) -> Result<()> {
    let ids = queue
        .list(QueueFolder::Todo)
        .await
        .context("failed to list the pending queue")?;
    if ids.is_empty() {
        println!("{}", style("No pending merges").green());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Kind", "Change", "Created"]);

    for id in &ids {
        let bytes = queue.fetch(QueueFolder::Todo, id).await?;
        match parser::parse(id, &bytes) {
            Ok(descriptor) => {
                let (kind, created) = match &descriptor {
                    MergeDescriptor::Svn(d) => ("svn", d.created_at),
                    MergeDescriptor::Git(d) => ("git", d.created_at),
                };
                table.add_row(vec![
                    Cell::new(id),
                    Cell::new(kind),
                    Cell::new(descriptor.summary()),
                    Cell::new(created.format("%Y-%m-%d %H:%M").to_string()),
                ]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(id),
                    Cell::new("?").fg(comfy_table::Color::Red),
                    Cell::new(format!("unparsable: {}", e)),
                    Cell::new(""),
                ]);
            }
        }
    }

    println!("{}", table);
    Ok(())
}

async fn cmd_show(queue: &FsQueue, id: &str) -> Result<()> {
    let (folder, bytes) = find_descriptor(queue, id).await?;
    let descriptor =
        parser::parse(id, &bytes).context("descriptor could not be parsed")?;

    println!("Id            : {}", id);
    println!("Queue folder  : {}", folder);
    match &descriptor {
        MergeDescriptor::Svn(d) => {
            println!("Kind          : svn revision range");
            println!("Repository    : {} on {}", d.repository, d.host);
            println!("Source branch : {}", d.source_branch);
            println!("Target branch : {}", d.routing.target_branch());
            println!("Revisions     : {}:{}", d.revision_start, d.revision_end);
            println!("Created       : {}", d.created_at);
            println!("Files         :");
            for f in &d.files {
                if f.source_path == f.target_path {
                    println!("  {} {}", f.action, f.source_path);
                } else {
                    println!("  {} {} > {}", f.action, f.source_path, f.target_path);
                }
            }
        }
        MergeDescriptor::Git(d) => {
            println!("Kind          : git commit");
            println!("Repository    : {}", d.url);
            println!("Commit        : {}", d.commit_id);
            println!("Source branch : {}", d.source_branch);
            println!("Target branch : {}", d.routing.target_branch());
            println!("Created       : {}", d.created_at);
            println!("Files         :");
            for f in &d.files {
                println!("  {} {}", f.action, f.source_path);
            }
        }
    }
    Ok(())
}

async fn cmd_merge(config: &AppConfig, queue: &FsQueue, id: &str) -> Result<()> {
    let (folder, bytes) = find_descriptor(queue, id).await?;
    if folder != QueueFolder::Todo {
        bail!(
            "descriptor '{}' is in {}; only pending descriptors can be merged",
            id,
            folder
        );
    }
    let mut descriptor =
        parser::parse(id, &bytes).context("descriptor could not be parsed")?;
    *descriptor.entry_mut() = QueueEntry::restored(id, Status::for_folder(folder));

    println!(
        "Merging {} ({})",
        style(id).bold(),
        descriptor.summary()
    );

    let handler = InteractiveHandler;
    let outcome = match &mut descriptor {
        MergeDescriptor::Svn(d) => {
            let resolver = RenameResolver::new(open_lookup(config));
            let svn = SvnClient::new(
                config.svn.username.clone(),
                config.svn.password.clone().unwrap_or_default(),
            );
            let span =
                ResolutionSpan::from_config(config, &d.source_branch, d.routing.target_branch());
            let pipeline = SvnMergePipeline::new(
                &svn,
                queue,
                &resolver,
                &handler,
                &NoProgress,
                config.general.data_dir.clone(),
                config.svn.interfering_process.clone(),
            );
            pipeline.run(d, &span).await?
        }
        MergeDescriptor::Git(d) => {
            let clone_path = config.git.clones_dir.join(clone_dir_name(&d.url));
            let git = GitClient::open_or_clone(
                &d.url,
                &clone_path,
                &config.git.remote,
                config.git.token.as_deref(),
            )
            .context("failed to open or clone the git repository")?;
            let pipeline = GitMergePipeline::new(
                &git,
                queue,
                &handler,
                &NoProgress,
                config.general.data_dir.clone(),
            );
            pipeline.run(d).await?
        }
    };

    match outcome {
        MergeOutcome::Committed { revision, commit_id } => {
            let what = match (revision, commit_id) {
                (Some(rev), _) => format!("revision {}", rev),
                (_, Some(sha)) => format!("commit {}", &sha[..sha.len().min(8)]),
                _ => "change".to_string(),
            };
            println!("{} merged as {}", style("Done:").green().bold(), what);
        }
        MergeOutcome::Cancelled => {
            println!("{} merge cancelled", style("Cancelled:").yellow().bold());
        }
    }
    Ok(())
}

async fn cmd_transition(
    queue: &FsQueue,
    id: &str,
    expected: QueueFolder,
    to: Status,
) -> Result<()> {
    let (folder, _) = find_descriptor(queue, id).await?;
    if folder != expected {
        bail!("descriptor '{}' is in {}, expected {}", id, folder, expected);
    }
    let mut entry = QueueEntry::restored(id, Status::for_folder(folder));
    transition(queue, &mut entry, to)
        .await
        .context("queue transition failed")?;
    println!("{} {} -> {}", style("Moved").green(), id, to);
    Ok(())
}

fn cmd_init(output: &PathBuf) -> Result<()> {
    if output.exists() {
        bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, AppConfig::default_toml()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your queue, SVN and Git details");
    println!("  2. Set the referenced environment variables (SVN_PASSWORD, ...)");
    println!(
        "  3. Validate with: mergeport validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Env var resolution is non-fatal here; the summary shows what is set.
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Queue root    : {}", config.queue.root.display());
    println!("  SVN user      : {}", config.svn.username);
    println!(
        "  SVN password  : {}",
        if config.svn.password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Git clones    : {}", config.git.clones_dir.display());
    println!(
        "  Git token     : {}",
        if config.git.token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!(
        "  Lookup store  : {}",
        if config.lookup.db_path.is_empty() {
            "none (resolution disabled)"
        } else {
            &config.lookup.db_path
        }
    );
    println!("  Data directory: {}", config.general.data_dir.display());
    println!("  Branch table  : {} entries", config.branches.len());
    println!();
    println!("Configuration is valid.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Interactive decision handling
// ---------------------------------------------------------------------------

/// Decision handler backed by terminal prompts.
struct InteractiveHandler;

impl DecisionHandler for InteractiveHandler {
    fn decide(&self, context: &DecisionContext<'_>) -> Decision {
        match context {
            DecisionContext::StageError { stage, error } => {
                println!();
                println!("{} {}", style("Stage failed:").red().bold(), stage);
                println!("  {}", error);
                prompt(
                    &[
                        "Retry the stage",
                        "Revert local changes and retry",
                        "Cancel the merge",
                    ],
                    &[Decision::Retry, Decision::RevertAndRetry, Decision::Cancel],
                )
            }
            DecisionContext::Conflicts { paths, location } => {
                println!();
                println!(
                    "{}",
                    style(format!(
                        "{} conflicting file(s) in {}",
                        paths.len(),
                        location.display()
                    ))
                    .yellow()
                    .bold()
                );
                for path in paths.iter() {
                    println!("  {}", path);
                }
                prompt(
                    &[
                        "Re-check after resolving manually",
                        "Open the working copy",
                        "Revert local changes and retry",
                        "Cancel the merge",
                    ],
                    &[
                        Decision::Retry,
                        Decision::OpenLocation,
                        Decision::RevertAndRetry,
                        Decision::Cancel,
                    ],
                )
            }
            DecisionContext::MissingFiles { paths } => {
                println!();
                println!(
                    "{}",
                    style(format!(
                        "{} required file(s) are absent from the target branch",
                        paths.len()
                    ))
                    .yellow()
                    .bold()
                );
                for path in paths.iter() {
                    println!("  {}", path);
                }
                println!("These must be merged manually if you continue.");
                prompt(
                    &["Continue without them", "Cancel the merge"],
                    &[Decision::Retry, Decision::Cancel],
                )
            }
        }
    }
}

/// Prompt for one of `items`; a closed prompt (EOF, ctrl-c) cancels.
fn prompt(items: &[&str], decisions: &[Decision]) -> Decision {
    match Select::new()
        .with_prompt("How should this proceed?")
        .items(items)
        .default(0)
        .interact()
    {
        Ok(index) => decisions[index],
        Err(_) => Decision::Cancel,
    }
}

fn clone_dir_name(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("repo");
    last.trim_end_matches(".git").to_string()
}
