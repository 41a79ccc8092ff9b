//! Strainer CLI - manage and run persisted data filters

mod config;
mod logging;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strainer_core::{
    ContextId, ExecutionContext, FilterDocument, FilterId, FilterRegistry, FilterSpec, GroupSpec,
    PersistableFilter, RuntimeEnvironment, Value,
};
use strainer_store::{Database, Lookup, SCHEMA_VERSION};

/// Output verbosity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn info(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }

    fn debug(self, msg: &str) {
        if matches!(self, Verbosity::Verbose) {
            println!("[debug] {msg}");
        }
    }

    /// Command results are printed even when quiet.
    fn result(self, msg: &str) {
        println!("{msg}");
    }
}

#[derive(Parser)]
#[command(name = "strainer")]
#[command(about = "Manage and run typed data filters", long_about = None)]
struct Cli {
    /// Verbose output (show debug info)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (only results and errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (default: ~/.config/strainer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Filter database (default: from config, else the user data directory)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Context id filters are stored in (default: 0, the site context)
    #[arg(long, global = true)]
    context: Option<i64>,

    /// Locale for localized settings when running filters
    #[arg(long, global = true)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered filter classes and their settings
    Classes,

    /// Create or upgrade the database schema
    Init,

    /// Install groups and filters from a document (json, yaml or toml)
    Install {
        /// Filter document
        document: PathBuf,
    },

    /// List filter groups
    Groups,

    /// List stored filters as trees
    List {
        /// Only filters in this group
        #[arg(long)]
        group: Option<String>,
        /// Only filters of this class
        #[arg(long)]
        class: Option<String>,
        /// Include template filters
        #[arg(long)]
        templates: bool,
    },

    /// Print one filter tree as a document
    Show {
        /// Root filter id
        id: i64,
        /// Output format: yaml, json or toml
        #[arg(long, default_value = "yaml")]
        format: String,
    },

    /// Execute a stored filter on a JSON input
    Run {
        /// Root filter id
        id: i64,
        /// Input value as JSON (e.g. '"  text "' or '[1, 2]')
        input: String,
    },

    /// Find stored filters that accept a sample input and output
    Compatible {
        /// Sample input as JSON
        input: String,
        /// Sample output as JSON
        output: String,
    },

    /// Delete a filter and all of its descendants
    Delete {
        /// Root filter id
        id: i64,
    },

    /// Report structural problems in the stored filter trees
    Check,
}

/// Settings resolved from config and flags.
struct Session {
    database: PathBuf,
    context_id: ContextId,
    locale: String,
    verbosity: Verbosity,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        Config::load_from_path(Some(path.clone()))
    } else {
        Config::load()
    };

    // Apply config defaults, CLI flags override
    let verbose = cli.verbose || config.defaults.verbose;
    let quiet = cli.quiet || config.defaults.quiet;
    let verbosity = Verbosity::from_flags(verbose, quiet);
    logging::init(config.defaults.log_level.as_deref(), verbosity)?;

    let mut registry = FilterRegistry::new();
    strainer_std::register_all(&mut registry);
    let registry = Arc::new(registry);

    let session = Session {
        database: cli.database.unwrap_or_else(|| config.database_path()),
        context_id: ContextId(cli.context.or(config.context).unwrap_or_default()),
        locale: cli
            .locale
            .or_else(|| config.locale.clone())
            .unwrap_or_else(|| "en".to_string()),
        verbosity,
    };
    let host = config.host.to_host()?;

    if let Commands::Classes = cli.command {
        return cmd_classes(&registry, verbosity);
    }

    let db = open_database(&session.database, registry)?.with_host(host);
    verbosity.debug(&format!(
        "database {} (context {}, host {})",
        session.database.display(),
        session.context_id,
        db.host().version
    ));

    match cli.command {
        Commands::Classes => Ok(()),
        Commands::Init => {
            verbosity.info(&format!(
                "Initialized {} (schema version {})",
                session.database.display(),
                SCHEMA_VERSION
            ));
            Ok(())
        }
        Commands::Install { document } => cmd_install(&db, &session, &document),
        Commands::Groups => cmd_groups(&db, verbosity),
        Commands::List {
            group,
            class,
            templates,
        } => cmd_list(&db, &session, group, class, templates),
        Commands::Show { id, format } => cmd_show(&db, FilterId(id), &format, verbosity),
        Commands::Run { id, input } => cmd_run(&db, &session, FilterId(id), &input),
        Commands::Compatible { input, output } => cmd_compatible(&db, &session, &input, &output),
        Commands::Delete { id } => cmd_delete(&db, FilterId(id), verbosity),
        Commands::Check => cmd_check(&db, verbosity),
    }
}

fn open_database(path: &Path, registry: Arc<FilterRegistry>) -> Result<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Database::open(path, registry)
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

fn parse_value(json: &str, what: &str) -> Result<Value> {
    serde_json::from_str(json).with_context(|| format!("Invalid JSON {what}: {json}"))
}

fn describe_runtime(env: &RuntimeEnvironment) -> String {
    let mut parts = Vec::new();
    if let Some(min) = env.min_version {
        parts.push(format!(">= {min}"));
    }
    if let Some(max) = env.max_version {
        parts.push(format!("<= {max}"));
    }
    for ext in &env.extensions {
        parts.push(format!("+{ext}"));
    }
    parts.join(", ")
}

// ============================================
// Commands
// ============================================

fn cmd_classes(registry: &FilterRegistry, v: Verbosity) -> Result<()> {
    v.info("Available filter classes:\n");

    for decl in registry.declarations() {
        v.result(&format!("  {}", decl.class));
        if decl.display_name != decl.class {
            v.info(&format!("    name:     {}", decl.display_name));
        }
        if !decl.description.is_empty() {
            v.info(&format!("    {}", decl.description));
        }
        for setting in &decl.settings {
            let mut flags = Vec::new();
            if setting.localized {
                flags.push("localized");
            }
            if setting.required {
                flags.push("required");
            }
            if flags.is_empty() {
                v.info(&format!("    setting:  {}", setting.name));
            } else {
                v.info(&format!("    setting:  {} ({})", setting.name, flags.join(", ")));
            }
        }
        if let Some(runtime) = &decl.runtime {
            v.info(&format!("    requires: {}", describe_runtime(runtime)));
        }
        v.info("");
    }

    v.info(&format!("Total: {} classes", registry.len()));
    Ok(())
}

fn cmd_install(db: &Database, session: &Session, path: &Path) -> Result<()> {
    let v = session.verbosity;
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read document: {}", path.display()))?;
    let document = FilterDocument::from_bytes(&data, path.to_str())
        .with_context(|| format!("Failed to parse document: {}", path.display()))?;
    v.debug(&format!(
        "{} groups, {} filters in document",
        document.groups.len(),
        document.filters.len()
    ));

    let report = db
        .helper()
        .install_document(&document, session.context_id)
        .with_context(|| format!("Failed to install {}", path.display()))?;

    for symbolic in &report.groups_created {
        v.info(&format!("  + group {symbolic}"));
    }
    for symbolic in &report.groups_kept {
        v.debug(&format!("group {symbolic} already installed"));
    }
    for id in &report.filters_created {
        v.info(&format!("  + filter #{id}"));
    }
    v.result(&format!(
        "Installed {} groups and {} filters ({} already present)",
        report.groups_created.len(),
        report.filters_created.len(),
        report.filters_skipped
    ));
    Ok(())
}

fn cmd_groups(db: &Database, v: Verbosity) -> Result<()> {
    let groups = db.filter_groups().get_objects()?;
    if groups.is_empty() {
        v.info("No filter groups installed");
        return Ok(());
    }

    for group in &groups {
        v.result(&format!(
            "{}: {} -> {}",
            group.symbolic, group.input_type, group.output_type
        ));
        if !group.display_name_key.is_empty() {
            v.info(&format!("    {}", group.display_name_key));
        }
    }
    Ok(())
}

fn cmd_list(
    db: &Database,
    session: &Session,
    group: Option<String>,
    class: Option<String>,
    templates: bool,
) -> Result<()> {
    let dao = db.filters();
    let lookup = Lookup::new().templates(templates);
    let ctx = session.context_id;

    let filters = match (group.as_deref(), class.as_deref()) {
        (Some(g), Some(c)) => dao.get_objects_by_group_and_class_with(g, c, ctx, lookup)?,
        (Some(g), None) => dao.get_objects_by_group_with(g, ctx, lookup)?,
        (None, Some(c)) => dao.get_objects_by_class_with(c, ctx, lookup)?,
        (None, None) => dao.get_objects(ctx, lookup)?,
    };

    if filters.is_empty() {
        session.verbosity.info("No filters found");
        return Ok(());
    }
    for filter in &filters {
        print_tree(filter, 0, session.verbosity);
    }
    Ok(())
}

fn print_tree(filter: &PersistableFilter, depth: usize, v: Verbosity) {
    let id = filter.id().map_or_else(|| "-".to_string(), |id| id.to_string());
    let mut line = format!(
        "{:indent$}#{} {} \"{}\"",
        "",
        id,
        filter.class(),
        filter.display_name,
        indent = depth * 2
    );
    if depth == 0 {
        line.push_str(&format!(" [{}]", filter.group().symbolic));
    }
    if filter.is_template() {
        line.push_str(" (template)");
    }
    v.result(&line);

    for child in filter.filters() {
        print_tree(child, depth + 1, v);
    }
}

fn load_filter(db: &Database, id: FilterId) -> Result<PersistableFilter> {
    db.filters()
        .get_object_by_id(id)
        .with_context(|| format!("Failed to load filter #{id}"))?
        .with_context(|| format!("No filter with id {id}"))
}

fn cmd_show(db: &Database, id: FilterId, format: &str, v: Verbosity) -> Result<()> {
    let filter = load_filter(db, id)?;
    let bytes = tree_document(&filter).to_bytes(format)?;
    v.result(String::from_utf8_lossy(&bytes).trim_end());
    Ok(())
}

/// A document holding `filter` and every group its tree uses.
fn tree_document(filter: &PersistableFilter) -> FilterDocument {
    let mut groups: Vec<GroupSpec> = Vec::new();
    filter.walk(&mut |node| {
        let group = node.group();
        if !groups.iter().any(|g| g.symbolic == group.symbolic) {
            groups.push(GroupSpec::from(&**group));
        }
    });
    FilterDocument {
        groups,
        filters: vec![FilterSpec::from_filter(filter)],
    }
}

fn cmd_run(db: &Database, session: &Session, id: FilterId, input: &str) -> Result<()> {
    let input = parse_value(input, "input")?;
    let mut filter = load_filter(db, id)?;

    let ctx = ExecutionContext::new(db.host().clone()).with_locale(session.locale.clone());
    let output = filter.execute(&ctx, input)?;

    let mut errors = Vec::new();
    filter.walk(&mut |f| errors.extend(f.errors().iter().cloned()));
    for error in &errors {
        tracing::warn!(filter = %id, "{error}");
    }

    match output {
        Some(value) => {
            session
                .verbosity
                .result(&serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => bail!("Filter #{} produced no output", id),
    }
}

fn cmd_compatible(db: &Database, session: &Session, input: &str, output: &str) -> Result<()> {
    let sample_in = parse_value(input, "input")?;
    let sample_out = parse_value(output, "output")?;

    let filters = db
        .filters()
        .get_compatible_objects(&sample_in, &sample_out, session.context_id)?;
    if filters.is_empty() {
        session.verbosity.info("No compatible filters");
        return Ok(());
    }
    for filter in &filters {
        print_tree(filter, 0, session.verbosity);
    }
    Ok(())
}

fn cmd_delete(db: &Database, id: FilterId, v: Verbosity) -> Result<()> {
    if !db.filters().delete_object_by_id(id)? {
        bail!("No filter with id {}", id);
    }
    v.info(&format!("Deleted filter #{id}"));
    Ok(())
}

fn cmd_check(db: &Database, v: Verbosity) -> Result<()> {
    let violations = db.filters().check_integrity()?;
    if violations.is_empty() {
        v.info("No problems found");
        return Ok(());
    }
    for violation in &violations {
        v.result(&format!("  {violation}"));
    }
    bail!("{} problems found", violations.len())
}
