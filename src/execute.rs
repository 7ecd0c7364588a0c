use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use oppm::config::{self, Config};
use oppm::health::{self, CheckOptions};
use oppm::installer;
use oppm::metadata::Store;
use oppm::migrate;
use oppm::pack;
use oppm::shims::{self, ShimStrategy};
use crate::cli::{ExeCommand, OppmCommand, CLI};
use crate::output;

pub fn execute(cli: CLI) -> Result<()> {
    match cli.command {
        OppmCommand::Init { root } => execute_init(root),
        OppmCommand::List { json } => execute_list(json),
        OppmCommand::Install { path, name } => execute_install(&path, name),
        OppmCommand::Remove { name } => execute_remove(&name),
        OppmCommand::Clean => execute_clean(),
        OppmCommand::Exe { command } => match command {
            ExeCommand::Add { path, name, stub } => execute_exe_add(&path, name, stub),
            ExeCommand::Delete { name } => execute_exe_delete(&name),
            ExeCommand::Show { json } => execute_exe_show(json),
        },
        OppmCommand::Update => execute_update(),
        OppmCommand::Migrate { path } => execute_migrate(&path),
        OppmCommand::Pack { output, overwrite } => execute_pack(output, overwrite),
        OppmCommand::Rebuild { archive, root, force } => execute_rebuild(&archive, root, force),
        OppmCommand::Health { fix, prune, json } => execute_health(fix, prune, json),
        OppmCommand::Config => execute_config(),
    }
}

/// Loads the store of the root named in the user config.
fn open_store() -> Result<Store> {
    let config = Config::load()?;
    let store = Store::load(&config.root_dir)
        .with_context(|| format!("active root is {}", config.root_dir.display()))?;
    Ok(store)
}

fn save_active_root(root: &Path) -> Result<()> {
    let path = Config::new(root).save()?;
    tracing::debug!("active root set to {} in {}", root.display(), path.display());
    Ok(())
}

pub fn execute_init(root: Option<PathBuf>) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => config::default_root()?,
    };
    let store = Store::init(&root)?;
    let layout = store.layout();
    save_active_root(layout.root())?;
    output::success(format!("Initialized root at {}", layout.root().display()));
    output::path_instructions(&layout.shims_dir());
    Ok(())
}

pub fn execute_list(json: bool) -> Result<()> {
    let store = open_store()?;
    let apps: Vec<_> = store.apps().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&apps)?);
        return Ok(());
    }
    if apps.is_empty() {
        output::info("No applications installed");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = apps
        .iter()
        .map(|app| {
            vec![
                app.name.clone(),
                app.source_kind.to_string(),
                app.install_path.clone(),
                app.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    output::table(&["NAME", "KIND", "PATH", "INSTALLED"], &rows);
    Ok(())
}

pub fn execute_install(path: &Path, name: Option<String>) -> Result<()> {
    let mut store = open_store()?;
    let record = installer::install(&mut store, path, name.as_deref())?;
    output::success(format!("Installed '{}' into {}", record.name, record.install_path));
    Ok(())
}

pub fn execute_remove(name: &str) -> Result<()> {
    let mut store = open_store()?;
    let removed = installer::remove(&mut store, name)?;
    for shim in &removed.shims {
        output::info(format!("Deleted shim '{shim}'"));
    }
    output::success(format!("Removed '{}'", removed.app.name));
    Ok(())
}

pub fn execute_clean() -> Result<()> {
    let mut store = open_store()?;
    let cleaned = installer::clean(&mut store)?;
    output::success(format!(
        "Deleted {} app entries and {} shim artifacts",
        cleaned.apps, cleaned.shims
    ));
    Ok(())
}

/// A relative executable path is taken from the working directory first,
/// then from the root, so `apps/<name>/...` works from anywhere.
fn resolve_executable(store: &Store, path: &Path) -> PathBuf {
    if path.is_relative() && !path.exists() {
        let in_root = store.layout().resolve(path);
        if in_root.exists() {
            return in_root;
        }
    }
    path.to_path_buf()
}

pub fn execute_exe_add(path: &Path, name: Option<String>, stub: bool) -> Result<()> {
    let mut store = open_store()?;
    let strategy = if stub { ShimStrategy::Stub } else { ShimStrategy::Auto };
    let executable = resolve_executable(&store, path);
    let record = shims::add(&mut store, &executable, name.as_deref(), strategy)?;
    output::success(format!(
        "Created {} shim '{}' -> {}",
        record.kind, record.name, record.target_path
    ));
    Ok(())
}

pub fn execute_exe_delete(name: &str) -> Result<()> {
    let mut store = open_store()?;
    let record = shims::delete(&mut store, name)?;
    output::success(format!("Deleted shim '{}'", record.name));
    Ok(())
}

pub fn execute_exe_show(json: bool) -> Result<()> {
    let store = open_store()?;
    let statuses = shims::list(&store);
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    if statuses.is_empty() {
        output::info("No shims");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = statuses
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.app.clone(),
                s.kind.to_string(),
                if s.resolves { "ok".to_string() } else { "broken".to_string() },
                s.target.display().to_string(),
            ]
        })
        .collect();
    output::table(&["NAME", "APP", "KIND", "STATUS", "TARGET"], &rows);
    Ok(())
}

pub fn execute_update() -> Result<()> {
    let mut store = open_store()?;
    let synced = installer::update(&mut store)?;
    if synced.is_empty() {
        output::success("Metadata already matches the apps directory");
        return Ok(());
    }
    for name in &synced.added {
        output::info(format!("Registered '{name}'"));
    }
    for name in &synced.removed {
        output::info(format!("Forgot '{name}' (directory missing)"));
    }
    for name in &synced.removed_shims {
        output::info(format!("Deleted shim '{name}'"));
    }
    output::success(format!("{} added, {} removed", synced.added.len(), synced.removed.len()));
    Ok(())
}

pub fn execute_migrate(path: &Path) -> Result<()> {
    let mut store = open_store()?;
    let migrated = migrate::migrate(&mut store, path)?;
    if !migrated.moved {
        output::info(format!("{} is already the active root", migrated.to.display()));
        return Ok(());
    }
    save_active_root(&migrated.to)?;
    if migrated.copied {
        output::info("Root was copied across filesystems and the old copy deleted");
    }
    for name in &migrated.recreated_shims {
        output::info(format!("Recreated shim '{name}'"));
    }
    output::report(&migrated.report);
    output::success(format!(
        "Migrated {} -> {}",
        migrated.from.display(),
        migrated.to.display()
    ));
    output::path_instructions(&store.layout().shims_dir());
    Ok(())
}

pub fn execute_pack(out: Option<PathBuf>, overwrite: bool) -> Result<()> {
    let store = open_store()?;
    let packed = pack::pack(&store, out.as_deref(), overwrite)?;
    output::success(format!(
        "Packed {} apps and {} shims into {}",
        packed.apps,
        packed.shims,
        packed.archive.display()
    ));
    output::info(format!("sha256 {}", packed.sha256));
    Ok(())
}

pub fn execute_rebuild(archive: &Path, root: Option<PathBuf>, force: bool) -> Result<()> {
    let target = match root {
        Some(root) => root,
        None => Config::load()
            .context("no target given with --root and no active root configured")?
            .root_dir,
    };
    let rebuilt = pack::rebuild(archive, &target, force)?;
    let layout = rebuilt.store.layout();
    save_active_root(layout.root())?;
    if !rebuilt.verified {
        output::warning("No checksum file found; archive integrity was not verified");
    }
    output::report(&rebuilt.report);
    output::success(format!("Rebuilt root at {}", layout.root().display()));
    output::path_instructions(&layout.shims_dir());
    Ok(())
}

pub fn execute_health(fix: bool, prune: bool, json: bool) -> Result<()> {
    let mut store = open_store()?;
    let report = health::check(&mut store, CheckOptions { fix, prune })?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::report(&report);
    }
    if !report.is_healthy() {
        bail!("{} problem(s) remain", report.broken.len());
    }
    Ok(())
}

pub fn execute_config() -> Result<()> {
    let config_path = config::config_file_path()?;
    println!("config file: {}", config_path.display());
    let store = open_store()?;
    let layout = store.layout();
    println!("root:        {}", layout.root().display());
    println!("apps:        {}", layout.apps_dir().display());
    println!("shims:       {}", layout.shims_dir().display());
    println!("metadata:    {}", layout.meta_file().display());
    Ok(())
}
