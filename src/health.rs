//! Consistency audit across metadata, app directories and shim artifacts.
//!
//! Findings are advisory unless a fix is requested. Each finding is either
//! fully resolved or left alone and reported as broken; nothing is half-fixed.

use std::collections::BTreeSet;
use std::path::Path;
use serde::Serialize;
use crate::error::{IoResultExt, Result};
use crate::metadata::{ShimKind, ShimRecord, Store};
use crate::shims;
use crate::util::{entry_exists, is_dir_empty, normalize_lexically, remove_any};

/// What a finding is about.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Layout,
    App,
    Shim,
    OrphanArtifact,
    OrphanDir,
    StrayFile,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Subject::Layout => "layout",
            Subject::App => "app",
            Subject::Shim => "shim",
            Subject::OrphanArtifact => "orphaned shim artifact",
            Subject::OrphanDir => "orphaned app directory",
            Subject::StrayFile => "stray file",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Finding {
    pub subject: Subject,
    pub name: String,
    pub detail: String,
}

impl Finding {
    fn new(subject: Subject, name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { subject, name: name.into(), detail: detail.into() }
    }
}

/// Outcome of a health check. Every list is sorted.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub ok: Vec<Finding>,
    pub broken: Vec<Finding>,
    pub fixed: Vec<Finding>,
}

impl Report {
    /// `true` when nothing is left broken.
    pub fn is_healthy(&self) -> bool {
        self.broken.is_empty()
    }

    fn sort(&mut self) {
        self.ok.sort();
        self.broken.sort();
        self.fixed.sort();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Repair what can be repaired without losing data.
    pub fix: bool,
    /// With `fix`, also delete orphaned app directories and stray files.
    pub prune: bool,
}

impl CheckOptions {
    pub fn report_only() -> Self {
        Self::default()
    }

    pub fn fix() -> Self {
        Self { fix: true, prune: false }
    }
}

/// Runs every pass in order: layout, app records, shims, orphans.
///
/// With `fix`, the repaired store is saved before returning.
pub fn check(store: &mut Store, options: CheckOptions) -> Result<Report> {
    let mut report = Report::default();
    let mut changed = false;

    check_layout(store, options, &mut report)?;
    changed |= check_apps(store, options, &mut report)?;
    changed |= check_shims(store, options, &mut report)?;
    check_orphans(store, options, &mut report)?;

    if changed {
        store.save()?;
    }
    report.sort();
    tracing::info!(
        "health: {} ok, {} broken, {} fixed",
        report.ok.len(),
        report.broken.len(),
        report.fixed.len()
    );
    Ok(report)
}

fn check_layout(store: &Store, options: CheckOptions, report: &mut Report) -> Result<()> {
    let layout = store.layout();
    for (label, dir) in [("apps", layout.apps_dir()), ("shims", layout.shims_dir())] {
        if dir.is_dir() {
            continue;
        }
        let finding = Finding::new(Subject::Layout, label, format!("{} is missing", dir.display()));
        if options.fix {
            std::fs::create_dir_all(&dir).at(&dir)?;
            report.fixed.push(finding);
        } else {
            report.broken.push(finding);
        }
    }
    Ok(())
}

fn check_apps(store: &mut Store, options: CheckOptions, report: &mut Report) -> Result<bool> {
    let mut changed = false;
    let apps: Vec<_> = store.apps().cloned().collect();
    for app in apps {
        let path = store.app_path(&app);
        if !path.exists() {
            let detail = format!("install path {} is missing", app.install_path);
            if options.fix {
                store.remove_app(&app.name)?;
                changed = true;
                report.fixed.push(Finding::new(Subject::App, &app.name, format!("{detail}; record removed")));
            } else {
                report.broken.push(Finding::new(Subject::App, &app.name, detail));
            }
        } else if path.is_dir() && is_dir_empty(&path)? {
            let detail = "app directory is empty";
            if options.fix {
                shims::remove_for_app(store, &app.name, &path)?;
                store.remove_app(&app.name)?;
                std::fs::remove_dir(&path).at(&path)?;
                changed = true;
                report.fixed.push(Finding::new(Subject::App, &app.name, format!("{detail}; app removed")));
            } else {
                report.broken.push(Finding::new(Subject::App, &app.name, detail));
            }
        } else {
            report.ok.push(Finding::new(Subject::App, &app.name, app.install_path.clone()));
        }
    }
    Ok(changed)
}

/// `true` when the proxy artifact exists and forwards to the recorded target.
pub(crate) fn artifact_resolves(store: &Store, shim: &ShimRecord) -> bool {
    let artifact = store.shim_artifact(shim);
    match shim.kind {
        // is_file follows the link, so a stale relative link fails here
        ShimKind::Symlink => artifact.is_file(),
        ShimKind::Stub => {
            artifact.is_file()
                && std::fs::read_to_string(&artifact)
                    .map(|script| script.contains(&stub_reference(shim)))
                    .unwrap_or(false)
        }
    }
}

#[cfg(unix)]
fn stub_reference(shim: &ShimRecord) -> String {
    shim.target_relative_path.clone()
}

#[cfg(windows)]
fn stub_reference(shim: &ShimRecord) -> String {
    shim.target_relative_path.replace('/', "\\")
}

fn check_shims(store: &mut Store, options: CheckOptions, report: &mut Report) -> Result<bool> {
    let mut changed = false;
    let apps_dir = normalize_lexically(&store.layout().apps_dir());
    let records: Vec<_> = store.shims().cloned().collect();
    for shim in records {
        let target = store.shim_target(&shim);
        let target_in_root = store.shim_target_in_root(&shim);

        if !target_in_root.starts_with(&apps_dir) {
            let detail = format!("target {} is outside the apps directory", shim.target_path);
            if options.fix {
                shims::remove_artifact(store, &shim)?;
                store.remove_shim(&shim.name)?;
                changed = true;
                report.fixed.push(Finding::new(Subject::Shim, &shim.name, format!("{detail}; shim removed")));
            } else {
                report.broken.push(Finding::new(Subject::Shim, &shim.name, detail));
            }
            continue;
        }

        // a link that lands anywhere but the recorded target is stale
        if target == target_in_root && target.is_file() && artifact_resolves(store, &shim) {
            report.ok.push(Finding::new(Subject::Shim, &shim.name, shim.target_path.clone()));
            continue;
        }

        if target_in_root.is_file() {
            // the executable is still there; only the proxy is wrong or missing
            let detail = if entry_exists(&store.shim_artifact(&shim)) {
                "proxy does not resolve to its target"
            } else {
                "proxy artifact is missing"
            };
            if !options.fix {
                report.broken.push(Finding::new(Subject::Shim, &shim.name, detail));
                continue;
            }
            match shims::recreate(store, &shim.name) {
                Ok(_) => {
                    changed = true;
                    report.fixed.push(Finding::new(Subject::Shim, &shim.name, format!("{detail}; recreated")));
                }
                Err(e) => {
                    report.broken.push(Finding::new(Subject::Shim, &shim.name, format!("{detail}; recreate failed: {e}")));
                }
            }
            continue;
        }

        let detail = format!("target {} does not exist", shim.target_path);
        if options.fix {
            shims::remove_artifact(store, &shim)?;
            store.remove_shim(&shim.name)?;
            changed = true;
            report.fixed.push(Finding::new(Subject::Shim, &shim.name, format!("{detail}; shim removed")));
        } else {
            report.broken.push(Finding::new(Subject::Shim, &shim.name, detail));
        }
    }

    let shims_dir = store.layout().shims_dir();
    if shims_dir.is_dir() {
        let known: BTreeSet<String> = store.shims().map(|s| s.artifact.clone()).collect();
        for entry in std::fs::read_dir(&shims_dir).at(&shims_dir)? {
            let entry = entry.at(&shims_dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if known.contains(&name) {
                continue;
            }
            let finding = Finding::new(Subject::OrphanArtifact, &name, "no shim record");
            if options.fix {
                remove_any(&entry.path())?;
                report.fixed.push(Finding { detail: "no shim record; removed".into(), ..finding });
            } else {
                report.broken.push(finding);
            }
        }
    }
    Ok(changed)
}

fn check_orphans(store: &Store, options: CheckOptions, report: &mut Report) -> Result<()> {
    let apps_dir = store.layout().apps_dir();
    if !apps_dir.is_dir() {
        return Ok(());
    }
    let recorded: BTreeSet<_> = store
        .apps()
        .map(|app| normalize_lexically(&store.app_path(app)))
        .collect();
    for entry in std::fs::read_dir(&apps_dir).at(&apps_dir)? {
        let entry = entry.at(&apps_dir)?;
        let path = normalize_lexically(&entry.path());
        if recorded.contains(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let (subject, detail) = if path.is_dir() {
            (Subject::OrphanDir, "directory has no app record")
        } else {
            (Subject::StrayFile, "unexpected file in apps directory")
        };
        if options.fix && options.prune {
            prune(&path)?;
            report.fixed.push(Finding::new(subject, &name, format!("{detail}; deleted")));
        } else {
            report.broken.push(Finding::new(subject, &name, detail));
        }
    }
    Ok(())
}

fn prune(path: &Path) -> Result<()> {
    tracing::warn!("pruning {}", path.display());
    remove_any(path)
}
