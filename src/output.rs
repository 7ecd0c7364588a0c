use std::path::Path;
use colored::Colorize;
use oppm::health::{Finding, Report};

pub fn success(message: impl std::fmt::Display) {
    println!("{} {}", "OK".green().bold(), message);
}

pub fn info(message: impl std::fmt::Display) {
    println!("{} {}", "::".blue().bold(), message);
}

pub fn warning(message: impl std::fmt::Display) {
    println!("{} {}", "warning:".yellow().bold(), message);
}

pub fn error(message: impl std::fmt::Display) {
    eprintln!("{}: {}", "error".red().bold(), message);
}

/// Prints rows as left-aligned columns under a bold header.
pub fn table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }
    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let header = line(headers.iter().map(|h| h.to_string()).collect());
    println!("{}", header.bold());
    for row in rows {
        println!("{}", line(row.clone()));
    }
}

pub fn report(report: &Report) {
    let print = |label: colored::ColoredString, findings: &[Finding]| {
        for f in findings {
            println!("{label} {} {}: {}", f.subject, f.name.bold(), f.detail);
        }
    };
    print("ok".green(), &report.ok);
    print("fixed".cyan(), &report.fixed);
    print("broken".red(), &report.broken);
    let summary = format!(
        "{} ok, {} fixed, {} broken",
        report.ok.len(),
        report.fixed.len(),
        report.broken.len()
    );
    if report.is_healthy() {
        success(summary);
    } else {
        warning(summary);
    }
}

/// Tells the user how to put the shims directory on `PATH` for their shell.
pub fn path_instructions(shims_dir: &Path) {
    let dir = shims_dir.display();
    info("Add the shims directory to your PATH:");
    if cfg!(windows) {
        println!("  PowerShell: $env:Path = \"{dir};\" + $env:Path");
        println!("  cmd:        set PATH={dir};%PATH%");
    } else {
        println!("  export PATH=\"{dir}:$PATH\"");
    }
}
