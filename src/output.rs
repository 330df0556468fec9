//! Console and JSON output.
//!
//! All human-facing output funnels through a [`Reporter`] value created
//! once at command entry and passed down; there is no global quiet or
//! JSON flag. In JSON mode each command emits exactly one document and
//! every informational line is suppressed.

use std::io::{BufRead, Write};

use serde_json::{Value, json};

use crate::history::HistoryRecord;
use crate::plan::{Plan, StepClass};
use crate::pool::{Package, PackageId, Pool};
use crate::repo::updateinfo::Advisory;
use crate::util::{format_stamp, human_size};

/// How command output is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Normal human-readable output.
    #[default]
    Normal,
    /// Errors only.
    Quiet,
    /// One JSON document per command.
    Json,
}

/// Confirmation policy from `-y` / `--assumeno`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Assume {
    /// Ask interactively.
    #[default]
    Ask,
    /// Answer yes without prompting.
    Yes,
    /// Answer no without prompting.
    No,
}

/// Output context of one command invocation.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    mode: OutputMode,
    assume: Assume,
}

impl Reporter {
    /// What: Create a reporter.
    #[must_use]
    pub fn new(mode: OutputMode, assume: Assume) -> Self {
        Self { mode, assume }
    }

    /// The active output mode.
    #[must_use]
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// What: Print one informational line, unless quiet or JSON.
    pub fn line(&self, text: &str) {
        if self.mode == OutputMode::Normal {
            println!("{text}");
        }
    }

    /// What: Print an error line; never suppressed.
    pub fn error(&self, text: &str) {
        eprintln!("Error: {text}");
    }

    /// What: Emit the command's JSON document.
    ///
    /// Details:
    /// - A no-op outside JSON mode, so call sites can emit
    ///   unconditionally next to their human rendering.
    pub fn json(&self, value: &Value) {
        if self.mode == OutputMode::Json {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }

    /// What: Ask a yes/no question honoring the assume policy.
    ///
    /// Inputs:
    /// - `prompt`: Question without the ` [y/N]` suffix.
    ///
    /// Output:
    /// - The decision; non-interactive modes never block.
    #[must_use]
    pub fn confirm(&self, prompt: &str) -> bool {
        match self.assume {
            Assume::Yes => true,
            Assume::No => false,
            Assume::Ask => {
                if self.mode == OutputMode::Json {
                    return false;
                }
                print!("{prompt} [y/N]: ");
                let _ = std::io::stdout().flush();
                let mut answer = String::new();
                if std::io::stdin().lock().read_line(&mut answer).is_err() {
                    return false;
                }
                matches!(answer.trim(), "y" | "Y" | "yes" | "Yes")
            }
        }
    }

    /// What: Render a resolved plan.
    pub fn plan(&self, pool: &Pool, plan: &Plan) {
        if self.mode == OutputMode::Json {
            self.json(&plan_json(pool, plan));
            return;
        }
        if plan.is_empty() {
            self.line("Nothing to do.");
            return;
        }
        for (class, heading) in [
            (StepClass::Install, "Installing:"),
            (StepClass::Upgrade, "Upgrading:"),
            (StepClass::Downgrade, "Downgrading:"),
            (StepClass::Reinstall, "Reinstalling:"),
            (StepClass::Remove, "Removing:"),
            (StepClass::Obsoleted, "Obsoleting:"),
            (StepClass::RemovedByDowngrade, "Removing (downgrade):"),
            (StepClass::Unneeded, "Removing unneeded:"),
        ] {
            let members: Vec<&Package> =
                plan.of_class(class).map(|s| pool.package(s.id)).collect();
            if members.is_empty() {
                continue;
            }
            self.line(heading);
            for pkg in members {
                self.line(&format!(
                    "  {:<50} {:>10}",
                    pkg.nevra.to_string(),
                    human_size(pkg.download_size)
                ));
            }
        }
        self.line(&format!(
            "\nTotal download size: {}",
            human_size(plan.download_size(pool))
        ));
    }

    /// What: Render a package list.
    pub fn package_list(&self, pool: &Pool, ids: &[PackageId]) {
        if self.mode == OutputMode::Json {
            let docs: Vec<Value> = ids
                .iter()
                .map(|&id| package_json(pool.package(id)))
                .collect();
            self.json(&Value::Array(docs));
            return;
        }
        for &id in ids {
            let pkg = pool.package(id);
            self.line(&format!(
                "{:<40} {:<20} {}",
                format!("{}.{}", pkg.name(), pkg.arch()),
                pkg.evr().to_string(),
                pkg.repo_id
            ));
        }
    }

    /// What: Render detailed package info.
    pub fn package_info(&self, pool: &Pool, ids: &[PackageId]) {
        if self.mode == OutputMode::Json {
            let docs: Vec<Value> = ids
                .iter()
                .map(|&id| package_json(pool.package(id)))
                .collect();
            self.json(&Value::Array(docs));
            return;
        }
        for &id in ids {
            let pkg = pool.package(id);
            self.line(&format!("Name         : {}", pkg.name()));
            self.line(&format!("Arch         : {}", pkg.arch()));
            self.line(&format!("Version      : {}", pkg.evr()));
            self.line(&format!("Size         : {}", human_size(pkg.install_size)));
            self.line(&format!("Repo         : {}", pkg.repo_id));
            self.line(&format!("Summary      : {}", pkg.summary));
            self.line(&format!("URL          : {}", pkg.url));
            self.line(&format!("License      : {}", pkg.license));
            self.line(&format!("Description  : {}", pkg.description));
            self.line("");
        }
    }

    /// What: Render history records.
    pub fn history(&self, records: &[HistoryRecord]) {
        if self.mode == OutputMode::Json {
            let docs: Vec<Value> = records.iter().map(history_json).collect();
            self.json(&Value::Array(docs));
            return;
        }
        self.line(&format!("{:<5} {:<18} {:<9} {:<9} Command", "ID", "Time", "Added", "Removed"));
        for record in records {
            self.line(&format!(
                "{:<5} {:<18} {:<9} {:<9} {}",
                record.id,
                format_stamp(record.stamp),
                record.added.len(),
                record.removed.len(),
                record.cmdline
            ));
        }
    }

    /// What: Render advisories.
    pub fn advisories(&self, advisories: &[&Advisory]) {
        if self.mode == OutputMode::Json {
            let docs: Vec<Value> = advisories.iter().map(|a| advisory_json(a)).collect();
            self.json(&Value::Array(docs));
            return;
        }
        for adv in advisories {
            self.line(&format!(
                "{:<24} {:<12} {:<10} {}",
                adv.id,
                adv.kind().label(),
                adv.severity.as_deref().unwrap_or("-"),
                adv.title
            ));
        }
    }
}

/// JSON document for one package.
#[must_use]
pub fn package_json(pkg: &Package) -> Value {
    json!({
        "name": pkg.name(),
        "epoch": pkg.evr().epoch,
        "version": pkg.evr().version,
        "release": pkg.evr().release,
        "arch": pkg.arch(),
        "nevra": pkg.nevra.to_string(),
        "repo": pkg.repo_id,
        "summary": pkg.summary,
        "description": pkg.description,
        "url": pkg.url,
        "license": pkg.license,
        "install_size": pkg.install_size,
        "download_size": pkg.download_size,
        "location": pkg.location,
    })
}

/// JSON document for a plan.
#[must_use]
pub fn plan_json(pool: &Pool, plan: &Plan) -> Value {
    let mut by_class = serde_json::Map::new();
    for (class, key) in [
        (StepClass::Install, "install"),
        (StepClass::Upgrade, "upgrade"),
        (StepClass::Downgrade, "downgrade"),
        (StepClass::Reinstall, "reinstall"),
        (StepClass::Remove, "remove"),
        (StepClass::Obsoleted, "obsoleted"),
        (StepClass::RemovedByDowngrade, "removed_by_downgrade"),
        (StepClass::Unneeded, "unneeded"),
    ] {
        let members: Vec<Value> = plan
            .of_class(class)
            .map(|s| package_json(pool.package(s.id)))
            .collect();
        if !members.is_empty() {
            by_class.insert(key.to_string(), Value::Array(members));
        }
    }
    json!({
        "plan": Value::Object(by_class),
        "download_size": plan.download_size(pool),
    })
}

/// JSON document for one history record.
#[must_use]
pub fn history_json(record: &HistoryRecord) -> Value {
    json!({
        "id": record.id,
        "command": record.cmdline,
        "timestamp": record.stamp,
        "added": record
            .added
            .iter()
            .map(|(nevra, auto)| json!({"nevra": nevra, "auto": auto}))
            .collect::<Vec<_>>(),
        "removed": record.removed,
    })
}

/// JSON document for one advisory.
#[must_use]
pub fn advisory_json(adv: &Advisory) -> Value {
    json!({
        "id": adv.id,
        "type": adv.kind().label(),
        "severity": adv.severity,
        "title": adv.title,
        "issued": adv.issued,
        "reboot_suggested": adv.reboot_suggested,
        "packages": adv.packages.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "references": adv
            .references
            .iter()
            .map(|r| json!({"id": r.id, "type": r.kind, "href": r.href}))
            .collect::<Vec<_>>(),
    })
}
