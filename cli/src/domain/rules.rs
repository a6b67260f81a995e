//! Rule table: maps a coalesced task to at most one remote action.
//!
//! Rules are compiled once from [`AgentConfig`]; resolution is pure.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use tether_common::{ChangeKind, CoalescedTask, TaskId};

use crate::domain::config::{AgentConfig, RuleConfig};
use crate::domain::error::ConfigError;
use crate::domain::target::RemoteTarget;

// ── Templates ────────────────────────────────────────────────────────────────

/// Values a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Path,
    RelativePath,
    FileName,
    Stem,
    Extension,
    Kind,
    Date,
    Title,
    RemotePath,
}

impl Placeholder {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "path" => Self::Path,
            "relative_path" => Self::RelativePath,
            "file_name" => Self::FileName,
            "stem" => Self::Stem,
            "extension" => Self::Extension,
            "kind" => Self::Kind,
            "date" => Self::Date,
            "title" => Self::Title,
            "remote_path" => Self::RemotePath,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Placeholder),
}

/// A parsed `{placeholder}` template. `{{` and `}}` are literal braces.
#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(
        source: &str,
        rule: &str,
        field: &str,
        allow_remote_path: bool,
    ) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(ConfigError::UnterminatedPlaceholder {
                            rule: rule.to_string(),
                            field: field.to_string(),
                        });
                    }
                    let placeholder = Placeholder::parse(name.trim())
                        .filter(|p| allow_remote_path || *p != Placeholder::RemotePath)
                        .ok_or_else(|| ConfigError::UnknownPlaceholder {
                            rule: rule.to_string(),
                            placeholder: name.clone(),
                            field: field.to_string(),
                        })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(placeholder));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Renders the template. With `quote` set, every substituted value is
    /// shell-quoted; literals are copied as written.
    fn render(&self, vars: &TemplateVars, quote: bool) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(p) => {
                    let value = vars.get(*p);
                    if quote {
                        out.push_str(&shell_escape::unix::escape(Cow::Borrowed(value)));
                    } else {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

struct TemplateVars {
    values: HashMap<&'static str, String>,
}

impl TemplateVars {
    fn new(task: &CoalescedTask, relative: &str, today: NaiveDate) -> Self {
        let path = task.path.as_path();
        let lossy = |s: Option<&std::ffi::OsStr>| {
            s.map(|v| v.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let mut values = HashMap::new();
        values.insert("path", path.to_string_lossy().into_owned());
        values.insert("relative_path", relative.to_string());
        values.insert("file_name", lossy(path.file_name()));
        values.insert("stem", lossy(path.file_stem()));
        values.insert("extension", lossy(path.extension()));
        values.insert("kind", task.kind.as_str().to_string());
        values.insert("date", format_date(today));
        values.insert("title", title_case(&lossy(path.file_stem())));
        Self { values }
    }

    fn set_remote_path(&mut self, remote_path: &str) {
        self.values.insert("remote_path", remote_path.to_string());
    }

    fn get(&self, placeholder: Placeholder) -> &str {
        let key = match placeholder {
            Placeholder::Path => "path",
            Placeholder::RelativePath => "relative_path",
            Placeholder::FileName => "file_name",
            Placeholder::Stem => "stem",
            Placeholder::Extension => "extension",
            Placeholder::Kind => "kind",
            Placeholder::Date => "date",
            Placeholder::Title => "title",
            Placeholder::RemotePath => "remote_path",
        };
        self.values.get(key).map_or("", String::as_str)
    }
}

/// `DDMONYYYY`, upper-case (e.g. `07MAR2025`).
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d%b%Y").to_string().to_uppercase()
}

/// File stem as a title: `_` becomes a space and each word is capitalized.
#[must_use]
pub fn title_case(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut word_start = true;
    for c in stem.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_alphabetic() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}

fn valid_front_matter_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ── Rules ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum RuleAction {
    Command(Template),
    Push {
        remote_dir: Template,
        rename: Option<Template>,
        then: Option<Template>,
        front_matter: Vec<(String, Template)>,
    },
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub target_name: String,
    pub target: RemoteTarget,
    pattern: Regex,
    kinds: Vec<ChangeKind>,
    action: RuleAction,
}

impl Rule {
    fn compile(config: &RuleConfig, target: RemoteTarget) -> Result<Self, ConfigError> {
        let name = config.name.as_str();
        let pattern = Regex::new(&config.pattern).map_err(|e| ConfigError::InvalidPattern {
            rule: name.to_string(),
            message: e.to_string(),
        })?;
        let action = match (&config.command, &config.push) {
            (Some(command), None) => {
                RuleAction::Command(Template::parse(command, name, "command", false)?)
            }
            (None, Some(push)) => RuleAction::Push {
                remote_dir: Template::parse(&push.remote_dir, name, "push.remote_dir", false)?,
                rename: push
                    .rename
                    .as_deref()
                    .map(|r| Template::parse(r, name, "push.rename", false))
                    .transpose()?,
                then: push
                    .then
                    .as_deref()
                    .map(|t| Template::parse(t, name, "push.then", true))
                    .transpose()?,
                front_matter: push
                    .front_matter
                    .iter()
                    .map(|field| {
                        if !valid_front_matter_key(&field.key) {
                            return Err(ConfigError::InvalidFrontMatterKey {
                                rule: name.to_string(),
                                key: field.key.clone(),
                            });
                        }
                        let template =
                            Template::parse(&field.value, name, "push.front_matter", false)?;
                        Ok((field.key.clone(), template))
                    })
                    .collect::<Result<_, _>>()?,
            },
            _ => return Err(ConfigError::AmbiguousAction(name.to_string())),
        };
        Ok(Self {
            name: name.to_string(),
            target_name: config.target.clone(),
            target,
            pattern,
            kinds: config.kinds.clone(),
            action,
        })
    }

    fn matches(&self, relative: &str, kind: ChangeKind) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&kind)) && self.pattern.is_match(relative)
    }
}

/// What a matched rule asks the remote side to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
    /// Run a shell command on the target.
    Command { command: String },
    /// Upload `local` to `remote_path`, then optionally run `then`.
    Push {
        local: PathBuf,
        remote_path: String,
        /// Written ahead of the file's bytes when set.
        front_matter: Option<String>,
        then: Option<String>,
    },
}

impl ResolvedAction {
    /// Short human-readable description for logs and `tether match`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ResolvedAction::Command { command } => format!("run: {command}"),
            ResolvedAction::Push {
                local,
                remote_path,
                front_matter,
                then,
            } => {
                let mut out = format!("push: {} -> {remote_path}", local.display());
                if front_matter.is_some() {
                    out.push_str(" (with front matter)");
                }
                if let Some(then) = then {
                    out.push_str(&format!("; then: {then}"));
                }
                out
            }
        }
    }
}

/// The matched rule and the concrete action for one task.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub rule: String,
    pub target_name: String,
    pub target: RemoteTarget,
    pub action: ResolvedAction,
}

/// Result of matching one path without executing anything.
///
/// Carries the target address, never its credential reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub path: PathBuf,
    pub relative_path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl MatchReport {
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.rule.is_some()
    }
}

/// Ordered, compiled rule table.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
    roots: Vec<PathBuf>,
}

impl RuleTable {
    /// Compiles every rule, checking patterns and templates.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid pattern, an unknown
    /// placeholder or a rule that names an unknown target.
    pub fn compile(config: &AgentConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let target = config.targets.get(&rule.target).cloned().ok_or_else(|| {
                ConfigError::UnknownTarget {
                    rule: rule.name.clone(),
                    target: rule.target.clone(),
                    known: config.target_names().join(", "),
                }
            })?;
            rules.push(Rule::compile(rule, target)?);
        }
        let mut roots: Vec<PathBuf> = config.watch.iter().map(|w| w.root.clone()).collect();
        // Longest root first so nested roots win.
        roots.sort_by_key(|r| std::cmp::Reverse(r.components().count()));
        Ok(Self { rules, roots })
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Path relative to the watch root containing it, `/`-separated.
    #[must_use]
    pub fn relative_path(&self, path: &Path) -> String {
        let stripped = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        stripped
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Finds the first rule matching `task` and renders its action.
    #[must_use]
    pub fn resolve(&self, task: &CoalescedTask, today: NaiveDate) -> Option<Resolution> {
        let relative = self.relative_path(&task.path);
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(&relative, task.kind))?;
        let mut vars = TemplateVars::new(task, &relative, today);

        let action = match &rule.action {
            RuleAction::Command(template) => ResolvedAction::Command {
                command: template.render(&vars, true),
            },
            RuleAction::Push {
                remote_dir,
                rename,
                then,
                front_matter,
            } => {
                let dir = remote_dir.render(&vars, false);
                let name = rename
                    .as_ref()
                    .map(|r| r.render(&vars, false))
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| vars.get(Placeholder::FileName).to_string());
                let remote_path = format!("{}/{name}", dir.trim_end_matches('/'));
                vars.set_remote_path(&remote_path);
                ResolvedAction::Push {
                    local: task.path.clone(),
                    front_matter: render_front_matter(front_matter, &vars),
                    then: then.as_ref().map(|t| t.render(&vars, true)),
                    remote_path,
                }
            }
        };

        Some(Resolution {
            rule: rule.name.clone(),
            target_name: rule.target_name.clone(),
            target: rule.target.clone(),
            action,
        })
    }
}

/// `---`-fenced YAML block with one line per field, or `None` when empty.
fn render_front_matter(fields: &[(String, Template)], vars: &TemplateVars) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    let mut block = String::from("---\n");
    for (key, template) in fields {
        let value = template.render(vars, false).replace(['\r', '\n'], " ");
        block.push_str(&format!("{key}: {value}\n"));
    }
    block.push_str("---\n\n");
    Some(block)
}

impl RuleTable {
    /// Resolves a synthetic task for `path` as if it had changed at `now`.
    #[must_use]
    pub fn dry_run(&self, path: &Path, kind: ChangeKind, now: DateTime<Utc>) -> MatchReport {
        let task = CoalescedTask {
            id: TaskId(0),
            path: path.to_path_buf(),
            from_path: None,
            kind,
            first_seen: now,
            last_seen: now,
            merge_count: 1,
        };
        let resolution = self.resolve(&task, now.with_timezone(&Local).date_naive());
        MatchReport {
            path: task.path,
            relative_path: self.relative_path(path),
            kind,
            rule: resolution.as_ref().map(|r| r.rule.clone()),
            target: resolution.as_ref().map(|r| r.target_name.clone()),
            remote: resolution.as_ref().map(|r| r.target.key().to_string()),
            action: resolution.map(|r| r.action.describe()),
        }
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
