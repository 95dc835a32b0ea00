use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::authors::DEFAULT_EMAIL_HOST;
use crate::config::{DEFAULT_CONFIG_FILE, MigrationConfig, load_config};
use crate::migrate::MigrationOptions;

pub const ENV_TRAC_EXPORT: &str = "TRAC_EXPORT";
pub const ENV_GIT_ROOT: &str = "TRAC_GIT_ROOT";
pub const ENV_AUTHOR_MAP: &str = "TRAC_AUTHOR_MAP";
pub const ENV_TRAC_BASE: &str = "TRAC_BASE_URL";
pub const ENV_CONFIG: &str = "TRAC2GITWIKI_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Migrate,
    ExtractAuthors,
    ExtractAttachments,
}

#[derive(Debug, Clone, Default)]
pub struct SettingOverrides {
    pub trac_export: Option<PathBuf>,
    pub git_root: Option<PathBuf>,
    pub author_map: Option<PathBuf>,
    pub trac_base: Option<String>,
    pub default_comment: Option<String>,
    pub default_email_host: Option<String>,
    pub config: Option<PathBuf>,
    pub keep_admin_history: bool,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Setting<T> {
    fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub trac_export: Option<Setting<PathBuf>>,
    pub git_root: Option<Setting<PathBuf>>,
    pub author_map: Option<Setting<PathBuf>>,
    pub trac_base: Option<Setting<String>>,
    pub default_comment: Option<Setting<String>>,
    pub default_email_host: Setting<String>,
    pub replay_admin_history: Setting<bool>,
    pub config_path: Setting<PathBuf>,
    pub config: MigrationConfig,
}

impl ResolvedSettings {
    pub fn diagnostics(&self) -> String {
        let mut lines = vec![
            format!(
                "config_path={} ({}, {})",
                normalize_for_display(&self.config_path.value),
                self.config_path.source.as_str(),
                if self.config_path.value.is_file() {
                    "present"
                } else {
                    "absent"
                }
            ),
            describe_path("trac_export", self.trac_export.as_ref()),
            describe_path("git_root", self.git_root.as_ref()),
            describe_path("author_map", self.author_map.as_ref()),
            describe_text("trac_base", self.trac_base.as_ref()),
            describe_text("default_comment", self.default_comment.as_ref()),
            describe_text("default_email_host", Some(&self.default_email_host)),
            format!(
                "replay_admin_history={} ({})",
                self.replay_admin_history.value,
                self.replay_admin_history.source.as_str()
            ),
        ];
        let policy = self.config.page_policy();
        lines.push(format!("target_extension={}", self.config.target_extension()));
        lines.push(format!("admin_prefixes={}", policy.admin_prefixes.join(",")));
        lines.push(format!(
            "admin_exceptions={}",
            policy.admin_exceptions.join(",")
        ));
        lines.join("\n")
    }

    /// Check every location the run mode needs, reporting all problems at once.
    pub fn verify(&self, mode: RunMode) -> Result<()> {
        let mut problems = Vec::new();

        match &self.trac_export {
            None => problems.push(format!(
                "no trac export specified (use --trac-export or {ENV_TRAC_EXPORT})"
            )),
            Some(setting) if !setting.value.is_file() => problems.push(format!(
                "cannot find trac export {}",
                normalize_for_display(&setting.value)
            )),
            Some(_) => {}
        }

        if self.config_path.source != ValueSource::Default && !self.config_path.value.is_file() {
            problems.push(format!(
                "cannot find config file {}",
                normalize_for_display(&self.config_path.value)
            ));
        }

        match mode {
            RunMode::Migrate => {
                match &self.git_root {
                    None => problems.push(format!(
                        "no git root specified (use --git-root or {ENV_GIT_ROOT})"
                    )),
                    Some(setting) if !setting.value.is_dir() => problems.push(format!(
                        "cannot find git root {}",
                        normalize_for_display(&setting.value)
                    )),
                    Some(_) => {}
                }
                if let Some(setting) = &self.author_map
                    && !setting.value.is_file()
                {
                    problems.push(format!(
                        "cannot find author map {}",
                        normalize_for_display(&setting.value)
                    ));
                }
            }
            RunMode::ExtractAttachments => {
                if self.trac_base.is_none() {
                    problems.push(format!(
                        "listing attachments requires a trac base URL (use --trac-base or {ENV_TRAC_BASE})"
                    ));
                }
            }
            RunMode::ExtractAuthors => {}
        }

        if problems.is_empty() {
            return Ok(());
        }
        let listed = problems
            .iter()
            .map(|problem| format!("  - {problem}"))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("invalid configuration:\n{listed}");
    }

    pub fn migration_options(&self) -> Result<MigrationOptions> {
        let git_root = self
            .git_root
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no git root specified"))?;
        let mut options = MigrationOptions::new(git_root.value.clone());
        options.default_comment = self
            .default_comment
            .as_ref()
            .map(|setting| setting.value.clone());
        options.rename_message = self.config.rename_message();
        options.convert_message = self.config.convert_message();
        options.target_extension = self.config.target_extension();
        options.source_base = self.trac_base.as_ref().map(|setting| setting.value.clone());
        options.replay_admin_history = self.replay_admin_history.value;
        options.policy = self.config.page_policy();
        Ok(options)
    }
}

pub fn resolve_settings(
    context: &ResolutionContext,
    overrides: &SettingOverrides,
) -> Result<ResolvedSettings> {
    resolve_settings_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_settings_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &SettingOverrides,
    lookup_env: F,
) -> Result<ResolvedSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let config_path = if let Some(path) = overrides.config.as_deref() {
        Setting::new(absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup(ENV_CONFIG) {
        Setting::new(absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        Setting::new(context.cwd.join(DEFAULT_CONFIG_FILE), ValueSource::Default)
    };
    let config = load_config(&config_path.value)?;

    let path_setting = |flag: Option<&Path>, key: &str| -> Option<Setting<PathBuf>> {
        if let Some(path) = flag {
            return Some(Setting::new(absolutize(path, &context.cwd), ValueSource::Flag));
        }
        lookup(key).map(|value| {
            Setting::new(absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
        })
    };
    let trac_export = path_setting(overrides.trac_export.as_deref(), ENV_TRAC_EXPORT);
    let git_root = path_setting(overrides.git_root.as_deref(), ENV_GIT_ROOT);
    let author_map = path_setting(overrides.author_map.as_deref(), ENV_AUTHOR_MAP);

    let trac_base = first_text([
        (overrides.trac_base.clone(), ValueSource::Flag),
        (lookup(ENV_TRAC_BASE), ValueSource::Env),
        (config.trac.base_url.clone(), ValueSource::Config),
    ])
    .map(|setting| Setting::new(setting.value.trim_end_matches('/').to_string(), setting.source));
    let default_comment = first_text([
        (overrides.default_comment.clone(), ValueSource::Flag),
        (config.commits.default_comment.clone(), ValueSource::Config),
    ]);
    let default_email_host = first_text([
        (overrides.default_email_host.clone(), ValueSource::Flag),
        (config.commits.default_email_host.clone(), ValueSource::Config),
    ])
    .unwrap_or_else(|| Setting::new(DEFAULT_EMAIL_HOST.to_string(), ValueSource::Default));

    let replay_admin_history = if overrides.keep_admin_history {
        Setting::new(true, ValueSource::Flag)
    } else if let Some(value) = config.pages.replay_admin_history {
        Setting::new(value, ValueSource::Config)
    } else {
        Setting::new(false, ValueSource::Default)
    };

    Ok(ResolvedSettings {
        trac_export,
        git_root,
        author_map,
        trac_base,
        default_comment,
        default_email_host,
        replay_admin_history,
        config_path,
        config,
    })
}

fn first_text<const N: usize>(
    candidates: [(Option<String>, ValueSource); N],
) -> Option<Setting<String>> {
    candidates.into_iter().find_map(|(value, source)| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| Setting::new(value, source))
    })
}

fn describe_path(key: &str, setting: Option<&Setting<PathBuf>>) -> String {
    match setting {
        Some(setting) => format!(
            "{key}={} ({})",
            normalize_for_display(&setting.value),
            setting.source.as_str()
        ),
        None => format!("{key}=<unset>"),
    }
}

fn describe_text(key: &str, setting: Option<&Setting<String>>) -> String {
    match setting {
        Some(setting) => format!("{key}={} ({})", setting.value, setting.source.as_str()),
        None => format!("{key}=<unset>"),
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
