//! Argument parsing and command routing.
//!
//! Every command except `quiet` runs through [`dispatch`], which loads the
//! config, applies the `--namespace` override and hands the resolved profile
//! set to the command body. Errors are returned to the caller untouched.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::config::ProfileSet;
use crate::crypto::derive::{derive, Options};
use crate::error::{CliError, CliResult};
use crate::init::{init, InitRequest};

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "SMPCONFIG";

/// smp command line
#[derive(Debug, Parser)]
#[command(name = "smp")]
#[command(version)]
#[command(about = "Say my password.")]
#[command(long_about = "Say my password.\n\nTo start using smp immediately run `smp init`.")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Hint to derive the password for
    #[arg(value_name = "HINT")]
    pub hint: Option<String>,
}

/// Flags accepted before or after any subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to config FILE [default: ~/.smp/config.yaml]
    #[arg(long = "config", visible_alias = "conf", value_name = "FILE", env = CONFIG_ENV, global = true)]
    pub config: Option<PathBuf>,

    /// Namespace to use for this invocation only
    #[arg(short = 'n', long = "namespace", visible_alias = "ns", value_name = "NAME", global = true)]
    pub namespace: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Explicit `--config`/`SMPCONFIG` value, or `~/.smp/config.yaml`.
    pub fn config_path(&self) -> CliResult<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }
}

pub fn default_config_path() -> CliResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".smp").join("config.yaml"))
        .ok_or(CliError::HomeDir)
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize or reinitialize smp
    #[command(long_about = "Initialize or reinitialize smp.\n\nCreates the default config file.")]
    Init(InitArgs),

    /// Use specified namespace
    Use {
        /// Namespace to switch to
        name: Option<String>,
    },

    /// Show current namespace
    #[command(visible_aliases = ["ns", "n"])]
    Namespace,

    /// Quietly generate a password without any configuration
    #[command(visible_alias = "q")]
    Quiet(QuietArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Force smp reinitialization (the previous config is backed up)
    #[arg(short, long)]
    pub force: bool,

    /// Sign secret; generated randomly when omitted
    #[arg(short, long)]
    pub secret: Option<String>,
}

#[derive(Debug, Args)]
pub struct QuietArgs {
    /// Hint to derive the password for
    #[arg(value_name = "HINT")]
    pub hint: Option<String>,

    /// Unique
    #[arg(short = 'u')]
    pub unique: bool,

    /// No type repetition
    #[arg(short = 't')]
    pub no_type_repetition: bool,

    /// No characters repetition
    #[arg(short = 'c')]
    pub no_char_repetition: bool,

    /// Alphabet
    #[arg(short = 'a', long = "abc")]
    pub alphabet: Option<String>,

    /// Secret
    #[arg(short, long)]
    pub secret: Option<String>,

    /// Size
    #[arg(long, allow_negative_numbers = true)]
    pub size: Option<i64>,
}

impl QuietArgs {
    /// Flags override the defaults; an empty alphabet or a non-positive size
    /// keeps the default.
    pub fn options(&self) -> Options {
        let mut options = Options::default();
        if let Some(alphabet) = self.alphabet.as_deref().filter(|abc| !abc.is_empty()) {
            options.alphabet = alphabet.to_string();
        }
        if let Some(size) = self.size.filter(|size| *size > 0) {
            options.size = size;
        }
        options.unique = self.unique;
        options.no_type_repetition = self.no_type_repetition;
        options.no_char_repetition = self.no_char_repetition;
        options
    }
}

/// Loads the config named by `global`, applies the namespace override and
/// runs `command` against the result.
pub fn dispatch<F>(global: &GlobalArgs, command: F) -> CliResult<()>
where
    F: FnOnce(&mut ProfileSet, &Path) -> CliResult<()>,
{
    let path = global.config_path()?;
    let mut profiles = ProfileSet::open(&path)?;
    profiles.set_current(global.namespace.as_deref().unwrap_or(""))?;
    debug!(namespace = %profiles.current, "namespace resolved");
    command(&mut profiles, &path)
}

/// Runs a parsed command line. Randomness, the clock and the output sink are
/// supplied by the caller.
pub fn execute<R, W>(cli: Cli, rng: &mut R, now: NaiveDateTime, out: &mut W) -> CliResult<()>
where
    R: RngCore + CryptoRng,
    W: Write,
{
    let Cli {
        global,
        command,
        hint,
    } = cli;
    match command {
        Some(Command::Init(args)) => init_config(&global, &args, rng, now, out),
        Some(Command::Use { name }) => dispatch(&global, |profiles, path| {
            use_namespace(profiles, path, name.as_deref(), out)
        }),
        Some(Command::Namespace) => dispatch(&global, |profiles, _| {
            writeln!(out, "{:?}", profiles.current)?;
            Ok(())
        }),
        Some(Command::Quiet(args)) => quiet(&args, out),
        None => dispatch(&global, |profiles, _| say(profiles, hint.as_deref(), out)),
    }
}

fn init_config<R, W>(
    global: &GlobalArgs,
    args: &InitArgs,
    rng: &mut R,
    now: NaiveDateTime,
    out: &mut W,
) -> CliResult<()>
where
    R: RngCore + CryptoRng,
    W: Write,
{
    let path = global.config_path()?;
    let request = InitRequest {
        path: &path,
        force: args.force,
        secret: args.secret.as_deref(),
    };
    let report = init(&request, rng, now)?;
    if let Some(backup) = &report.backup {
        writeln!(out, "previous config is backed up in {}", backup.display())?;
    }
    writeln!(out, "{} created", report.path.display())?;
    Ok(())
}

fn use_namespace<W: Write>(
    profiles: &mut ProfileSet,
    path: &Path,
    name: Option<&str>,
    out: &mut W,
) -> CliResult<()> {
    let name = name
        .filter(|name| !name.is_empty())
        .ok_or(CliError::MissingArgument("namespace"))?;
    profiles.set_current(name)?;
    profiles.save(path)?;
    writeln!(out, "switched to namespace {:?}", profiles.current)?;
    Ok(())
}

fn say<W: Write>(profiles: &ProfileSet, hint: Option<&str>, out: &mut W) -> CliResult<()> {
    let hint = hint.ok_or(CliError::MissingArgument("hint"))?;
    let profile = profiles.current_profile()?;
    let password = derive(profile.secret.as_bytes(), hint.as_bytes(), profile.options())?;
    writeln!(out, "{password}")?;
    Ok(())
}

fn quiet<W: Write>(args: &QuietArgs, out: &mut W) -> CliResult<()> {
    let hint = args
        .hint
        .as_deref()
        .ok_or(CliError::MissingArgument("hint"))?;
    let secret = args.secret.as_deref().unwrap_or("");
    let password = derive(secret.as_bytes(), hint.as_bytes(), args.options())?;
    writeln!(out, "{password}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{execute, Cli, Command};
    use crate::config::{ConfigError, Profile, ProfileSet};
    use crate::crypto::derive::{derive, Options};
    use crate::error::CliError;
    use crate::testing::{at, FixedRng};
    use clap::Parser;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::tempdir;

    fn run(args: &[&str]) -> Result<String, CliError> {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        let mut out = Vec::new();
        execute(cli, &mut FixedRng(9), at(2024, 2, 3, 4, 5, 6), &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    fn write_two_profiles(path: &Path) {
        let profile = |secret: &str| Profile {
            secret: secret.to_string(),
            alphabet: "abcdefgh".to_string(),
            size: 12,
            complexity: "c".to_string(),
        };
        ProfileSet {
            current: "work".to_string(),
            profiles: BTreeMap::from([
                ("work".to_string(), profile("w")),
                ("home".to_string(), profile("h")),
            ]),
        }
        .save(path)
        .expect("seed config");
    }

    #[test]
    fn parses_aliases_and_combined_flags() {
        let cli = Cli::try_parse_from(["smp", "--conf", "c.yaml", "--ns", "home", "q", "-utc", "hint"])
            .expect("parse");
        assert_eq!(cli.global.config.as_deref(), Some(Path::new("c.yaml")));
        assert_eq!(cli.global.namespace.as_deref(), Some("home"));
        match cli.command {
            Some(Command::Quiet(args)) => {
                assert!(args.unique && args.no_type_repetition && args.no_char_repetition);
                assert_eq!(args.hint.as_deref(), Some("hint"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["smp", "n", "-n", "home"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::Namespace)));
        assert_eq!(cli.global.namespace.as_deref(), Some("home"));

        let cli = Cli::try_parse_from(["smp", "--config", "c.yaml", "github"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.hint.as_deref(), Some("github"));
    }

    #[test]
    fn init_then_derive_with_default_profile() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join(".smp/config.yaml");
        let conf = conf.to_str().expect("utf-8 path");

        let created = run(&["smp", "--config", conf, "init"]).expect("init");
        assert_eq!(created, format!("{conf} created\n"));

        let first = run(&["smp", "--config", conf, "github"]).expect("derive");
        let second = run(&["smp", "--config", conf, "github"]).expect("derive");
        assert_eq!(first, second);

        let profile = ProfileSet::open(conf).expect("open").current_profile().expect("profile").clone();
        let expected = derive(profile.secret.as_bytes(), b"github", profile.options()).expect("derive");
        assert_eq!(first, format!("{expected}\n"));
    }

    #[test]
    fn forced_init_reports_backup() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("config.yaml");
        let conf = conf.to_str().expect("utf-8 path");
        run(&["smp", "--config", conf, "init", "-s", "first"]).expect("init");

        let err = run(&["smp", "--config", conf, "init"]).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let output = run(&["smp", "--config", conf, "init", "--force"]).expect("forced init");
        let backup = dir.path().join(".backup.03.02.24-04:05:06.yaml");
        assert!(output.starts_with(&format!("previous config is backed up in {}", backup.display())));
        assert!(backup.exists());
    }

    #[test]
    fn use_switches_and_persists() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("config.yaml");
        write_two_profiles(&conf);
        let conf = conf.to_str().expect("utf-8 path");

        let output = run(&["smp", "--config", conf, "use", "home"]).expect("use");
        assert_eq!(output, "switched to namespace \"home\"\n");
        assert_eq!(ProfileSet::open(conf).expect("open").current, "home");
        assert_eq!(run(&["smp", "--config", conf, "namespace"]).expect("ns"), "\"home\"\n");
    }

    #[test]
    fn use_requires_a_name() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("config.yaml");
        write_two_profiles(&conf);
        let conf = conf.to_str().expect("utf-8 path");

        let err = run(&["smp", "--config", conf, "use"]).unwrap_err();
        assert!(matches!(err, CliError::MissingArgument("namespace")));
        let err = run(&["smp", "--config", conf, "use", "nowhere"]).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::ProfileNotFound(_))));
        assert_eq!(ProfileSet::open(conf).expect("open").current, "work");
    }

    #[test]
    fn namespace_override_is_transient() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("config.yaml");
        write_two_profiles(&conf);
        let conf = conf.to_str().expect("utf-8 path");

        assert_eq!(run(&["smp", "--config", conf, "-n", "home", "ns"]).expect("ns"), "\"home\"\n");
        assert_eq!(run(&["smp", "--config", conf, "ns"]).expect("ns"), "\"work\"\n");

        let home = run(&["smp", "--config", conf, "--namespace", "home", "site"]).expect("derive");
        let work = run(&["smp", "--config", conf, "site"]).expect("derive");
        assert_ne!(home, work);

        let err = run(&["smp", "--config", conf, "-n", "ghost", "ns"]).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::ProfileNotFound(_))));
    }

    #[test]
    fn derivation_requires_hint_and_config() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("config.yaml");
        let conf_str = conf.to_str().expect("utf-8 path");

        let err = run(&["smp", "--config", conf_str, "github"]).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::NotFound(_))));

        write_two_profiles(&conf);
        let err = run(&["smp", "--config", conf_str]).unwrap_err();
        assert!(matches!(err, CliError::MissingArgument("hint")));
    }

    #[test]
    fn quiet_ignores_config_entirely() {
        let dir = tempdir().expect("temp dir");
        let conf = dir.path().join("missing.yaml");
        let conf = conf.to_str().expect("utf-8 path");

        let output = run(&["smp", "--config", conf, "quiet", "-s", "k", "-a", "xyz", "--size", "9", "hint"])
            .expect("quiet");
        let options = Options {
            size: 9,
            alphabet: "xyz".to_string(),
            ..Options::default()
        };
        assert_eq!(output, format!("{}\n", derive(b"k", b"hint", options).expect("derive")));
        assert!(!Path::new(conf).exists());
    }

    #[test]
    fn quiet_falls_back_to_defaults() {
        let output = run(&["smp", "q", "--size", "0", "-a", "", "hint"]).expect("quiet");
        let expected = derive(b"", b"hint", Options::default()).expect("derive");
        assert_eq!(output, format!("{expected}\n"));

        let err = run(&["smp", "q"]).unwrap_err();
        assert!(matches!(err, CliError::MissingArgument("hint")));
    }
}
