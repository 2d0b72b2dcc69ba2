//! Configuration documents: JSON merged from strings, files and the command
//! line, with `${NAME}` variables defined under the top-level `"variables"`
//! key.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::logging;
use yogi_core::{Error, ErrorCode, Result};

yogi_core::bit_flags! {
    /// Behaviour of a [`Configuration`].
    pub struct ConfigurationFlags: u32 {
        /// Treat `${NAME}` as plain text.
        const DISABLE_VARIABLES = 1 << 0;
        /// Let later updates overwrite values given on the command line.
        const MUTABLE_CMDLINE = 1 << 1;
    }
}

yogi_core::bit_flags! {
    /// Which switches [`Configuration::update_from_command_line`] accepts.
    pub struct CommandLineOptions: u32 {
        const LOGGING = 1 << 0;
        const BRANCH_NAME = 1 << 1;
        const BRANCH_DESCRIPTION = 1 << 2;
        const BRANCH_NETWORK = 1 << 3;
        const BRANCH_PASSWORD = 1 << 4;
        const BRANCH_PATH = 1 << 5;
        const BRANCH_ADV_ADDR = 1 << 6;
        const BRANCH_ADV_PORT = 1 << 7;
        const BRANCH_ADV_INT = 1 << 8;
        const BRANCH_TIMEOUT = 1 << 9;
        /// Configuration files as positional arguments.
        const FILES = 1 << 10;
        /// Like `FILES`, but at least one file must be given.
        const FILES_REQUIRED = 1 << 11;
        const OVERRIDES = 1 << 12;
        const VARIABLES = 1 << 13;
        const BRANCH_GHOST_MODE = 1 << 14;
    }
}

impl CommandLineOptions {
    pub const BRANCH_ALL: CommandLineOptions = CommandLineOptions::from_bits_truncate(
        Self::BRANCH_NAME.bits()
            | Self::BRANCH_DESCRIPTION.bits()
            | Self::BRANCH_NETWORK.bits()
            | Self::BRANCH_PASSWORD.bits()
            | Self::BRANCH_PATH.bits()
            | Self::BRANCH_ADV_ADDR.bits()
            | Self::BRANCH_ADV_PORT.bits()
            | Self::BRANCH_ADV_INT.bits()
            | Self::BRANCH_TIMEOUT.bits()
            | Self::BRANCH_GHOST_MODE.bits(),
    );
}

/// Switches that set a string property of the `"branch"` section.
const BRANCH_STRING_SWITCHES: &[(CommandLineOptions, &str, &str, &str)] = &[
    (CommandLineOptions::BRANCH_NAME, "name", "name", "Branch name"),
    (CommandLineOptions::BRANCH_DESCRIPTION, "description", "description", "Branch description"),
    (CommandLineOptions::BRANCH_NETWORK, "network", "network_name", "Network name"),
    (CommandLineOptions::BRANCH_PASSWORD, "password", "network_password", "Network password"),
    (CommandLineOptions::BRANCH_PATH, "path", "path", "Branch path"),
    (
        CommandLineOptions::BRANCH_ADV_ADDR,
        "adv-addr",
        "advertising_address",
        "Advertising address (e.g. --adv-addr=ff31::8000:2439)",
    ),
];

/// Switches that set a duration in seconds; negative means infinite.
const BRANCH_SECONDS_SWITCHES: &[(CommandLineOptions, &str, &str, &str)] = &[
    (
        CommandLineOptions::BRANCH_ADV_INT,
        "adv-int",
        "advertising_interval",
        "Advertising interval in seconds (e.g. --adv-int=3.0)",
    ),
    (
        CommandLineOptions::BRANCH_TIMEOUT,
        "timeout",
        "timeout",
        "Connection timeout in seconds (e.g. --timeout=3.0)",
    ),
];

/// A JSON configuration document.
#[derive(Debug, Clone)]
pub struct Configuration {
    flags: ConfigurationFlags,
    json: Value,
    immutable: Value,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(ConfigurationFlags::NONE)
    }
}

impl Configuration {
    pub fn new(flags: ConfigurationFlags) -> Self {
        Self {
            flags,
            json: Value::Object(Map::new()),
            immutable: Value::Object(Map::new()),
        }
    }

    pub fn flags(&self) -> ConfigurationFlags {
        self.flags
    }

    fn variables_supported(&self) -> bool {
        !self.flags.contains(ConfigurationFlags::DISABLE_VARIABLES)
    }

    /// Merge-patch `patch` into the document. On error the document is left
    /// unchanged.
    pub fn update_from_json(&mut self, patch: &Value) -> Result<()> {
        let immutable = self.immutable.clone();
        self.verify_and_merge(patch, &immutable)
    }

    /// Same as [`Configuration::update_from_json`] for JSON text.
    pub fn update_from_str(&mut self, json: &str) -> Result<()> {
        let patch: Value = serde_json::from_str(json).map_err(|e| {
            Error::with_details(
                ErrorCode::ParsingJsonFailed,
                format!("could not parse JSON string: {}", e),
            )
        })?;
        self.update_from_json(&patch)
    }

    /// Merge a `.json` or `.toml` file into the document.
    pub fn update_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let patch = read_file(path.as_ref())?;
        self.update_from_json(&patch)?;
        debug!("configuration updated from {}", path.as_ref().display());
        Ok(())
    }

    /// Parse `args` (program name first) and merge the result. Files are
    /// merged in order, then the direct switches and overrides on top. Unless
    /// `MUTABLE_CMDLINE` is set, the direct part survives later updates.
    ///
    /// `-h/--help` yields `HelpRequested` with the help text as details.
    pub fn update_from_command_line<I, T>(
        &mut self,
        args: I,
        options: CommandLineOptions,
    ) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let parsed = parse_command_line(args, options)?;
        self.verify_and_merge(&parsed.files, &parsed.direct)?;
        if !self.flags.contains(ConfigurationFlags::MUTABLE_CMDLINE) {
            merge_patch(&mut self.immutable, &parsed.direct);
        }
        Ok(())
    }

    /// The document as JSON text. `indent` of `None` gives a single line.
    pub fn dump(&self, resolve_variables: bool, indent: Option<usize>) -> Result<String> {
        let json = self.value(resolve_variables)?;
        to_json_string(&json, indent)
    }

    pub fn write_to_file(
        &self,
        path: impl AsRef<Path>,
        resolve_variables: bool,
        indent: Option<usize>,
    ) -> Result<()> {
        let mut text = self.dump(resolve_variables, indent)?;
        if indent.is_some() {
            text.push('\n');
        }
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|e| {
            Error::with_details(ErrorCode::OpenFileFailed, format!("{}: {}", path.display(), e))
        })?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                Error::with_details(
                    ErrorCode::WriteToFileFailed,
                    format!("{}: {}", path.display(), e),
                )
            })
    }

    /// Copy of the value at `pointer` (RFC 6901, e.g. `"/branch"`) with
    /// variables resolved. `Null` if nothing is configured there.
    pub fn section(&self, pointer: &str) -> Result<Value> {
        if !pointer.is_empty() && !pointer.starts_with('/') {
            return Err(Error::with_details(
                ErrorCode::InvalidParam,
                format!("invalid section \"{}\"", pointer),
            ));
        }
        let json = self.value(self.variables_supported())?;
        Ok(json.pointer(pointer).cloned().unwrap_or(Value::Null))
    }

    /// The document, optionally with variables resolved.
    pub fn value(&self, resolve_variables: bool) -> Result<Value> {
        match resolve_variables {
            false => Ok(self.json.clone()),
            true if !self.variables_supported() => Err(ErrorCode::NoVariableSupport.into()),
            true => resolve_variables_in(&self.json),
        }
    }

    fn verify_and_merge(&mut self, patch: &Value, immutable: &Value) -> Result<()> {
        let mut json = self.json.clone();
        merge_patch(&mut json, patch);
        merge_patch(&mut json, immutable);
        if self.variables_supported() {
            check_no_variables_in_keys(&json)?;
            resolve_variables_in(&json)?;
        }
        self.json = json;
        Ok(())
    }
}

/// RFC 7386 JSON merge patch.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn to_json_string(json: &Value, indent: Option<usize>) -> Result<String> {
    let text = match indent {
        None => serde_json::to_vec(json),
        Some(width) => {
            let indent = vec![b' '; width];
            let mut out = Vec::new();
            let fmt = serde_json::ser::PrettyFormatter::with_indent(&indent);
            let mut ser = serde_json::Serializer::with_formatter(&mut out, fmt);
            json.serialize(&mut ser).map(|_| out)
        }
    };
    text.map_err(|e| Error::with_details(ErrorCode::Unknown, e.to_string()))
        .and_then(|bytes| {
            String::from_utf8(bytes)
                .map_err(|e| Error::with_details(ErrorCode::Unknown, e.to_string()))
        })
}

fn read_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::with_details(
            ErrorCode::ParsingFileFailed,
            format!("could not open {}: {}", path.display(), e),
        )
    })?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => {
            toml::from_str::<Value>(&text).map_err(|e| e.to_string())
        }
        _ => serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| {
        Error::with_details(
            ErrorCode::ParsingFileFailed,
            format!("could not parse {}: {}", path.display(), e),
        )
    })
}

fn walk_keys(json: &Value, f: &mut impl FnMut(&str) -> Result<()>) -> Result<()> {
    match json {
        Value::Object(map) => map.iter().try_for_each(|(k, v)| {
            f(k)?;
            walk_keys(v, f)
        }),
        Value::Array(items) => items.iter().try_for_each(|v| walk_keys(v, f)),
        _ => Ok(()),
    }
}

fn check_no_variables_in_keys(json: &Value) -> Result<()> {
    walk_keys(json, &mut |key: &str| {
        if key.contains("${") {
            Err(Error::with_details(
                ErrorCode::VariableUsedInKey,
                format!("found syntax for variable in key: {}", key),
            ))
        } else {
            Ok(())
        }
    })
}

fn variable_ref(name: &str) -> String {
    format!("${{{}}}", name)
}

/// Substitute one variable in a string value. A string that is exactly the
/// reference takes the variable's value and type.
fn substitute(elem: &mut Value, reference: &str, value: &Value) {
    let Value::String(s) = elem else {
        return;
    };
    if s == reference {
        *elem = value.clone();
    } else if s.contains(reference) {
        let text = match value {
            Value::String(v) => v.clone(),
            other => other.to_string(),
        };
        *s = s.replace(reference, &text);
    }
}

fn walk_values_mut(json: &mut Value, f: &mut impl FnMut(&mut Value)) {
    match json {
        Value::Object(map) => map.values_mut().for_each(|v| walk_values_mut(v, f)),
        Value::Array(items) => items.iter_mut().for_each(|v| walk_values_mut(v, f)),
        other => f(other),
    }
}

fn resolve_variables_in(unresolved: &Value) -> Result<Value> {
    let mut json = unresolved.clone();
    let Some(Value::Object(vars)) = json.get("variables").cloned() else {
        return check_resolved(json);
    };

    // Variables may refer to each other; resolve them among themselves first.
    let mut resolved = vars.clone();
    for (name, value) in &vars {
        let reference = variable_ref(name);
        if let Value::String(s) = value {
            if s.contains(&reference) {
                return Err(Error::with_details(
                    ErrorCode::UndefinedVariables,
                    format!("circular dependency in {}", reference),
                ));
            }
        }
        let current = resolved.get(name).cloned().unwrap_or(Value::Null);
        for elem in resolved.values_mut() {
            walk_values_mut(elem, &mut |v: &mut Value| substitute(v, &reference, &current));
        }
    }

    for (name, value) in &resolved {
        let reference = variable_ref(name);
        walk_values_mut(&mut json, &mut |v: &mut Value| substitute(v, &reference, value));
    }
    check_resolved(json)
}

fn check_resolved(json: Value) -> Result<Value> {
    let mut undefined = Vec::new();
    let mut json = json;
    walk_values_mut(&mut json, &mut |v: &mut Value| {
        if let Value::String(s) = v {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${") {
                let tail = &rest[start..];
                let end = tail.find('}').map_or(tail.len(), |i| i + 1);
                undefined.push(tail[..end].to_string());
                rest = &tail[end..];
            }
        }
    });
    if undefined.is_empty() {
        Ok(json)
    } else {
        undefined.sort();
        undefined.dedup();
        Err(Error::with_details(
            ErrorCode::UndefinedVariables,
            format!("undefined variables: {}", undefined.join(", ")),
        ))
    }
}

struct ParsedCommandLine {
    files: Value,
    direct: Value,
}

fn build_command(bin: String, options: CommandLineOptions) -> Command {
    let mut cmd = Command::new("yogi")
        .bin_name(bin)
        .disable_version_flag(true)
        .about("Yogi branch configuration");

    if options.contains(CommandLineOptions::LOGGING) {
        cmd = cmd.arg(
            Arg::new("log-verbosity")
                .long("log-verbosity")
                .value_name("COMPONENT=LEVEL")
                .action(ArgAction::Append)
                .help("Log verbosity of a component, * for all (e.g. --log-verbosity=yogi_runtime::branch=debug)"),
        );
    }
    for (flag, id, _, help) in BRANCH_STRING_SWITCHES {
        if options.contains(*flag) {
            cmd = cmd.arg(Arg::new(*id).long(*id).value_name("VALUE").help(*help));
        }
    }
    if options.contains(CommandLineOptions::BRANCH_ADV_PORT) {
        cmd = cmd.arg(
            Arg::new("adv-port")
                .long("adv-port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Advertising port (e.g. --adv-port=13531)"),
        );
    }
    for (flag, id, _, help) in BRANCH_SECONDS_SWITCHES {
        if options.contains(*flag) {
            cmd = cmd.arg(
                Arg::new(*id)
                    .long(*id)
                    .value_name("SECONDS")
                    .allow_negative_numbers(true)
                    .value_parser(clap::value_parser!(f64))
                    .help(*help),
            );
        }
    }
    if options.contains(CommandLineOptions::BRANCH_GHOST_MODE) {
        cmd = cmd.arg(
            Arg::new("ghost-mode")
                .long("ghost-mode")
                .action(ArgAction::SetTrue)
                .help("Discover and query other branches without connecting"),
        );
    }
    if options.intersects(CommandLineOptions::FILES | CommandLineOptions::FILES_REQUIRED) {
        cmd = cmd.arg(
            Arg::new("files")
                .value_name("CONFIG")
                .num_args(1..)
                .action(ArgAction::Append)
                .required(options.contains(CommandLineOptions::FILES_REQUIRED))
                .help("Configuration files (.json or .toml), merged in order"),
        );
    }
    if options.contains(CommandLineOptions::OVERRIDES) {
        cmd = cmd.arg(
            Arg::new("override")
                .short('o')
                .long("override")
                .value_name("OVERRIDE")
                .action(ArgAction::Append)
                .help("Override in simplified (-o person.age=42) or JSON (-o '{\"person\":{\"age\":42}}') format"),
        );
    }
    if options.contains(CommandLineOptions::VARIABLES) {
        cmd = cmd.arg(
            Arg::new("var")
                .short('v')
                .long("var")
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .help("Configuration variable (e.g. -v DIR=/usr/local)"),
        );
    }
    cmd
}

fn cmdline_error(details: impl Into<String>) -> Error {
    Error::with_details(ErrorCode::ParsingCmdlineFailed, details)
}

fn strings<'a>(matches: &'a ArgMatches, id: &str) -> impl Iterator<Item = &'a String> {
    matches
        .try_get_many::<String>(id)
        .ok()
        .flatten()
        .into_iter()
        .flatten()
}

fn parse_command_line<I, T>(args: I, options: CommandLineOptions) -> Result<ParsedCommandLine>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let bin = args
        .first()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yogi".into());
    let matches = build_command(bin, options)
        .try_get_matches_from(args)
        .map_err(|e| match e.kind() {
            clap::error::ErrorKind::DisplayHelp => {
                Error::with_details(ErrorCode::HelpRequested, e.render().to_string())
            }
            _ => cmdline_error(e.render().to_string()),
        })?;

    let mut branch = Map::new();
    for (_, id, key, _) in BRANCH_STRING_SWITCHES {
        if let Some(v) = matches.try_get_one::<String>(id).ok().flatten() {
            branch.insert((*key).into(), Value::String(v.clone()));
        }
    }
    if let Some(port) = matches.try_get_one::<u16>("adv-port").ok().flatten() {
        branch.insert("advertising_port".into(), Value::from(*port));
    }
    for (_, id, key, _) in BRANCH_SECONDS_SWITCHES {
        if let Some(secs) = matches.try_get_one::<f64>(id).ok().flatten() {
            branch.insert((*key).into(), Value::from(*secs));
        }
    }
    if matches.try_get_one::<bool>("ghost-mode").ok().flatten() == Some(&true) {
        branch.insert("ghost_mode".into(), Value::Bool(true));
    }

    let mut direct = Value::Object(Map::new());
    if !branch.is_empty() {
        merge_patch(&mut direct, &serde_json::json!({ "branch": branch }));
    }

    let mut verbosity = Map::new();
    for entry in strings(&matches, "log-verbosity") {
        let (component, level) = entry.split_once('=').ok_or_else(|| {
            cmdline_error(format!("invalid log verbosity format \"{}\"", entry))
        })?;
        if !logging::is_valid_level(level) {
            return Err(cmdline_error(format!("invalid log level \"{}\"", level)));
        }
        verbosity.insert(component.to_string(), Value::String(level.to_ascii_lowercase()));
    }
    if !verbosity.is_empty() {
        merge_patch(&mut direct, &serde_json::json!({ "logging": { "verbosity": verbosity } }));
    }

    let mut variables = Map::new();
    for entry in strings(&matches, "var") {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| cmdline_error(format!("invalid variable format \"{}\"", entry)))?;
        variables.insert(name.to_string(), Value::String(value.to_string()));
    }
    if !variables.is_empty() {
        merge_patch(&mut direct, &serde_json::json!({ "variables": variables }));
    }

    for entry in strings(&matches, "override") {
        merge_patch(&mut direct, &parse_override(entry)?);
    }

    let mut files = Value::Object(Map::new());
    for path in strings(&matches, "files") {
        merge_patch(&mut files, &read_file(Path::new(path))?);
    }

    Ok(ParsedCommandLine { files, direct })
}

/// `{"a":{"b":1}}`, or the shorthand `a.b=1` (`a.b:1` works too). Shorthand
/// values that are not valid JSON are taken as strings.
fn parse_override(entry: &str) -> Result<Value> {
    if entry.trim_start().starts_with('{') {
        return serde_json::from_str(entry)
            .map_err(|e| cmdline_error(format!("parsing \"{}\" failed: {}", entry, e)));
    }
    let (path, value) = entry
        .find(|c| c == '=' || c == ':')
        .map(|i| (&entry[..i], &entry[i + 1..]))
        .ok_or_else(|| cmdline_error(format!("invalid override format \"{}\"", entry)))?;
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(cmdline_error(format!("invalid override path \"{}\"", path)));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
    Ok(path.rsplit('.').fold(value, |inner, key| {
        let mut map = Map::new();
        map.insert(key.to_string(), inner);
        Value::Object(map)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmdline(args: &[&str]) -> Vec<String> {
        std::iter::once("/usr/bin/my-app")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn merge_patch_follows_rfc7386() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}}));
        merge_patch(&mut doc, &json!({"c": [1, 2]}));
        assert_eq!(doc, json!({"a": "z", "c": [1, 2]}));
    }

    #[test]
    fn update_from_json_merges() {
        let mut cfg = Configuration::default();
        cfg.update_from_json(&json!({"person": {"name": "Joe", "age": 11}}))
            .unwrap();
        cfg.update_from_json(&json!({"person": {"age": 10}})).unwrap();
        assert_eq!(
            cfg.value(false).unwrap(),
            json!({"person": {"name": "Joe", "age": 10}})
        );
    }

    #[test]
    fn corrupt_json_string_leaves_document_unchanged() {
        let mut cfg = Configuration::default();
        cfg.update_from_str(r#"{"person": {"name": "Joe"}}"#).unwrap();
        let err = cfg.update_from_str(r#"{"person": {"age": 10}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParsingJsonFailed);
        assert!(err.details().is_some());
        assert_eq!(cfg.value(false).unwrap(), json!({"person": {"name": "Joe"}}));
    }

    #[test]
    fn overrides() {
        assert_eq!(parse_override("person.age=42").unwrap(), json!({"person": {"age": 42}}));
        assert_eq!(parse_override("a.b:hello").unwrap(), json!({"a": {"b": "hello"}}));
        assert_eq!(
            parse_override("branch.advertising_address=ff31::8000:2439").unwrap(),
            json!({"branch": {"advertising_address": "ff31::8000:2439"}})
        );
        assert_eq!(
            parse_override(r#"{"person":{"age":42}}"#).unwrap(),
            json!({"person": {"age": 42}})
        );
        assert_eq!(
            parse_override("novalue").unwrap_err().code(),
            ErrorCode::ParsingCmdlineFailed
        );
        assert_eq!(
            parse_override("a..b=1").unwrap_err().code(),
            ErrorCode::ParsingCmdlineFailed
        );
    }

    #[test]
    fn branch_switches() {
        let mut cfg = Configuration::default();
        cfg.update_from_command_line(
            cmdline(&[
                "--name=My Branch",
                "--network",
                "plant",
                "--adv-port=13000",
                "--timeout=-1",
                "--ghost-mode",
            ]),
            CommandLineOptions::ALL & !CommandLineOptions::FILES_REQUIRED,
        )
        .unwrap();
        assert_eq!(
            cfg.section("/branch").unwrap(),
            json!({
                "name": "My Branch",
                "network_name": "plant",
                "advertising_port": 13000,
                "timeout": -1.0,
                "ghost_mode": true,
            })
        );
    }

    #[test]
    fn help_is_requested() {
        let mut cfg = Configuration::default();
        let err = cfg
            .update_from_command_line(cmdline(&["--help"]), CommandLineOptions::BRANCH_ALL)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HelpRequested);
        let help = err.details().unwrap();
        assert!(help.contains("my-app"));
        assert!(help.contains("--adv-addr"));
        assert!(!help.contains("--override"));
    }

    #[test]
    fn disabled_switch_is_rejected() {
        let mut cfg = Configuration::default();
        let err = cfg
            .update_from_command_line(cmdline(&["--name=x"]), CommandLineOptions::LOGGING)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParsingCmdlineFailed);
    }

    #[test]
    fn missing_required_file() {
        let mut cfg = Configuration::default();
        let err = cfg
            .update_from_command_line(cmdline(&[]), CommandLineOptions::FILES_REQUIRED)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParsingCmdlineFailed);
    }

    #[test]
    fn bad_log_verbosity() {
        let mut cfg = Configuration::default();
        let err = cfg
            .update_from_command_line(
                cmdline(&["--log-verbosity=yogi=loud"]),
                CommandLineOptions::LOGGING,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParsingCmdlineFailed);
    }

    #[test]
    fn command_line_values_are_immutable() {
        let mut cfg = Configuration::default();
        cfg.update_from_command_line(cmdline(&["--name=Joe"]), CommandLineOptions::BRANCH_NAME)
            .unwrap();
        cfg.update_from_json(&json!({"branch": {"name": "Mike", "path": "/mike"}}))
            .unwrap();
        assert_eq!(
            cfg.section("/branch").unwrap(),
            json!({"name": "Joe", "path": "/mike"})
        );
    }

    #[test]
    fn mutable_command_line() {
        let mut cfg = Configuration::new(ConfigurationFlags::MUTABLE_CMDLINE);
        cfg.update_from_command_line(cmdline(&["--name=Joe"]), CommandLineOptions::BRANCH_NAME)
            .unwrap();
        cfg.update_from_json(&json!({"branch": {"name": "Mike"}})).unwrap();
        assert_eq!(cfg.section("/branch/name").unwrap(), json!("Mike"));
    }

    #[test]
    fn variables() {
        let mut cfg = Configuration::default();
        cfg.update_from_json(&json!({
            "variables": {"ROOT": "/usr/local", "BIN": "${ROOT}/bin", "PORT": 1234},
            "paths": {"bin": "${BIN}", "lib": "${ROOT}/lib"},
            "port": "${PORT}",
            "url": "host:${PORT}",
        }))
        .unwrap();
        let resolved = cfg.value(true).unwrap();
        assert_eq!(resolved["paths"], json!({"bin": "/usr/local/bin", "lib": "/usr/local/lib"}));
        assert_eq!(resolved["port"], json!(1234));
        assert_eq!(resolved["url"], json!("host:1234"));
        assert_eq!(cfg.value(false).unwrap()["port"], json!("${PORT}"));
        assert_eq!(cfg.section("/paths/lib").unwrap(), json!("/usr/local/lib"));
    }

    #[test]
    fn command_line_variables() {
        let mut cfg = Configuration::default();
        cfg.update_from_command_line(
            cmdline(&["-v", "NAME=Joe", "-o", "branch.name=${NAME}"]),
            CommandLineOptions::VARIABLES | CommandLineOptions::OVERRIDES,
        )
        .unwrap();
        assert_eq!(cfg.section("/branch/name").unwrap(), json!("Joe"));
    }

    #[test]
    fn bad_variables() {
        let mut cfg = Configuration::default();
        let err = cfg.update_from_json(&json!({"a": "${UNDEFINED}"})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UndefinedVariables);
        assert!(err.details().unwrap().contains("${UNDEFINED}"));

        let err = cfg
            .update_from_json(&json!({"variables": {"A": "x${A}"}}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UndefinedVariables);

        let err = cfg
            .update_from_json(&json!({"variables": {"A": 1}, "${A}": 2}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VariableUsedInKey);
        assert_eq!(cfg.value(false).unwrap(), json!({}));
    }

    #[test]
    fn disabled_variables() {
        let mut cfg = Configuration::new(ConfigurationFlags::DISABLE_VARIABLES);
        cfg.update_from_json(&json!({"a": "${UNDEFINED}", "${KEY}": 1}))
            .unwrap();
        assert_eq!(
            cfg.dump(true, None).unwrap_err().code(),
            ErrorCode::NoVariableSupport
        );
        assert_eq!(cfg.section("/a").unwrap(), json!("${UNDEFINED}"));
    }

    #[test]
    fn dump_formats() {
        let mut cfg = Configuration::default();
        cfg.update_from_json(&json!({"a": {"b": 1}})).unwrap();
        assert_eq!(cfg.dump(false, None).unwrap(), r#"{"a":{"b":1}}"#);
        assert_eq!(cfg.dump(false, Some(2)).unwrap(), "{\n  \"a\": {\n    \"b\": 1\n  }\n}");
    }

    #[test]
    fn missing_section_is_null() {
        let cfg = Configuration::default();
        assert_eq!(cfg.section("/branch").unwrap(), Value::Null);
        assert_eq!(cfg.section("branch").unwrap_err().code(), ErrorCode::InvalidParam);
    }
}
