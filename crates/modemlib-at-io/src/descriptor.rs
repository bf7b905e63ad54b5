//! Per-device pattern tables.
//!
//! A [`DeviceDescriptor`] tells the engine how one modem family frames its
//! output: how each command's response ends, which fields to extract, how
//! its echo looks, which unsolicited lines to ignore, and how
//! vendor-specific signals map onto [`Notification::VendorSignal`].
//! Descriptors are built once with [`DescriptorBuilder`], which compiles
//! every pattern up front, and are then shared read-only as
//! `Arc<DeviceDescriptor>`.
//!
//! [`Notification::VendorSignal`]: modemlib_core::Notification::VendorSignal

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use regex::bytes::Regex;

use modemlib_core::error::{Error, Result};
use modemlib_core::events::SignalValue;

use crate::protocol;

/// Converts the raw value of a vendor signal into a typed value.
///
/// Returning `Err` is never fatal: the demultiplexer logs it and delivers
/// the raw text instead.
pub type SignalTransform = fn(&str) -> std::result::Result<SignalValue, String>;

/// Ready-made [`SignalTransform`]s.
pub mod transforms {
    use modemlib_core::events::SignalValue;

    /// Keep the raw text.
    pub fn text(raw: &str) -> Result<SignalValue, String> {
        Ok(SignalValue::Text(raw.trim().to_string()))
    }

    /// A single decimal integer (`^RSSI:17`).
    pub fn number(raw: &str) -> Result<SignalValue, String> {
        raw.trim()
            .parse::<i64>()
            .map(SignalValue::Number)
            .map_err(|e| format!("{raw:?} is not a number: {e}"))
    }

    /// Comma-separated integers (`^MODE:5,4`).
    pub fn number_list(raw: &str) -> Result<SignalValue, String> {
        raw.split(',')
            .map(|part| {
                part.trim()
                    .parse::<i64>()
                    .map_err(|e| format!("{raw:?} is not a number list: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SignalValue::List)
    }

    /// A hexadecimal integer (`^DSFLOWRPT` style counters).
    pub fn hex_number(raw: &str) -> Result<SignalValue, String> {
        i64::from_str_radix(raw.trim(), 16)
            .map(SignalValue::Number)
            .map_err(|e| format!("{raw:?} is not hex: {e}"))
    }
}

/// Fixed notification rules every device gets, overridable per descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `+CMTI` new message stored.
    NewSms,
    /// Firmware debug chatter, consumed silently.
    DebugNoise,
    /// `+CREG` registration status.
    RegStatus,
    /// `RING` / `+CRING`.
    IncomingCall,
}

impl Builtin {
    /// Built-ins in the order they win a tie at the same buffer offset.
    pub const PRIORITY: [Builtin; 4] = [
        Builtin::NewSms,
        Builtin::DebugNoise,
        Builtin::RegStatus,
        Builtin::IncomingCall,
    ];

    fn default_pattern(self) -> &'static str {
        match self {
            Builtin::NewSms => protocol::NEW_SMS_PATTERN,
            Builtin::DebugNoise => protocol::DEBUG_PATTERN,
            Builtin::RegStatus => protocol::REG_STATUS_PATTERN,
            Builtin::IncomingCall => protocol::INCOMING_CALL_PATTERN,
        }
    }

    fn required_groups(self) -> &'static [&'static str] {
        match self {
            Builtin::NewSms => &["folder", "index"],
            Builtin::RegStatus => &["status"],
            Builtin::DebugNoise | Builtin::IncomingCall => &[],
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Builtin::NewSms => "new-sms",
            Builtin::DebugNoise => "debug",
            Builtin::RegStatus => "reg-status",
            Builtin::IncomingCall => "incoming-call",
        };
        f.write_str(s)
    }
}

/// Compiled response patterns for one command.
#[derive(Debug, Clone, Default)]
pub struct CommandPatterns {
    end: Option<Regex>,
    extract: Option<Regex>,
    echo: Option<Regex>,
    timeout: Option<Duration>,
}

impl CommandPatterns {
    /// Compile a pattern set. `None` falls back to the descriptor default
    /// (end), cleaned text (extract) or a literal echo comparison (echo).
    pub fn new(end: Option<&str>, extract: Option<&str>, echo: Option<&str>) -> Result<Self> {
        Ok(Self {
            end: end.map(|p| compile("end", p)).transpose()?,
            extract: extract.map(|p| compile("extract", p)).transpose()?,
            echo: echo.map(|p| compile("echo", p)).transpose()?,
            timeout: None,
        })
    }

    /// Override the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn end(&self) -> Option<&Regex> {
        self.end.as_ref()
    }

    pub fn extract(&self) -> Option<&Regex> {
        self.extract.as_ref()
    }

    pub fn echo(&self) -> Option<&Regex> {
        self.echo.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Uncompiled per-command patterns, as handed to [`DescriptorBuilder::command`].
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    end: Option<String>,
    extract: Option<String>,
    echo: Option<String>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// End-of-response pattern.
    pub fn end(mut self, pattern: &str) -> Self {
        self.end = Some(pattern.to_string());
        self
    }

    /// Field extraction pattern, applied once per row.
    pub fn extract(mut self, pattern: &str) -> Self {
        self.extract = Some(pattern.to_string());
        self
    }

    /// Echo pattern stripped from the start of the response.
    pub fn echo(mut self, pattern: &str) -> Self {
        self.echo = Some(pattern.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn compile(&self) -> Result<CommandPatterns> {
        let patterns = CommandPatterns::new(
            self.end.as_deref(),
            self.extract.as_deref(),
            self.echo.as_deref(),
        )?;
        Ok(match self.timeout {
            Some(t) => patterns.with_timeout(t),
            None => patterns,
        })
    }
}

/// Mapping of one raw vendor signal name onto a logical signal.
#[derive(Debug, Clone)]
pub struct SignalMapping {
    /// Logical name published in [`Notification::VendorSignal`](modemlib_core::Notification::VendorSignal).
    pub logical: String,
    pub transform: SignalTransform,
}

/// Compiled, read-only pattern table for one device family.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    name: String,
    line_ending: Vec<u8>,
    default_end: Regex,
    default_timeout: Duration,
    error: Regex,
    prompt: Regex,
    commands: HashMap<String, CommandPatterns>,
    ignore: Vec<Regex>,
    async_pattern: Option<Regex>,
    signals: HashMap<String, SignalMapping>,
    builtins: HashMap<Builtin, Regex>,
    alphanumeric_operator: bool,
}

impl DeviceDescriptor {
    /// Start building a descriptor.
    pub fn builder(name: &str) -> DescriptorBuilder {
        DescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes appended to every command's wire text.
    pub fn line_ending(&self) -> &[u8] {
        &self.line_ending
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn error_pattern(&self) -> &Regex {
        &self.error
    }

    pub fn prompt_pattern(&self) -> &Regex {
        &self.prompt
    }

    pub fn ignore_patterns(&self) -> &[Regex] {
        &self.ignore
    }

    /// The vendor async-notification pattern (named groups `name`, `value`).
    pub fn async_pattern(&self) -> Option<&Regex> {
        self.async_pattern.as_ref()
    }

    /// Look up the mapping for a raw vendor signal name.
    pub fn signal(&self, raw_name: &str) -> Option<&SignalMapping> {
        self.signals.get(raw_name)
    }

    pub fn builtin(&self, which: Builtin) -> Option<&Regex> {
        self.builtins.get(&which)
    }

    /// Per-command patterns registered for `command_name`.
    pub fn command(&self, command_name: &str) -> Option<&CommandPatterns> {
        self.commands.get(command_name)
    }

    /// End pattern for a command, falling back to the default `OK` pattern.
    pub fn end_pattern_for(&self, command_name: &str) -> &Regex {
        self.command(command_name)
            .and_then(CommandPatterns::end)
            .unwrap_or(&self.default_end)
    }

    /// Timeout for a command, falling back to the descriptor default.
    pub fn timeout_for(&self, command_name: &str) -> Duration {
        self.command(command_name)
            .and_then(CommandPatterns::timeout)
            .unwrap_or(self.default_timeout)
    }

    /// Whether `+COPS?` may report an alphanumeric name even when numeric
    /// format was requested.
    pub fn reports_alphanumeric_operator(&self) -> bool {
        self.alphanumeric_operator
    }
}

/// Fluent builder for [`DeviceDescriptor`].
///
/// Nothing is compiled until [`build()`](Self::build), which reports the
/// first bad pattern as [`Error::InvalidParameter`].
///
/// # Example
///
/// ```
/// use modemlib_at_io::descriptor::{transforms, CommandSpec, DeviceDescriptor};
/// use std::time::Duration;
///
/// let descriptor = DeviceDescriptor::builder("acme")
///     .command("CSQ", CommandSpec::new().extract(r"\+CSQ:\s*(?P<rssi>\d+),(?P<ber>\d+)"))
///     .ignore(r"\r\n\^BOOT:[^\r\n]*\r\n")
///     .async_pattern(r"\r\n\^(?P<name>[A-Z]+):\s*(?P<value>[^\r\n]*)\r\n")
///     .signal("RSSI", "signal_quality", transforms::number)
///     .default_timeout(Duration::from_secs(3))
///     .build()
///     .unwrap();
/// assert!(descriptor.signal("RSSI").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    line_ending: Vec<u8>,
    default_end: String,
    default_timeout: Duration,
    error: String,
    prompt: String,
    commands: Vec<(String, CommandSpec)>,
    ignore: Vec<String>,
    async_pattern: Option<String>,
    signals: Vec<(String, String, SignalTransform)>,
    builtin_overrides: Vec<(Builtin, String)>,
    alphanumeric_operator: bool,
}

impl DescriptorBuilder {
    pub fn new(name: &str) -> Self {
        DescriptorBuilder {
            name: name.to_string(),
            line_ending: protocol::DEFAULT_LINE_ENDING.to_vec(),
            default_end: protocol::DEFAULT_END_PATTERN.to_string(),
            default_timeout: Duration::from_secs(5),
            error: protocol::DEFAULT_ERROR_PATTERN.to_string(),
            prompt: protocol::DEFAULT_PROMPT_PATTERN.to_string(),
            commands: Vec::new(),
            ignore: Vec::new(),
            async_pattern: None,
            signals: Vec::new(),
            builtin_overrides: Vec::new(),
            alphanumeric_operator: false,
        }
    }

    /// Command terminator (default `\r`).
    pub fn line_ending(mut self, ending: &[u8]) -> Self {
        self.line_ending = ending.to_vec();
        self
    }

    /// End-of-response pattern for commands without their own.
    pub fn default_end(mut self, pattern: &str) -> Self {
        self.default_end = pattern.to_string();
        self
    }

    /// Timeout for commands without their own (default 5 s).
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Device error pattern. Named groups `family`, `detail` and `bare`
    /// are used for classification when present.
    pub fn error_pattern(mut self, pattern: &str) -> Self {
        self.error = pattern.to_string();
        self
    }

    /// Split-command prompt marker.
    pub fn prompt_pattern(mut self, pattern: &str) -> Self {
        self.prompt = pattern.to_string();
        self
    }

    /// Register patterns for the command named `name`. A later call for
    /// the same name replaces the earlier one.
    pub fn command(mut self, name: &str, spec: CommandSpec) -> Self {
        self.commands.push((name.to_string(), spec));
        self
    }

    /// Unsolicited output stripped silently.
    pub fn ignore(mut self, pattern: &str) -> Self {
        self.ignore.push(pattern.to_string());
        self
    }

    /// Vendor async-notification pattern with named groups `name` and `value`.
    pub fn async_pattern(mut self, pattern: &str) -> Self {
        self.async_pattern = Some(pattern.to_string());
        self
    }

    /// Map a raw vendor signal onto a logical signal.
    pub fn signal(mut self, raw_name: &str, logical: &str, transform: SignalTransform) -> Self {
        self.signals
            .push((raw_name.to_string(), logical.to_string(), transform));
        self
    }

    /// Replace one of the built-in notification patterns.
    pub fn builtin_pattern(mut self, which: Builtin, pattern: &str) -> Self {
        self.builtin_overrides.push((which, pattern.to_string()));
        self
    }

    /// Mark the device as answering `+COPS?` with operator names.
    pub fn alphanumeric_operator(mut self, enabled: bool) -> Self {
        self.alphanumeric_operator = enabled;
        self
    }

    /// Compile every pattern and produce the descriptor.
    pub fn build(self) -> Result<DeviceDescriptor> {
        let commands = self
            .commands
            .iter()
            .map(|(name, spec)| Ok((name.clone(), spec.compile()?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let ignore = self
            .ignore
            .iter()
            .map(|p| compile_span("ignore", p))
            .collect::<Result<Vec<_>>>()?;

        let async_pattern = match &self.async_pattern {
            Some(p) => {
                let re = compile_span("async", p)?;
                require_groups(&re, &["name", "value"], "async")?;
                Some(re)
            }
            None => None,
        };

        let mut builtins = HashMap::new();
        for which in Builtin::PRIORITY {
            let pattern = self
                .builtin_overrides
                .iter()
                .rev()
                .find(|(w, _)| *w == which)
                .map_or(which.default_pattern(), |(_, p)| p.as_str());
            let re = compile_span(&which.to_string(), pattern)?;
            require_groups(&re, which.required_groups(), &which.to_string())?;
            builtins.insert(which, re);
        }

        let signals = self
            .signals
            .into_iter()
            .map(|(raw, logical, transform)| (raw, SignalMapping { logical, transform }))
            .collect();

        if self.line_ending.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "descriptor {}: line ending must not be empty",
                self.name
            )));
        }

        Ok(DeviceDescriptor {
            default_end: compile("default end", &self.default_end)?,
            error: compile("error", &self.error)?,
            prompt: compile("prompt", &self.prompt)?,
            name: self.name,
            line_ending: self.line_ending,
            default_timeout: self.default_timeout,
            commands,
            ignore,
            async_pattern,
            signals,
            builtins,
            alphanumeric_operator: self.alphanumeric_operator,
        })
    }
}

fn compile(what: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidParameter(format!("invalid {what} pattern {pattern:?}: {e}")))
}

/// Compile a pattern the demultiplexer consumes spans with. Such a pattern
/// must never match the empty string.
fn compile_span(what: &str, pattern: &str) -> Result<Regex> {
    let re = compile(what, pattern)?;
    if re.is_match(b"") {
        return Err(Error::InvalidParameter(format!(
            "{what} pattern {pattern:?} matches the empty string"
        )));
    }
    Ok(re)
}

fn require_groups(re: &Regex, groups: &[&str], what: &str) -> Result<()> {
    for group in groups {
        if !re.capture_names().flatten().any(|n| n == *group) {
            return Err(Error::InvalidParameter(format!(
                "{what} pattern must have a named group `{group}`"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_compile() {
        let d = DescriptorBuilder::new("generic").build().unwrap();
        assert_eq!(d.name(), "generic");
        assert_eq!(d.line_ending(), b"\r");
        assert_eq!(d.default_timeout(), Duration::from_secs(5));
        assert!(d.end_pattern_for("anything").is_match(b"\r\nOK\r\n"));
        for which in Builtin::PRIORITY {
            assert!(d.builtin(which).is_some(), "{which}");
        }
        assert!(d.async_pattern().is_none());
        assert!(!d.reports_alphanumeric_operator());
    }

    #[test]
    fn builtin_reg_status_shapes() {
        let d = DescriptorBuilder::new("generic").build().unwrap();
        let re = d.builtin(Builtin::RegStatus).unwrap();

        let caps = re.captures(b"\r\n+CREG: 0,1\r\n").unwrap();
        assert_eq!(&caps["status"], b"1");

        let caps = re.captures(b"\r\n+CREG: 2\r\n").unwrap();
        assert_eq!(&caps["status"], b"2");

        let caps = re
            .captures(b"\r\n+CREG: 1,\"00C3\",\"A1B2\"\r\n")
            .unwrap();
        assert_eq!(&caps["status"], b"1");
        assert_eq!(&caps["lac"], b"00C3");
        assert_eq!(&caps["ci"], b"A1B2");

        // Incomplete line is not a match.
        assert!(!re.is_match(b"\r\n+CREG: 1"));
    }

    #[test]
    fn per_command_overrides() {
        let d = DescriptorBuilder::new("x")
            .command(
                "COPS=?",
                CommandSpec::new()
                    .extract(r"\((?P<stat>\d)\)")
                    .timeout(Duration::from_secs(300)),
            )
            .command("CMGS", CommandSpec::new().end(r"\r\n\+CMGS:\s*(\d+)\r\n\r\nOK\r\n"))
            .build()
            .unwrap();

        assert_eq!(d.timeout_for("COPS=?"), Duration::from_secs(300));
        assert_eq!(d.timeout_for("CSQ"), Duration::from_secs(5));
        assert!(d.command("COPS=?").unwrap().extract().is_some());
        assert!(d.end_pattern_for("CMGS").is_match(b"\r\n+CMGS: 4\r\n\r\nOK\r\n"));
        assert!(!d.end_pattern_for("CMGS").is_match(b"\r\nOK\r\n"));
    }

    #[test]
    fn bad_pattern_is_invalid_parameter() {
        let err = DescriptorBuilder::new("x").ignore("[unclosed").build().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(err.to_string().contains("ignore"));
    }

    #[test]
    fn async_pattern_requires_groups() {
        let err = DescriptorBuilder::new("x")
            .async_pattern(r"\r\n\^(?P<name>[A-Z]+)\r\n")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("value"));
    }

    #[test]
    fn builtin_override_requires_groups() {
        let err = DescriptorBuilder::new("x")
            .builtin_pattern(Builtin::RegStatus, r"\r\n\+CREG: \d\r\n")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn empty_matching_span_patterns_rejected() {
        let err = DescriptorBuilder::new("x").ignore("a*").build().unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(err.to_string().contains("empty string"));

        let err = DescriptorBuilder::new("x")
            .async_pattern(r"(?P<name>[A-Z]*):?(?P<value>[^\r\n]*)")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("async"));

        let err = DescriptorBuilder::new("x")
            .builtin_pattern(Builtin::IncomingCall, r"(?:\r\nRING\r\n)?")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn empty_line_ending_rejected() {
        assert!(DescriptorBuilder::new("x").line_ending(b"").build().is_err());
    }

    #[test]
    fn transforms_behave() {
        assert_eq!(transforms::number(" 17 "), Ok(SignalValue::Number(17)));
        assert!(transforms::number("x").is_err());
        assert_eq!(
            transforms::number_list("5,4"),
            Ok(SignalValue::List(vec![5, 4]))
        );
        assert!(transforms::number_list("5,x").is_err());
        assert_eq!(transforms::hex_number("1F"), Ok(SignalValue::Number(31)));
        assert_eq!(
            transforms::text(" LTE "),
            Ok(SignalValue::Text("LTE".into()))
        );
    }
}
