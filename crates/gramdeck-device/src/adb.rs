//! ADB bridge — shells out to the `adb` binary for every command.
//!
//! Each call spawns `adb [-s serial] ...` with a timeout. The child is killed
//! if the call is dropped, so a cancelled task never leaves a stray `adb`
//! process behind.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use gramdeck_core::config::{DeviceConfig, Point};
use gramdeck_core::error::{GramdeckError, Result};

use crate::bridge::{CommandOutput, DeviceBridge, DeviceInfo, KeyCode};

/// [`DeviceBridge`] backed by the Android Debug Bridge CLI.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: String,
    command_timeout: Duration,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        let adb_path = shellexpand::tilde(&config.adb_path).into_owned();
        Self::new(adb_path, Duration::from_secs(config.command_timeout_secs.max(1)))
    }

    /// Run adb and keep raw stdout.
    async fn exec(
        &self,
        serial: Option<&str>,
        args: &[&str],
    ) -> Result<(std::process::Output, Duration)> {
        let mut cmd = tokio::process::Command::new(&self.adb_path);
        if let Some(serial) = serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::trace!("adb {:?} {}", serial, args.join(" "));
        let start = Instant::now();
        match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok((output, start.elapsed())),
            Ok(Err(e)) => Err(GramdeckError::Device(format!(
                "'{}' not found or not executable: {e}",
                self.adb_path
            ))),
            Err(_) => Err(GramdeckError::Device(format!(
                "adb {} timed out after {:?}",
                args.first().copied().unwrap_or_default(),
                self.command_timeout
            ))),
        }
    }

    async fn run(&self, serial: Option<&str>, args: &[&str]) -> Result<CommandOutput> {
        let (output, elapsed) = self.exec(serial, args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let success = output.status.success();
        let error = if !stderr.is_empty() {
            Some(stderr)
        } else if !success {
            Some(format!("exit code {}", output.status.code().unwrap_or(-1)))
        } else {
            None
        };
        Ok(CommandOutput {
            success,
            stdout,
            error,
            elapsed,
        })
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("shell");
        full.extend_from_slice(args);
        self.run(Some(serial), &full).await
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    fn name(&self) -> &str {
        "adb"
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let out = self.run(None, &["devices"]).await?.check("adb devices")?;
        Ok(parse_devices(&out.stdout))
    }

    async fn connect(&self, serial: &str) -> Result<CommandOutput> {
        if is_network_serial(serial) {
            let out = self.run(None, &["connect", serial]).await?;
            // adb exits 0 even when the connection is refused.
            if !out.stdout.contains("connected to") {
                tracing::warn!("📵 adb connect {}: {}", serial, out.stdout);
                return Err(GramdeckError::DeviceNotConnected(format!(
                    "{serial}: {}",
                    out.stdout
                )));
            }
            tracing::info!("📱 Connected to {}", serial);
            return Ok(out);
        }

        let start = Instant::now();
        if self.is_connected(serial).await? {
            Ok(CommandOutput {
                elapsed: start.elapsed(),
                ..CommandOutput::ok(format!("{serial} already attached"))
            })
        } else {
            Err(GramdeckError::DeviceNotConnected(serial.to_string()))
        }
    }

    async fn disconnect(&self, serial: &str) -> Result<CommandOutput> {
        if is_network_serial(serial) {
            self.run(None, &["disconnect", serial]).await
        } else {
            // USB devices stay attached.
            Ok(CommandOutput::ok(""))
        }
    }

    async fn tap(&self, serial: &str, at: Point) -> Result<CommandOutput> {
        let (x, y) = (at.x.to_string(), at.y.to_string());
        self.shell(serial, &["input", "tap", &x, &y]).await
    }

    async fn swipe(
        &self,
        serial: &str,
        from: Point,
        to: Point,
        duration: Duration,
    ) -> Result<CommandOutput> {
        let coords = [from.x, from.y, to.x, to.y].map(|c| c.to_string());
        let ms = duration.as_millis().to_string();
        self.shell(
            serial,
            &["input", "swipe", &coords[0], &coords[1], &coords[2], &coords[3], &ms],
        )
        .await
    }

    async fn type_text(&self, serial: &str, text: &str) -> Result<CommandOutput> {
        let mut elapsed = Duration::ZERO;
        let mut last = CommandOutput::ok("");
        for chunk in input_text_chunks(text) {
            last = self.shell(serial, &["input", "text", &chunk]).await?;
            elapsed += last.elapsed;
            if !last.success {
                break;
            }
        }
        Ok(CommandOutput { elapsed, ..last })
    }

    async fn key_event(&self, serial: &str, key: KeyCode) -> Result<CommandOutput> {
        let code = key.code().to_string();
        self.shell(serial, &["input", "keyevent", &code]).await
    }

    async fn launch_app(&self, serial: &str, package: &str) -> Result<CommandOutput> {
        self.shell(
            serial,
            &["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"],
        )
        .await
    }

    async fn open_uri(&self, serial: &str, uri: &str) -> Result<CommandOutput> {
        let quoted = format!("'{}'", uri.replace('\'', "'\\''"));
        self.shell(
            serial,
            &["am", "start", "-a", "android.intent.action.VIEW", "-d", &quoted],
        )
        .await
    }

    async fn screenshot(&self, serial: &str) -> Result<Vec<u8>> {
        let (output, _) = self.exec(Some(serial), &["exec-out", "screencap", "-p"]).await?;
        if !output.status.success() {
            return Err(GramdeckError::Device(format!(
                "screencap failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Parse `adb devices` output.
pub fn parse_devices(stdout: &str) -> Vec<DeviceInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// `host:port` serials are reached over TCP with `adb connect`.
pub fn is_network_serial(serial: &str) -> bool {
    match serial.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Split text into escaped `input text` arguments.
///
/// The device turns every `%s` it receives into a space, so a literal `%`
/// followed by `s` has to be sent as two separate commands.
pub fn input_text_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut after_percent = false;
    for c in text.chars() {
        if after_percent && c == 's' {
            chunks.push(escape_input_text(&current));
            current.clear();
        }
        current.push(c);
        after_percent = c == '%';
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(escape_input_text(&current));
    }
    chunks
}

/// Escape text for `adb shell input text`: spaces become `%s`, shell
/// metacharacters get a backslash.
pub fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '?' | '~' | '#' | '!' | '[' | ']' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '\n' | '\r' | '\t' => out.push_str("%s"),
            _ => out.push(c),
        }
    }
    out
}
