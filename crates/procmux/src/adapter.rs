//! Interpreter adapters.
//!
//! The multiplexer core is interpreter-agnostic: the only per-interpreter
//! knowledge is how to launch the process, how to print a literal string to
//! stdout, and how to quote values. That knowledge is isolated here behind
//! [`InterpreterAdapter`], with two shipped implementations: PowerShell
//! ([`PwshAdapter`]) and POSIX `sh` ([`PosixShellAdapter`]).
//!
//! Marker strings are fixed by the tracker contract and are not
//! adapter-specific: `<<<SS_BEG_<id>>>>` and `<<<SS_END_<id>>>>`.

use std::collections::BTreeMap;
use std::path::Path;

/// Begin marker emitted on stdout immediately before a command's output.
#[must_use]
pub fn begin_marker(id: u64) -> String {
    format!("<<<SS_BEG_{id}>>>")
}

/// End marker emitted on stdout immediately after a command's output.
#[must_use]
pub fn end_marker(id: u64) -> String {
    format!("<<<SS_END_{id}>>>")
}

/// Interpreter-specific knowledge needed by the engine.
///
/// Implementations must be cheap to call; every method builds command text
/// only, nothing here touches the child process.
pub trait InterpreterAdapter: Send + Sync {
    /// Default executable name, used when the config leaves the path empty.
    fn program(&self) -> &str;

    /// Arguments that put the interpreter into "read commands from stdin" mode.
    fn launch_args(&self) -> Vec<String>;

    /// A complete input line (including the trailing newline) that makes the
    /// interpreter print `text` literally to stdout, followed by a newline.
    fn print_literal(&self, text: &str) -> String;

    /// Quote `text` as a literal for this interpreter.
    fn quote(&self, text: &str) -> String;

    /// Input that asks the interpreter to exit cleanly.
    fn exit_command(&self) -> &str {
        "exit\n"
    }

    /// Optional no-op executed right after startup to prime the pipeline.
    fn warmup_command(&self) -> Option<String>;

    /// Command that sources `script` against `snapshot` to restore a session.
    fn restore_command(&self, script: &Path, snapshot: &Path) -> String;

    /// Command that changes the interpreter's working directory.
    fn set_workdir_command(&self, dir: &str) -> String;

    /// Command that prints the interpreter's absolute working directory.
    fn get_workdir_command(&self) -> String;

    /// Command that sets a process-scoped environment variable.
    fn set_env_command(&self, name: &str, value: &str) -> String;

    /// Command that prints a process-scoped environment variable.
    fn get_env_command(&self, name: &str) -> String;

    /// Command that runs the script at `path` with positional `args`.
    /// `dot_source` keeps the script's scope in the session where supported.
    fn script_command(&self, path: &str, args: &[String], dot_source: bool) -> String;

    /// Command that runs the script at `path` with named arguments.
    fn script_command_kv(
        &self,
        path: &str,
        named_args: &BTreeMap<String, String>,
        dot_source: bool,
    ) -> String;

    /// Frame `command` into the three-line packet written to the child's
    /// stdin: print begin marker, command body (newline-terminated), print
    /// end marker.
    fn build_packet(&self, id: u64, command: &str) -> Vec<u8> {
        let beg = self.print_literal(&begin_marker(id));
        let end = self.print_literal(&end_marker(id));
        let mut packet = Vec::with_capacity(beg.len() + command.len() + end.len() + 1);
        packet.extend_from_slice(beg.as_bytes());
        packet.extend_from_slice(command.as_bytes());
        if !command.ends_with('\n') {
            packet.push(b'\n');
        }
        packet.extend_from_slice(end.as_bytes());
        packet
    }
}

/// PowerShell adapter (`pwsh`), matching the layout the engine was built for.
#[derive(Debug, Default, Clone, Copy)]
pub struct PwshAdapter;

impl InterpreterAdapter for PwshAdapter {
    fn program(&self) -> &str {
        "pwsh"
    }

    fn launch_args(&self) -> Vec<String> {
        ["-NoProfile", "-NonInteractive", "-NoLogo", "-NoExit", "-Command", "-"]
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn print_literal(&self, text: &str) -> String {
        format!("[Console]::Out.WriteLine({})\n", self.quote(text))
    }

    fn quote(&self, text: &str) -> String {
        // Single-quoted PowerShell literal; embedded quotes are doubled.
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('\'');
        for c in text.chars() {
            if c == '\'' {
                quoted.push_str("''");
            } else {
                quoted.push(c);
            }
        }
        quoted.push('\'');
        quoted
    }

    fn warmup_command(&self) -> Option<String> {
        Some("$null | Out-Null".to_string())
    }

    fn restore_command(&self, script: &Path, snapshot: &Path) -> String {
        format!(
            ". {} -Path {}",
            self.quote(&script.to_string_lossy()),
            self.quote(&snapshot.to_string_lossy())
        )
    }

    fn set_workdir_command(&self, dir: &str) -> String {
        format!("Set-Location -LiteralPath {}", self.quote(dir))
    }

    fn get_workdir_command(&self) -> String {
        "[IO.Path]::GetFullPath((Get-Location -PSProvider FileSystem).Path)".to_string()
    }

    fn set_env_command(&self, name: &str, value: &str) -> String {
        format!(
            "[Environment]::SetEnvironmentVariable({}, {}, 'Process')",
            self.quote(name),
            self.quote(value)
        )
    }

    fn get_env_command(&self, name: &str) -> String {
        format!(
            "[Environment]::GetEnvironmentVariable({}, 'Process')",
            self.quote(name)
        )
    }

    fn script_command(&self, path: &str, args: &[String], dot_source: bool) -> String {
        let mut arg_array = String::from("@(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                arg_array.push_str(", ");
            }
            arg_array.push_str(&self.quote(arg));
        }
        arg_array.push(')');

        let prefix = if dot_source { ". " } else { "& " };
        format!(
            "$__args__ = {arg_array};\n{prefix}{} @__args__",
            self.quote(path)
        )
    }

    fn script_command_kv(
        &self,
        path: &str,
        named_args: &BTreeMap<String, String>,
        dot_source: bool,
    ) -> String {
        // Hashtable literal for splatting. Keys are assumed bareword-safe.
        let mut map = String::from("@{");
        for (i, (key, value)) in named_args.iter().enumerate() {
            if i > 0 {
                map.push_str("; ");
            }
            map.push_str(key);
            map.push('=');
            map.push_str(&self.quote(value));
        }
        map.push('}');

        let prefix = if dot_source { ". " } else { "& " };
        format!(
            "$__params__ = {map};\n{prefix}{} @__params__",
            self.quote(path)
        )
    }
}

/// POSIX shell adapter (`sh`). Used by the integration tests and usable as a
/// lightweight interpreter in its own right.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixShellAdapter;

impl InterpreterAdapter for PosixShellAdapter {
    fn program(&self) -> &str {
        "sh"
    }

    fn launch_args(&self) -> Vec<String> {
        vec!["-s".to_string()]
    }

    fn print_literal(&self, text: &str) -> String {
        format!("printf '%s\\n' {}\n", self.quote(text))
    }

    fn quote(&self, text: &str) -> String {
        // Single-quoted shell literal; embedded quotes become '\''.
        let mut quoted = String::with_capacity(text.len() + 2);
        quoted.push('\'');
        for c in text.chars() {
            if c == '\'' {
                quoted.push_str("'\\''");
            } else {
                quoted.push(c);
            }
        }
        quoted.push('\'');
        quoted
    }

    fn warmup_command(&self) -> Option<String> {
        Some(":".to_string())
    }

    fn restore_command(&self, script: &Path, snapshot: &Path) -> String {
        // `.` takes no operands in POSIX sh; hand the snapshot over as $1.
        format!(
            "set -- {};\n. {}",
            self.quote(&snapshot.to_string_lossy()),
            self.quote(&script.to_string_lossy())
        )
    }

    fn set_workdir_command(&self, dir: &str) -> String {
        format!("cd -- {}", self.quote(dir))
    }

    fn get_workdir_command(&self) -> String {
        "pwd -P".to_string()
    }

    fn set_env_command(&self, name: &str, value: &str) -> String {
        format!("export {name}={}", self.quote(value))
    }

    fn get_env_command(&self, name: &str) -> String {
        format!("printf '%s\\n' \"${{{name}}}\"")
    }

    fn script_command(&self, path: &str, args: &[String], dot_source: bool) -> String {
        let quoted_args: Vec<String> = args.iter().map(|a| self.quote(a)).collect();
        if dot_source {
            if quoted_args.is_empty() {
                format!(". {}", self.quote(path))
            } else {
                format!("set -- {};\n. {}", quoted_args.join(" "), self.quote(path))
            }
        } else {
            let mut cmd = self.quote(path);
            for arg in &quoted_args {
                cmd.push(' ');
                cmd.push_str(arg);
            }
            cmd
        }
    }

    fn script_command_kv(
        &self,
        path: &str,
        named_args: &BTreeMap<String, String>,
        dot_source: bool,
    ) -> String {
        let mut cmd = String::new();
        for (key, value) in named_args {
            cmd.push_str(key);
            cmd.push('=');
            cmd.push_str(&self.quote(value));
            cmd.push('\n');
        }
        if dot_source {
            cmd.push_str(". ");
        }
        cmd.push_str(&self.quote(path));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_format() {
        assert_eq!(begin_marker(7), "<<<SS_BEG_7>>>");
        assert_eq!(end_marker(7), "<<<SS_END_7>>>");
        assert_eq!(begin_marker(12345), "<<<SS_BEG_12345>>>");
    }

    #[test]
    fn test_pwsh_quote_doubles_single_quotes() {
        let adapter = PwshAdapter;
        assert_eq!(adapter.quote("plain"), "'plain'");
        assert_eq!(adapter.quote("it's"), "'it''s'");
    }

    #[test]
    fn test_sh_quote_escapes_single_quotes() {
        let adapter = PosixShellAdapter;
        assert_eq!(adapter.quote("plain"), "'plain'");
        assert_eq!(adapter.quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_pwsh_packet_layout() {
        let adapter = PwshAdapter;
        let packet = adapter.build_packet(3, "Get-Date");
        let text = String::from_utf8(packet).expect("packet is utf-8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[Console]::Out.WriteLine('<<<SS_BEG_3>>>')");
        assert_eq!(lines[1], "Get-Date");
        assert_eq!(lines[2], "[Console]::Out.WriteLine('<<<SS_END_3>>>')");
    }

    #[test]
    fn test_packet_preserves_trailing_newline() {
        let adapter = PosixShellAdapter;
        let with_newline = adapter.build_packet(1, "echo hi\n");
        let without_newline = adapter.build_packet(1, "echo hi");
        assert_eq!(with_newline, without_newline);
    }

    #[test]
    fn test_packet_keeps_multiline_bodies_intact() {
        let adapter = PosixShellAdapter;
        let packet = adapter.build_packet(9, "a=1\necho $a");
        let text = String::from_utf8(packet).expect("packet is utf-8");
        assert!(text.contains("a=1\necho $a\n"));
    }

    #[test]
    fn test_sh_print_literal_is_exact() {
        let adapter = PosixShellAdapter;
        assert_eq!(
            adapter.print_literal("<<<SS_BEG_1>>>"),
            "printf '%s\\n' '<<<SS_BEG_1>>>'\n"
        );
    }

    #[test]
    fn test_pwsh_script_command_splats_args() {
        let adapter = PwshAdapter;
        let cmd = adapter.script_command("/tmp/s.ps1", &["a".into(), "b c".into()], true);
        assert_eq!(cmd, "$__args__ = @('a', 'b c');\n. '/tmp/s.ps1' @__args__");
    }

    #[test]
    fn test_pwsh_script_command_kv_builds_hashtable() {
        let adapter = PwshAdapter;
        let mut named = BTreeMap::new();
        named.insert("Name".to_string(), "x".to_string());
        named.insert("Value".to_string(), "y".to_string());
        let cmd = adapter.script_command_kv("/tmp/s.ps1", &named, false);
        assert_eq!(
            cmd,
            "$__params__ = @{Name='x'; Value='y'};\n& '/tmp/s.ps1' @__params__"
        );
    }

    #[test]
    fn test_sh_script_command_positional() {
        let adapter = PosixShellAdapter;
        let cmd = adapter.script_command("/tmp/s.sh", &["one".into()], false);
        assert_eq!(cmd, "'/tmp/s.sh' 'one'");
        let dot = adapter.script_command("/tmp/s.sh", &["one".into()], true);
        assert_eq!(dot, "set -- 'one';\n. '/tmp/s.sh'");
    }
}
