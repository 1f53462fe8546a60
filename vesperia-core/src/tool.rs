//! Subprocess boundary for the third-party packer and compressor.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::{Result, VesperiaError};

pub const TOOL_CONFIG_FILE: &str = "config.json";

/// Exit status the tools use when run without arguments.
const USAGE_EXIT_CODE: i32 = 255;
const DOTNET_MAJOR: &str = "6";

/// A command line program plus the arguments that precede every call, e.g.
/// `dotnet HyoutaToolsCLI.dll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), leading_args: Vec::new() }
    }

    pub fn with_leading_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn failure(&self, message: impl Into<String>) -> VesperiaError {
        VesperiaError::ExternalToolFailure {
            program: self.program.display().to_string(),
            message: message.into(),
        }
    }

    /// Runs the tool and returns its stdout. Anything on stderr counts as a
    /// failure, even with a zero exit status.
    pub fn run<I, A>(&self, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<std::ffi::OsStr>,
    {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .output()
            .map_err(|err| self.failure(format!("could not start: {err}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(self.failure(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        if !stderr.trim().is_empty() {
            return Err(self.failure(stderr.trim().to_string()));
        }

        log::debug!("{} finished", self.program.display());
        Ok(output.stdout)
    }

    /// Starts the tool without arguments. Printing usage and exiting with
    /// 255 counts as present.
    pub fn ensure_present(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.leading_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| self.failure(format!("not found: {err}")))?;

        match status.code() {
            Some(0) | Some(USAGE_EXIT_CODE) => Ok(()),
            _ => Err(self.failure(format!("could not be run ({status})"))),
        }
    }
}

fn check_dotnet_version(tool: &ExternalTool, stdout: &[u8]) -> Result<String> {
    let version = String::from_utf8_lossy(stdout).trim().to_string();
    if !version.starts_with(DOTNET_MAJOR) {
        return Err(tool.failure(format!(
            "version {version} is not supported, .NET {DOTNET_MAJOR}.0 is required"
        )));
    }
    Ok(version)
}

/// Where to find the external tools. Missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub dotnet: PathBuf,
    pub hyouta: PathBuf,
    pub comptoe: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            dotnet: PathBuf::from("dotnet"),
            hyouta: Path::new("HyoutaToolsCLI").join("HyoutaToolsCLI.dll"),
            comptoe: PathBuf::from("comptoe"),
        }
    }
}

impl ToolConfig {
    /// Loads the config, or the defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No tool config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The container and script packer, run through the .NET host.
    pub fn packer(&self) -> ExternalTool {
        ExternalTool::new(&self.dotnet).with_leading_args([self.hyouta.display().to_string()])
    }

    pub fn compressor(&self) -> ExternalTool {
        ExternalTool::new(&self.comptoe)
    }

    /// Checks that the .NET host has the right major version and that the
    /// packer and compressor can be started.
    pub fn check_dependencies(&self) -> Result<()> {
        let dotnet = ExternalTool::new(&self.dotnet);
        let version = check_dotnet_version(&dotnet, &dotnet.run(["--version"])?)?;
        log::info!(".NET {version}");

        for (name, tool) in [("HyoutaToolsCLI", self.packer()), ("comptoe", self.compressor())] {
            tool.ensure_present()?;
            log::info!("Found {name}");
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell() -> ExternalTool {
        ExternalTool::new("sh").with_leading_args(["-c"])
    }

    #[test]
    fn stdout_is_returned() {
        let out = shell().run(["printf hello"]).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn stderr_output_is_fatal() {
        let err = shell().run(["echo oops >&2"]).unwrap_err();
        match err {
            VesperiaError::ExternalToolFailure { program, message } => {
                assert_eq!(program, "sh");
                assert_eq!(message, "oops");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn non_zero_exit_is_fatal() {
        assert!(matches!(
            shell().run(["exit 3"]),
            Err(VesperiaError::ExternalToolFailure { .. })
        ));
    }

    #[test]
    fn missing_program_is_fatal() {
        let tool = ExternalTool::new("/nonexistent/comptoe");
        assert!(matches!(
            tool.run(["-d", "file"]),
            Err(VesperiaError::ExternalToolFailure { .. })
        ));
    }

    #[test]
    fn usage_exit_counts_as_present() {
        let script = |body: &str| ExternalTool::new("sh").with_leading_args(["-c", body]);
        assert!(script("exit 255").ensure_present().is_ok());
        assert!(script("echo usage >&2").ensure_present().is_ok());
        assert!(matches!(
            script("exit 1").ensure_present(),
            Err(VesperiaError::ExternalToolFailure { .. })
        ));
        assert!(ExternalTool::new("/nonexistent/HyoutaToolsCLI").ensure_present().is_err());
    }

    #[test]
    fn dotnet_major_version_is_checked() {
        let dotnet = ExternalTool::new("dotnet");
        assert_eq!(check_dotnet_version(&dotnet, b"6.0.420\n").unwrap(), "6.0.420");
        assert!(matches!(
            check_dotnet_version(&dotnet, b"8.0.100\n"),
            Err(VesperiaError::ExternalToolFailure { .. })
        ));
    }

    #[test]
    fn missing_dotnet_fails_the_check() {
        let config = ToolConfig {
            dotnet: PathBuf::from("/nonexistent/dotnet"),
            ..ToolConfig::default()
        };
        assert!(matches!(
            config.check_dependencies(),
            Err(VesperiaError::ExternalToolFailure { .. })
        ));
    }

    #[test]
    fn config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOOL_CONFIG_FILE);
        assert_eq!(ToolConfig::load(&path).unwrap(), ToolConfig::default());

        fs::write(&path, r#"{"comptoe": "/opt/comptoe"}"#).unwrap();
        let config = ToolConfig::load(&path).unwrap();
        assert_eq!(config.comptoe, PathBuf::from("/opt/comptoe"));
        assert_eq!(config.dotnet, PathBuf::from("dotnet"));

        let packer = config.packer();
        assert_eq!(packer.program, PathBuf::from("dotnet"));
        assert_eq!(packer.leading_args, vec![config.hyouta.display().to_string()]);
    }
}
