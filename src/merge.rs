use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::error::MergeError;

pub trait MergeTool: Send + Sync {
    fn program(&self) -> Result<&Path, MergeError>;
    fn run(&self, args: &[String]) -> Result<(), MergeError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: Option<PathBuf>,
}

impl FfmpegTool {
    pub fn new() -> Self {
        Self {
            ffmpeg: find_in_path("ffmpeg"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { ffmpeg: Some(path) }
    }
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeTool for FfmpegTool {
    fn program(&self) -> Result<&Path, MergeError> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| MergeError::MissingTool("ffmpeg".to_string()))
    }

    fn run(&self, args: &[String]) -> Result<(), MergeError> {
        let program = self.program()?;
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| MergeError::Tool(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), output.status)
        } else {
            stderr
        };
        Err(MergeError::Tool(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOutcome {
    Merged,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct MultipartMerger<T: MergeTool> {
    tool: T,
    generate_scripts: bool,
}

impl<T: MergeTool> MultipartMerger<T> {
    pub fn new(tool: T, generate_scripts: bool) -> Self {
        Self {
            tool,
            generate_scripts,
        }
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn merge(&self, output: &Path, inputs: &[PathBuf]) -> Result<MergeOutcome, MergeError> {
        let args = merge_args(output, inputs);
        let outcome = if output.exists() {
            tracing::info!("skipping existing multipart story {}", file_label(output));
            MergeOutcome::Skipped
        } else {
            if let Some(missing) = inputs.iter().find(|input| !input.is_file()) {
                return Err(MergeError::MissingInput(missing.clone()));
            }
            tracing::info!(
                "combining {} parts into {}",
                inputs.len(),
                file_label(output)
            );
            self.tool.run(&args)?;
            MergeOutcome::Merged
        };

        // The script is a side artifact and never changes the merge outcome.
        if self.generate_scripts {
            let script = script_path(output);
            match self.tool.program() {
                Ok(program) => {
                    if let Err(err) = write_script(&script, program, &args) {
                        tracing::warn!("could not generate {}: {err}", script.display());
                    }
                }
                Err(err) => tracing::warn!("no script for {}: {err}", file_label(output)),
            }
        }
        Ok(outcome)
    }
}

pub fn merge_args(output: &Path, inputs: &[PathBuf]) -> Vec<String> {
    let mut args = Vec::with_capacity(inputs.len() * 2 + 7);
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
    }
    args.extend([
        "-y".to_string(),
        "-loglevel".to_string(),
        "quiet".to_string(),
        "-filter_complex".to_string(),
        format!("concat=n={}", inputs.len()),
        output.to_string_lossy().to_string(),
    ]);
    args
}

pub fn script_path(output: &Path) -> PathBuf {
    output.with_extension("sh")
}

fn write_script(path: &Path, program: &Path, args: &[String]) -> Result<(), MergeError> {
    let script_err = |err: std::io::Error| MergeError::Script {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let mut command = shell_quote(&program.to_string_lossy());
    for arg in args {
        command.push(' ');
        command.push_str(&shell_quote(arg));
    }
    let content = format!("#! /usr/bin/env bash\n\n{command}\n");

    if path.exists() {
        fs::remove_file(path).map_err(script_err)?;
    }
    tracing::info!("generating script {}", file_label(path));
    fs::write(path, content).map_err(script_err)?;
    make_executable(path).map_err(script_err)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | '=' | ':'));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
