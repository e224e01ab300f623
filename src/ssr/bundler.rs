use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    pub entry_files: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub minify: bool,
    /// Packages left as bare imports in the output.
    pub externals: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    pub success: bool,
    pub diagnostics: Vec<String>,
}

impl BundleOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(diagnostics: Vec<String>) -> Self {
        Self {
            success: false,
            diagnostics,
        }
    }
}

/// Turns hydration entries into browser bundles.
#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    async fn build(&self, request: BundleRequest) -> BundleOutput;
}

/// Runs the `esbuild` CLI (or a compatible binary) as a child process.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    program: String,
}

impl EsbuildBundler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(&self, request: &BundleRequest) -> Vec<String> {
        let mut args: Vec<String> = request
            .entry_files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        args.push("--bundle".into());
        args.push("--format=esm".into());
        args.push("--platform=browser".into());
        args.push(format!(
            "--outfile={}",
            request.output_dir.join(&request.output_name).display()
        ));
        if request.minify {
            args.push("--minify".into());
        }
        args.extend(request.externals.iter().map(|name| format!("--external:{name}")));
        args
    }
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn build(&self, request: BundleRequest) -> BundleOutput {
        let output = Command::new(&self.program)
            .args(self.args(&request))
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => BundleOutput::ok(),
            Ok(output) => BundleOutput::failed(
                String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Err(err) => BundleOutput::failed(vec![format!("Failed to run {}: {err}", self.program)]),
        }
    }
}
