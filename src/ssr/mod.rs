//! Client hydration bundles for server-rendered views.
//!
//! At startup every `.tsx`/`.jsx` file under the views directory gets a
//! generated client entry that reads the embedded render model and hydrates
//! the component into the root element. The bundler turns each entry into
//! `<name>.bundle.js` under the public directory, and the registry maps the
//! component name to that file for the render path.

mod bundler;
mod registry;

pub use bundler::{BundleOutput, BundleRequest, Bundler, EsbuildBundler};
pub use registry::ViewBundleRegistry;

use crate::render::{DATA_ELEMENT_ID, ROOT_ELEMENT_ID, RUNTIME_IMPORTS};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const VIEW_EXTENSIONS: &[&str] = &["tsx", "jsx"];

/// Discovers views, writes their hydration entries, and bundles them.
pub struct HydrationBuilder {
    views_dir: PathBuf,
    public_dir: PathBuf,
    scratch_dir: PathBuf,
    bundler: Arc<dyn Bundler>,
    registry: ViewBundleRegistry,
}

impl HydrationBuilder {
    pub fn new(
        views_dir: impl Into<PathBuf>,
        public_dir: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        bundler: Arc<dyn Bundler>,
        registry: ViewBundleRegistry,
    ) -> Self {
        Self {
            views_dir: views_dir.into(),
            public_dir: public_dir.into(),
            scratch_dir: scratch_dir.into(),
            bundler,
            registry,
        }
    }

    /// Bundle every discovered view. Returns how many bundles were registered.
    ///
    /// A missing views directory is not an error. A view that fails to
    /// bundle is logged and skipped; its component renders without hydration.
    pub async fn build(&self) -> std::io::Result<usize> {
        if !tokio::fs::try_exists(&self.views_dir).await.unwrap_or(false) {
            tracing::debug!(dir = %self.views_dir.display(), "Views directory not found, skipping bundling");
            return Ok(0);
        }
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        tokio::fs::create_dir_all(&self.public_dir).await?;

        let views_dir = tokio::fs::canonicalize(&self.views_dir).await?;
        let files = discover_views(&views_dir).await?;
        tracing::info!(
            dir = %views_dir.display(),
            count = files.len(),
            "Auto-bundling views"
        );

        let mut bundled = 0;
        for path in files {
            let Some(component) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match self.bundle_view(component, &path).await {
                Ok(true) => bundled += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(component, error = %err, "Failed to write hydration entry");
                }
            }
        }
        Ok(bundled)
    }

    async fn bundle_view(&self, component: &str, source: &Path) -> std::io::Result<bool> {
        let entry = self.scratch_dir.join(format!("{component}.client.tsx"));
        tokio::fs::write(&entry, hydration_entry(component, source)).await?;

        let output_name = bundle_name(component);
        let output = self
            .bundler
            .build(BundleRequest {
                entry_files: vec![entry],
                output_dir: self.public_dir.clone(),
                output_name: output_name.clone(),
                minify: true,
                externals: RUNTIME_IMPORTS.iter().map(|(name, _)| name.to_string()).collect(),
            })
            .await;

        if output.success {
            tracing::debug!(component, bundle = %output_name, "View bundled");
            self.registry.register(component, &output_name);
            Ok(true)
        } else {
            tracing::error!(
                component,
                diagnostics = ?output.diagnostics,
                "Bundling failed; the view will render without hydration"
            );
            Ok(false)
        }
    }
}

pub fn bundle_name(component: &str) -> String {
    format!("{}.bundle.js", component.to_lowercase())
}

/// Every view source below `root`, depth first, in a stable order.
async fn discover_views(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut views = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();

        for path in children.into_iter().rev() {
            if tokio::fs::metadata(&path).await?.is_dir() {
                pending.push(path);
            } else if is_view(&path) {
                views.push(path);
            }
        }
    }
    views.sort();
    Ok(views)
}

fn is_view(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIEW_EXTENSIONS.contains(&ext))
}

/// A double-quoted JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Client entry that hydrates `component` from the module at `source`.
pub fn hydration_entry(component: &str, source: &Path) -> String {
    let source = js_string(&source.display().to_string().replace('\\', "/"));
    let component = js_string(component);
    format!(
        r#"import React from 'react';
import {{ hydrateRoot }} from 'react-dom/client';

const name = {component};

async function hydrate() {{
  const dataElement = document.getElementById('{DATA_ELEMENT_ID}');
  const data = dataElement ? JSON.parse(dataElement.textContent || '{{}}') : {{}};

  const Mod = await import({source});
  const Component = Mod[name] || Mod.default;
  if (!Component) {{
    console.error(`[Bunstone] Component ${{name}} not found in bundle.`);
    return;
  }}

  const root = document.getElementById('{ROOT_ELEMENT_ID}');
  if (!root) {{
    console.error('[Bunstone] Root element "{ROOT_ELEMENT_ID}" not found for hydration.');
    return;
  }}

  try {{
    hydrateRoot(root, React.createElement(Component, data));
    console.log(`[Bunstone] Hydration successful for component: ${{name}}`);
  }} catch (e) {{
    console.error(`[Bunstone] Hydration failed for component: ${{name}}`, e);
  }}
}}

if (document.readyState === 'loading') {{
  document.addEventListener('DOMContentLoaded', hydrate);
}} else {{
  hydrate();
}}
"#
    )
}
