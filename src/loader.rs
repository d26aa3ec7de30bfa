//! Module loader that confines the engine to its own directory.
//!
//! The engine module and anything it imports must be `.js`/`.mjs` files
//! under the engine directory. Remote, `data:` and `blob:` specifiers are
//! refused outright.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

const FORBIDDEN_SCHEMES: &[&str] = &["http://", "https://", "data:", "blob:"];

pub struct EngineLoader {
    engine_dir: PathBuf,
}

impl EngineLoader {
    /// Fails if `engine_dir` does not exist or is not a directory.
    pub fn new(engine_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let canonical = engine_dir.as_ref().canonicalize().map_err(|e| {
            anyhow!(
                "Engine directory '{}' is not accessible: {}",
                engine_dir.as_ref().display(),
                e
            )
        })?;

        if !canonical.is_dir() {
            return Err(anyhow!(
                "Engine directory '{}' is not a directory",
                canonical.display()
            ));
        }

        Ok(Self {
            engine_dir: canonical,
        })
    }

    pub fn engine_dir(&self) -> &Path {
        &self.engine_dir
    }

    /// Resolve `entry` inside the engine directory to a module specifier.
    pub fn entry_specifier(&self, entry: &str) -> Result<ModuleSpecifier, Error> {
        let path = self.engine_dir.join(entry);
        self.check_path(&path)?;
        ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("Invalid engine entry: {}", path.display()))
    }

    /// Canonicalizes to follow symlinks, so `..` and links cannot escape.
    fn check_path(&self, path: &Path) -> Result<(), Error> {
        let inside = path
            .canonicalize()
            .map(|canonical| canonical.starts_with(&self.engine_dir))
            .unwrap_or(false);
        if !inside {
            return Err(anyhow!(
                "Access denied: '{}' is outside the engine directory",
                path.display()
            ));
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("js") | Some("mjs") => Ok(()),
            _ => Err(anyhow!(
                "Only .js and .mjs engine modules are allowed, got: {}",
                path.display()
            )),
        }
    }
}

impl ModuleLoader for EngineLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if FORBIDDEN_SCHEMES.iter().any(|s| specifier.starts_with(s)) {
            return Err(anyhow!("Remote imports are forbidden in the sandbox: {}", specifier));
        }

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            let referrer_url = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            referrer_url
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else if specifier.starts_with("file://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", specifier, e))?
        } else if specifier.starts_with('/') {
            ModuleSpecifier::from_file_path(specifier)
                .map_err(|_| anyhow!("Invalid absolute path: {}", specifier))?
        } else {
            // Bare specifiers ("codec-helpers.js") resolve from the engine root.
            ModuleSpecifier::from_file_path(self.engine_dir.join(specifier))
                .map_err(|_| anyhow!("Invalid bare specifier: {}", specifier))?
        };

        if resolved.scheme() != "file" {
            return Err(anyhow!("Only file:// modules allowed, got: {}", resolved.scheme()));
        }

        let path = resolved
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", resolved))?;
        self.check_path(&path)?;

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let read = || -> Result<ModuleSource, Error> {
            let path = module_specifier
                .to_file_path()
                .map_err(|_| anyhow!("Invalid file path: {}", module_specifier))?;
            self.check_path(&path)?;

            let code = std::fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;

            Ok(ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            ))
        };

        ModuleLoadResponse::Sync(read())
    }
}
