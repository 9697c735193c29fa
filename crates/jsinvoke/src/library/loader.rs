//! Library loading
//!
//! Reads helper scripts, compiles each one in a throwaway isolate and keeps
//! the resulting bytecode. Any failure aborts the whole load.

use std::path::{Path, PathBuf};

use rquickjs::Ctx;
use tracing::{debug, info, instrument};

use crate::isolate::{Isolate, describe_exception};
use crate::library::{
    EMBEDDED_LIBRARY, Library, LibraryEntry, LibrarySource, LoadError, SCRIPT_EXTENSION, bytecode,
};
use crate::types::SandboxLimits;

/// ID given to the isolate used only for loading
const LOADER_ISOLATE_ID: u32 = u32::MAX;

impl Library {
    /// Read, compile and validate every library script
    ///
    /// Scripts are also evaluated, in order, in the loader isolate so that a
    /// script depending on an earlier one resolves, and so that faults in
    /// library bodies surface here rather than on first use.
    #[instrument(skip(limits))]
    pub fn load(source: &LibrarySource, limits: &SandboxLimits) -> Result<Self, LoadError> {
        let files = match source {
            LibrarySource::Embedded => EMBEDDED_LIBRARY
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
            LibrarySource::Directory(root) => read_directory(root)?,
        };

        let loader = Isolate::new(LOADER_ISOLATE_ID, limits)
            .map_err(|error| LoadError::Isolate(Box::new(error)))?;

        let mut entries = Vec::with_capacity(files.len());
        for (name, source) in files {
            let code_cache = loader
                .context()
                .with(|ctx| compile(&ctx, &name, &source))?;
            debug!(name, cache_len = code_cache.len(), "compiled library file");
            entries.push(LibraryEntry {
                name,
                source,
                code_cache,
            });
        }

        drop(loader);
        info!(entries = entries.len(), "library loaded");

        Ok(Self {
            entries: entries.into(),
        })
    }
}

/// Compile a script, capture its bytecode and run it in the loader context
///
/// Running the bytecode rather than the source also proves the cache loads.
fn compile(ctx: &Ctx<'_>, name: &str, source: &str) -> Result<Vec<u8>, LoadError> {
    let code_cache = bytecode::compile(ctx, name, source).map_err(|error| LoadError::Compile {
        name: name.to_string(),
        message: describe_exception(ctx, error),
    })?;

    // SAFETY: just written by `bytecode::compile`.
    unsafe { bytecode::run(ctx, &code_cache) }.map_err(|_| LoadError::Evaluate {
        name: name.to_string(),
        message: describe_exception(ctx, rquickjs::Error::Exception),
    })?;
    Ok(code_cache)
}

/// Collect `(name, source)` for every script under `root`
///
/// Names are paths relative to `root` with `/` separators.
fn read_directory(root: &Path) -> Result<Vec<(String, String)>, LoadError> {
    let mut paths = Vec::new();
    collect_scripts(root, &mut paths)?;

    paths
        .into_iter()
        .map(|path| {
            let source = std::fs::read_to_string(&path).map_err(|source| LoadError::ReadFile {
                path: path.clone(),
                source,
            })?;
            Ok((entry_name(root, &path), source))
        })
        .collect()
}

fn collect_scripts(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), LoadError> {
    let read_dir_failed = |source| LoadError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut children = std::fs::read_dir(dir)
        .map_err(read_dir_failed)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_dir_failed)?;
    children.sort();

    for path in children {
        if path.is_dir() {
            collect_scripts(&path, paths)?;
        } else if is_script(&path) {
            paths.push(path);
        }
    }
    Ok(())
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension == SCRIPT_EXTENSION)
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
