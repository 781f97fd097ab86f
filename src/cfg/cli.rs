// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};

/// Resolve a config argument to an absolute path and verify it points at
/// a readable file, so a typo fails here instead of deep in the YAML
/// loader.
pub fn resolve_config_path(arg: &str) -> Result<PathBuf> {
    let path = PathBuf::from(arg);
    let path = if path.is_relative() {
        std::env::current_dir()
            .context("cannot determine the working directory")?
            .join(path)
    } else {
        path
    };

    ensure!(path.is_file(), "config path {path:?} is not a file");
    path.canonicalize()
        .with_context(|| format!("failed to canonicalize config path {path:?}"))
}

/// First CLI argument, or `default` when the binary is started bare.
pub fn config_path_from_args(default: &str) -> String {
    std::env::args().nth(1).unwrap_or_else(|| default.to_string())
}
