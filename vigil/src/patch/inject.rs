// SPDX-License-Identifier: GPL-3.0-or-later

//! Source injection for web applications.
//!
//! The web agent is installed by inserting one `include` statement into
//! the application's entry script. The statement is bounded on both sides
//! by a sentinel comment, which makes the installation detectable (no
//! double injection) and reversible (the whole line is removed on
//! uninstall).

use thiserror::Error;

/// The sentinel bounding the injected statement.
pub const MARKER: &str = "/*TAPEWORMINSTALLED*/";

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("Target already carries the agent marker")]
    AlreadyInjected,
    #[error("Target carries no agent marker")]
    NotInjected,
}

/// Inserts the agent include into a source file.
///
/// The statement lands immediately after the `namespace` declaration when
/// one exists, otherwise after the PHP open tag, otherwise at the very
/// top. A file that already carries the marker is refused.
pub fn inject(source: &str, agent: &str) -> Result<String, InjectError> {
    if source.contains(MARKER) {
        return Err(InjectError::AlreadyInjected);
    }

    let payload = format!("{MARKER}include '{agent}';{MARKER}\n");
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let after = injection_point(&lines);

    let mut output = String::with_capacity(source.len() + payload.len() + 1);
    for line in &lines[..after] {
        output.push_str(line);
    }
    // The anchor line may be the last one and miss its newline.
    if after > 0 && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&payload);
    for line in &lines[after..] {
        output.push_str(line);
    }
    Ok(output)
}

/// Removes a previously injected statement.
pub fn remove(source: &str) -> Result<String, InjectError> {
    if !source.contains(MARKER) {
        return Err(InjectError::NotInjected);
    }
    Ok(source
        .split_inclusive('\n')
        .filter(|line| !line.contains(MARKER))
        .collect())
}

/// Returns true when the file already carries the agent.
pub fn is_injected(source: &str) -> bool {
    source.contains(MARKER)
}

/// The number of lines to keep before the injected statement.
fn injection_point(lines: &[&str]) -> usize {
    if let Some(index) = lines
        .iter()
        .position(|line| line.trim_start().starts_with("namespace ") && line.contains(';'))
    {
        return index + 1;
    }
    if let Some(index) = lines.iter().position(|line| line.contains("<?php")) {
        return index + 1;
    }
    0
}
