//! Pre-flight checks for mitimon
//!
//! Validates inputs before any event is read. Provides clear, actionable
//! error messages when requirements aren't met.

use anyhow::{bail, Result};
use object::Object;
use std::path::Path;

/// Run all pre-flight checks
///
/// # Errors
/// Returns an error if the event stream cannot be read
pub fn run_preflight_checks(events_path: &Path, kernel_path: Option<&str>, quiet: bool) -> Result<()> {
    check_event_stream(events_path)?;
    if let Some(kernel_path) = kernel_path {
        check_kernel_image(kernel_path, quiet);
    }
    Ok(())
}

/// Check that the recorded stream exists (`-` is stdin and always passes)
fn check_event_stream(events_path: &Path) -> Result<()> {
    if events_path == Path::new("-") {
        return Ok(());
    }
    if !events_path.exists() {
        bail!(
            "Event stream not found: {}\n\n\
             Pass a JSON-lines file recorded from the event source, or `-` for stdin.",
            events_path.display()
        );
    }
    if !events_path.is_file() {
        bail!("Not a file: {}", events_path.display());
    }
    Ok(())
}

/// Warn when the reference kernel image is unusable; the run continues without it
fn check_kernel_image(kernel_path: &str, quiet: bool) {
    let data = match std::fs::read(kernel_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("warning: cannot read kernel image {kernel_path}: {e}");
            eprintln!("         kernel frames will show addresses only (see --kernel-path)");
            return;
        }
    };
    if quiet {
        return;
    }

    let Ok(obj) = object::File::parse(&*data) else {
        eprintln!("warning: {kernel_path} is not a recognised executable image");
        return;
    };
    if obj.exports().map_or(true, |exports| exports.is_empty())
        && obj.section_by_name(".symtab").is_none()
    {
        eprintln!("warning: {kernel_path} has no exports or symbol table, the kernel cannot be located");
    }
}
