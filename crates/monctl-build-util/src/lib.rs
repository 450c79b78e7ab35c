//! Build-time helpers for rendering the `monctl` manual page.
//!
//! The build script of the `monctl` crate calls into this crate to pick a
//! reproducible date for the page header and to stage the rendered page under
//! `target/generated-man/<target>/<profile>` for packagers.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use time::{OffsetDateTime, format_description::well_known::Iso8601};

/// Date used when `SOURCE_DATE_EPOCH` is absent or unusable.
pub const FALLBACK_DATE: &str = "1970-01-01";

/// Resolves the manual page date from `SOURCE_DATE_EPOCH`.
///
/// Warnings are pushed without the `cargo:warning=` prefix so the caller
/// decides how to surface them.
pub fn manual_date_from_env(warnings: &mut Vec<String>) -> String {
    let raw = env::var("SOURCE_DATE_EPOCH").ok();
    manual_date(raw.as_deref(), warnings)
}

/// Formats a raw epoch value as an ISO 8601 calendar date.
///
/// A missing value falls back silently; malformed values fall back with a
/// warning.
///
/// # Examples
/// ```
/// use monctl_build_util::manual_date;
///
/// let mut warnings = Vec::new();
/// assert_eq!(manual_date(Some("86400"), &mut warnings), "1970-01-02");
/// assert!(warnings.is_empty());
/// ```
pub fn manual_date(raw: Option<&str>, warnings: &mut Vec<String>) -> String {
    let Some(raw) = raw else {
        return FALLBACK_DATE.into();
    };
    let Ok(seconds) = raw.trim().parse::<i64>() else {
        warnings.push(format!(
            "Invalid SOURCE_DATE_EPOCH '{raw}'; expected integer seconds since Unix epoch; \
             falling back to {FALLBACK_DATE}"
        ));
        return FALLBACK_DATE.into();
    };
    let formatted = OffsetDateTime::from_unix_timestamp(seconds)
        .ok()
        .and_then(|value| value.format(&Iso8601::DATE).ok());
    formatted.unwrap_or_else(|| {
        warnings.push(format!(
            "Invalid SOURCE_DATE_EPOCH '{raw}'; not a representable timestamp; falling back \
             to {FALLBACK_DATE}"
        ));
        FALLBACK_DATE.into()
    })
}

/// Locates the workspace `target` directory by walking up from `out_dir`.
///
/// Cargo places build script output under
/// `{workspace}/target/[{triple}/]{profile}/build/{crate}-{hash}/out`.
pub fn workspace_target_dir(out_dir: &Path) -> Option<PathBuf> {
    out_dir
        .ancestors()
        .find(|candidate| candidate.file_name().and_then(|name| name.to_str()) == Some("target"))
        .map(Path::to_path_buf)
}

/// Directory receiving generated manual pages for a target/profile pair.
///
/// Falls back to a relative `target` directory when `out_dir` is unknown or
/// does not live under a `target` directory.
pub fn man_page_dir(target: &str, profile: &str, out_dir: Option<&Path>) -> PathBuf {
    let base = out_dir
        .and_then(workspace_target_dir)
        .unwrap_or_else(|| PathBuf::from("target"));
    base.join("generated-man").join(target).join(profile)
}

/// Writes `data` to `dir/page_name`, replacing any previous page atomically.
///
/// # Errors
///
/// Returns any I/O error raised while creating the directory or writing and
/// renaming the staged file.
pub fn write_man_page(data: &[u8], dir: &Path, page_name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let destination = dir.join(page_name);
    let staged = dir.join(format!("{page_name}.tmp"));
    fs::write(&staged, data)?;
    fs::rename(&staged, &destination)?;
    Ok(destination)
}
