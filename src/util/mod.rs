pub mod xdg;

/// Expand a leading `~` and `$VAR` references in a user-supplied path.
pub fn expand_path(raw: &str) -> std::path::PathBuf {
    let expanded = shellexpand::full(raw)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(raw).into_owned());
    std::path::PathBuf::from(expanded)
}
