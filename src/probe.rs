//! Seam towards the OS-level collaborators the sampler reads from:
//! foreground window, logged-in user, and the optional screenshot and
//! camera-presence sources. Platform backends live behind [ActivityProbe];
//! the pipeline only ever sees this trait.

use std::sync::Arc;

use anyhow::Result;

/// Everything the sampler reads in one tick.
#[derive(Debug, Clone)]
pub struct ProbeSample {
    /// Title of the foreground window, e.g. "invoice.pdf - Preview".
    pub window_title: Arc<str>,
    /// Full path of the foreground process, e.g. /usr/bin/firefox.
    pub process_path: Arc<str>,
    /// OS account name of the currently logged-in user.
    pub os_user: Arc<str>,
    /// Opaque image payload, if a screenshot source is attached.
    pub screenshot: Option<Vec<u8>>,
    /// Seconds a face was detected since the previous tick, if a camera
    /// collaborator is attached.
    pub face_presence_seconds: Option<u32>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ActivityProbe: Send + 'static {
    fn sample(&mut self) -> Result<ProbeSample>;
}

/// Derives the application name from the probe's process path.
pub fn application_name(process_path: &str) -> Option<Arc<str>> {
    let stem = process_path
        .rsplit(['/', '\\'])
        .next()?
        .trim_end_matches(".exe");
    if stem.is_empty() {
        None
    } else {
        Some(Arc::from(stem))
    }
}

/// Final labels accepted as a hostname ending. A closed set keeps file
/// names like `invoice.pdf` from being read as domains.
const KNOWN_TLDS: &[&str] = &[
    "com", "org", "net", "io", "dev", "co", "edu", "gov", "app", "ai", "info", "uk", "de", "fr",
    "br", "jp", "nl", "es", "it", "pl",
];

/// Scans a window title for something that looks like a hostname:
/// dot-separated labels of `[a-z0-9-]` ending in a known TLD. Browser
/// titles usually carry the visited domain somewhere in there.
pub fn extract_domain(title: &str) -> Option<Arc<str>> {
    let lowered = title.to_lowercase();
    for token in lowered.split(|c: char| c.is_whitespace() || "()[]<>\"',/:;|".contains(c)) {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if !token.contains('.') {
            continue;
        }
        let labels: Vec<&str> = token.split('.').collect();
        if labels.len() < 2 {
            continue;
        }
        let well_formed = labels.iter().all(|l| {
            !l.is_empty()
                && l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !l.starts_with('-')
                && !l.ends_with('-')
        });
        let tld_like = labels.last().is_some_and(|l| KNOWN_TLDS.contains(l));
        if well_formed && tld_like {
            return Some(Arc::from(token));
        }
    }
    None
}
