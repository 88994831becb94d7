use crossrun_dom::{Document, Navigation};
use tracing::{debug, info};

/// What `reset` does once storage is cleared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetMode {
    InPlace,
    Reload,
    Navigate(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetReport {
    pub cookies: usize,
    pub local: usize,
    pub session: usize,
    /// `None` when databases could not be enumerated.
    pub databases: Option<usize>,
    pub navigates: bool,
}

pub fn navigate(doc: &mut Document, url: &str) {
    let target = doc.resolve_url(url);
    info!(from = %doc.location, to = %target, "navigate");
    doc.request_navigation(Navigation::To(target));
}

pub fn reload(doc: &mut Document) {
    info!(location = %doc.location, "reload");
    doc.request_navigation(Navigation::Reload);
}

/// Clears cookies and web storage, and IndexedDB where the browser can enumerate it.
pub fn reset(doc: &mut Document, mode: &ResetMode) -> ResetReport {
    let storage = &mut doc.storage;
    let cookies = std::mem::take(&mut storage.cookies).len();
    let local = std::mem::take(&mut storage.local).len();
    let session = std::mem::take(&mut storage.session).len();
    let databases = if doc.capabilities.indexed_db_enumeration {
        Some(std::mem::take(&mut doc.storage.indexed_db).len())
    } else {
        debug!("indexedDB enumeration unavailable, databases kept");
        None
    };

    let navigates = match mode {
        ResetMode::InPlace => false,
        ResetMode::Reload => {
            reload(doc);
            true
        }
        ResetMode::Navigate(url) => {
            navigate(doc, url);
            true
        }
    };

    ResetReport {
        cookies,
        local,
        session,
        databases,
        navigates,
    }
}
