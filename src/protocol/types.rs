//! Plain data types shared by the codec and the rest of the crate.

/// Who currently holds a backend, and since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    /// The user name reported by the server.
    pub user: String,
    /// An opaque, server-formatted timestamp string.
    pub since: String,
}

/// A single backend board as reported by a LIST response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecord {
    /// The backend's name, e.g. `"xinu01"`.
    pub name: String,
    /// The backend class/type, e.g. `"quark"`.
    pub kind: String,
    /// Present if some user currently holds the backend.
    pub holder: Option<Holder>,
}

impl BackendRecord {
    /// A backend is free when nobody holds it.
    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }
}
