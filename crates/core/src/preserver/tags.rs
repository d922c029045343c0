//! User-visible progress tags.
//!
//! These strings are a wire contract with the CMS front-end: they are shown
//! verbatim to users and matched by the UI. Do not reword them.

/// Current preservation-status namespace.
pub const PRESERVATION_NAMESPACE: &str = "usermeta-preservation-status";
/// Legacy preservation-status namespace; used when already present on the
/// node.
pub const PRESERVATION_NAMESPACE_LEGACY: &str = "usermeta-a3m-progress";
/// Current DIP-status namespace.
pub const DIP_NAMESPACE: &str = "usermeta-dip-status";
/// Legacy DIP-status namespace; used when already present on the node.
pub const DIP_NAMESPACE_LEGACY: &str = "usermeta-dip-progress";
/// Namespace carrying the description-system slug for a package.
pub const ATOM_SLUG_NAMESPACE: &str = "usermeta-atom-slug";

/// Progress values in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressTag {
    Starting,
    Downloading,
    Preprocessing,
    Packaging,
    Extracting,
    Compressing,
    Waiting,
    Migrating,
    Depositing,
    Deposited,
    Uploading,
    Preserved,
}

impl ProgressTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "🟢 Starting...",
            Self::Downloading => "🌐 Downloading...",
            Self::Preprocessing => "🗂️ Preprocessing...",
            Self::Packaging => "📦 Packaging...",
            Self::Extracting => "🗃️ Extracting...",
            Self::Compressing => "🗃️ Compressing...",
            Self::Waiting => "⏳ Waiting...",
            Self::Migrating => "🚚 Migrating...",
            Self::Depositing => "📨 Depositing...",
            Self::Deposited => "✅ Deposited",
            Self::Uploading => "🌐 Uploading...",
            Self::Preserved => "🔒 Preserved",
        }
    }
}

/// Maximum length of the reason appended to a failure tag.
const MAX_REASON_LEN: usize = 100;

/// Terminal preservation failure value.
pub fn failed_tag(reason: &str) -> String {
    format!("❌ Failed: {}", truncate_reason(reason))
}

/// Terminal DIP failure value.
pub fn dip_failed_tag(reason: &str) -> String {
    format!("❌ DIP Failed: {}", truncate_reason(reason))
}

/// Preservation tag set alongside a DIP failure.
pub const DIP_FAILED_MARKER: &str = "❌ DIP Failed";

/// Strips newlines and bounds the reason to 100 characters.
pub fn truncate_reason(reason: &str) -> String {
    let flat: String = reason.replace(['\n', '\r'], " ");
    flat.chars().take(MAX_REASON_LEN).collect()
}
