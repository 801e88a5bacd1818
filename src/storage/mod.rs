//! File storage for profile pictures
//!
//! Storage is not provisioned for this deployment: uploads are accepted,
//! skipped, and the user is told why.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::couple::Partner;

/// Shown whenever an upload is attempted
pub const UPLOAD_DISABLED_NOTICE: &str =
    "Profile picture upload is disabled. Enable file storage for this deployment to use this feature.";

/// Channel for messages meant for the user rather than the log
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Notifier that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!(notice = message, "User notice");
    }
}

/// Notifier that keeps every message, for hosts that render them later
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    messages: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the collected messages
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// A picture the user picked for upload
#[derive(Debug, Clone)]
pub struct PictureUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Handle an upload while storage is disabled: no I/O, an empty URL and a
/// notice to the user
pub fn skip_upload(notifier: &dyn Notifier, upload: &PictureUpload, partner: Partner) -> String {
    info!(
        file = %upload.file_name,
        size = upload.bytes.len(),
        %partner,
        "Profile picture upload skipped"
    );
    notifier.notify(UPLOAD_DISABLED_NOTICE);
    String::new()
}
